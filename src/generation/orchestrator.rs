//! Drives full runs and targeted regeneration over a session.
//!
//! The orchestrator is the only code that mutates the session: workers send
//! back immutable `TaskResult`s and they are merged here, one at a time, by
//! chunk id.

use crate::assembly::AssemblyPipeline;
use crate::config::GenerationOrder;
use crate::defaults;
use crate::error::Result;
use crate::generation::pool::{StopHandle, WorkerPool};
use crate::generation::task::{ResultStatus, Task, TaskResult, master_seed_for_run};
use crate::models::ModelFactory;
use crate::session::{ArtifactLayout, ChunkId, GenerationStatus, ScratchDir, Session, SessionStore};
use crate::tts::SamplingParams;
use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress notifications for observers (progress bars, GUIs).
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    RunStarted {
        run_index: u32,
        master_seed: u64,
        total: usize,
    },
    ChunkUpdated {
        chunk_id: ChunkId,
        sequence: usize,
        status: GenerationStatus,
        similarity: Option<f32>,
        seed: Option<u64>,
    },
    /// Emitted after every merged result.
    Progress {
        fraction: f32,
        completed: usize,
        total: usize,
    },
    RunFinished(RunSummary),
}

/// What one run did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub run_index: u32,
    pub master_seed: u64,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub placeholders: usize,
    pub errors: usize,
    pub cancelled: bool,
    /// Auto-assembled book, when assembly ran and produced output
    pub assembled: Option<PathBuf>,
}

impl RunSummary {
    pub fn fraction(&self) -> f32 {
        progress_fraction(self.completed, self.total)
    }
}

pub struct Orchestrator {
    factory: Arc<dyn ModelFactory>,
    layout: ArtifactLayout,
    devices: Vec<String>,
    events: Option<Sender<GenerationEvent>>,
    store: Option<Arc<dyn SessionStore>>,
    assembler: Option<AssemblyPipeline>,
    stop: StopHandle,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ModelFactory>, layout: ArtifactLayout, devices: Vec<String>) -> Self {
        let devices = if devices.is_empty() {
            vec![defaults::DEFAULT_DEVICE.to_string()]
        } else {
            devices
        };
        Self {
            factory,
            layout,
            devices,
            events: None,
            store: None,
            assembler: None,
            stop: StopHandle::new(),
        }
    }

    pub fn with_events(mut self, events: Sender<GenerationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Persist the session after every run.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pipeline used when `auto_assemble` is enabled.
    pub fn with_assembler(mut self, assembler: AssemblyPipeline) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Flag the caller can set at any time to end the current run early.
    ///
    /// Cleared when `run` or `regenerate` starts.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Full-run mode: `settings.runs` passes over every chunk not yet generated.
    ///
    /// Runs after the first start from a clean slate. A cancelled run ends the
    /// sequence.
    pub fn run(&self, session: &mut Session) -> Result<Vec<RunSummary>> {
        session.settings.validate()?;
        self.stop.reset();
        let mut summaries = Vec::new();

        for run_index in 0..session.settings.runs {
            if run_index > 0 {
                session.reset_generation();
            }
            let master_seed = master_seed_for_run(session.settings.master_seed, run_index);
            let pending = pending_ids(session);
            log::info!(
                "orchestrator: run {}/{} with master seed {master_seed}, {} chunk(s) pending",
                run_index + 1,
                session.settings.runs,
                pending.len()
            );

            let mut summary = self.execute(session, &pending, run_index, master_seed)?;
            self.persist(session)?;

            if !summary.cancelled && session.settings.auto_assemble {
                summary.assembled = self.auto_assemble(session, run_index, master_seed);
            }
            self.emit(GenerationEvent::RunFinished(summary.clone()));

            let cancelled = summary.cancelled;
            summaries.push(summary);
            if cancelled {
                log::warn!("orchestrator: run {} cancelled", run_index + 1);
                break;
            }
        }
        Ok(summaries)
    }

    /// Regenerate exactly `ids` in one run. Pause markers are ignored.
    pub fn regenerate(&self, session: &mut Session, ids: &[ChunkId]) -> Result<RunSummary> {
        session.settings.validate()?;
        self.stop.reset();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for id in ids {
            let chunk = session.chunk(id)?;
            if chunk.is_pause() {
                log::warn!("orchestrator: chunk {} is a pause marker; skipped", id.short());
                continue;
            }
            if seen.insert(id.clone()) {
                targets.push(id.clone());
            }
        }

        let master_seed = master_seed_for_run(session.settings.master_seed, 0);
        log::info!(
            "orchestrator: regenerating {} chunk(s) with master seed {master_seed}",
            targets.len()
        );
        let summary = self.execute(session, &targets, 0, master_seed)?;
        self.persist(session)?;
        self.emit(GenerationEvent::RunFinished(summary.clone()));
        Ok(summary)
    }

    /// Regenerate every chunk that is marked or failed.
    pub fn regenerate_marked(&self, session: &mut Session) -> Result<RunSummary> {
        let ids = session.marked_ids();
        self.regenerate(session, &ids)
    }

    fn execute(
        &self,
        session: &mut Session,
        ids: &[ChunkId],
        run_index: u32,
        master_seed: u64,
    ) -> Result<RunSummary> {
        let temp_dir = ScratchDir::create(self.layout.run_temp_dir(run_index))?;
        fs::create_dir_all(self.layout.chunk_dir())?;

        let tasks = self.build_tasks(session, ids, master_seed, temp_dir.path());
        let total = tasks.len();
        let mut summary = RunSummary {
            run_index,
            master_seed,
            total,
            ..RunSummary::default()
        };
        self.emit(GenerationEvent::RunStarted {
            run_index,
            master_seed,
            total,
        });
        if total == 0 {
            return Ok(summary);
        }

        let mut pool = WorkerPool::spawn(&self.devices, Arc::clone(&self.factory), self.stop.clone())?;
        for (index, task) in tasks.into_iter().enumerate() {
            pool.submit(index % pool.slots(), task)?;
        }
        pool.close();

        while summary.completed < total {
            let Some(result) = pool.recv() else {
                log::log!(
                    drained_level(self.stop.is_stopped()),
                    "orchestrator: workers exited with {} result(s) outstanding",
                    total - summary.completed
                );
                break;
            };
            if self.stop.is_stopped() {
                log::info!(
                    "orchestrator: stop requested, discarding result for chunk {}",
                    result.chunk_id.short()
                );
                break;
            }
            self.apply(session, &result, &mut summary);
        }
        summary.cancelled = self.stop.is_stopped() && summary.completed < total;

        // In-flight tasks finish; queued ones are skipped by the stop flag.
        pool.join();
        drop(temp_dir);

        log::info!(
            "orchestrator: run {} finished {}/{} ({} ok, {} placeholder, {} error)",
            run_index + 1,
            summary.completed,
            summary.total,
            summary.succeeded,
            summary.placeholders,
            summary.errors
        );
        Ok(summary)
    }

    /// Tasks for `ids` in the configured order, devices assigned round-robin.
    fn build_tasks(
        &self,
        session: &Session,
        ids: &[ChunkId],
        master_seed: u64,
        temp_dir: &Path,
    ) -> Vec<Task> {
        let settings = &session.settings;
        let wanted: HashSet<&ChunkId> = ids.iter().collect();
        let mut chunks: Vec<_> = session
            .ordered()
            .into_iter()
            .filter(|c| wanted.contains(&c.id) && !c.is_pause())
            .collect();
        if settings.order == GenerationOrder::LongestFirst {
            chunks.sort_by_key(|c| std::cmp::Reverse(c.text.chars().count()));
        }

        let params = SamplingParams {
            exaggeration: settings.exaggeration,
            temperature: settings.temperature,
            cfg_weight: settings.cfg_weight,
            watermark: !settings.disable_watermark,
        };

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| Task {
                chunk_id: chunk.id.clone(),
                sequence: chunk.sequence,
                text: chunk.text.clone(),
                device: self.devices[index % self.devices.len()].clone(),
                master_seed,
                num_candidates: settings.num_candidates,
                max_attempts: settings.max_attempts,
                asr_threshold: settings.asr_threshold,
                validation_enabled: settings.validation_enabled,
                voice_reference: settings.voice_reference.clone(),
                params,
                temp_dir: temp_dir.to_path_buf(),
                artifact_path: self.layout.chunk_audio(&chunk.id),
            })
            .collect()
    }

    fn apply(&self, session: &mut Session, result: &TaskResult, summary: &mut RunSummary) {
        summary.completed += 1;
        match result.status {
            ResultStatus::Success => summary.succeeded += 1,
            ResultStatus::FailedPlaceholder => summary.placeholders += 1,
            ResultStatus::Error => {
                summary.errors += 1;
                log::warn!(
                    "orchestrator: chunk {} failed: {}",
                    result.chunk_id.short(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        match session.chunk_mut(&result.chunk_id) {
            Ok(chunk) => {
                let generated = result.is_success();
                chunk.status = if generated {
                    GenerationStatus::Generated
                } else {
                    GenerationStatus::Failed
                };
                chunk.marked = !generated;
                chunk.seed = result.seed;
                chunk.similarity = result.similarity;

                let event = GenerationEvent::ChunkUpdated {
                    chunk_id: chunk.id.clone(),
                    sequence: chunk.sequence,
                    status: chunk.status,
                    similarity: chunk.similarity,
                    seed: chunk.seed,
                };
                self.emit(event);
            }
            Err(e) => log::warn!("orchestrator: result dropped: {e}"),
        }

        self.emit(GenerationEvent::Progress {
            fraction: summary.fraction(),
            completed: summary.completed,
            total: summary.total,
        });
    }

    fn auto_assemble(&self, session: &Session, run_index: u32, master_seed: u64) -> Option<PathBuf> {
        let assembler = self.assembler.as_ref()?;
        let output = self.layout.auto_output(run_index, master_seed);
        match assembler.assemble(&session.chunks, &output) {
            Ok(report) => {
                log::info!("orchestrator: assembled {}", report.output.display());
                Some(report.output)
            }
            Err(e) => {
                log::error!("orchestrator: auto-assembly failed: {e}");
                None
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<()> {
        match &self.store {
            Some(store) => store.save(session),
            None => Ok(()),
        }
    }

    fn emit(&self, event: GenerationEvent) {
        if let Some(events) = &self.events {
            events.send(event).ok();
        }
    }
}

/// Chunks a full run must generate: every text chunk not yet generated.
pub fn pending_ids(session: &Session) -> Vec<ChunkId> {
    session
        .ordered()
        .into_iter()
        .filter(|c| !c.is_pause() && c.status != GenerationStatus::Generated)
        .map(|c| c.id.clone())
        .collect()
}

/// Workers leave queued tasks behind on a stop; only an unrequested drain is an error.
fn drained_level(stopped: bool) -> log::Level {
    if stopped {
        log::Level::Info
    } else {
        log::Level::Error
    }
}

fn progress_fraction(completed: usize, total: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        completed as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationSettings;
    use crate::models::MockModelFactory;
    use crate::session::JsonSessionStore;
    use crossbeam_channel::unbounded;

    fn orchestrator(root: &Path, factory: MockModelFactory) -> Orchestrator {
        Orchestrator::new(
            Arc::new(factory),
            ArtifactLayout::new(root, "book"),
            vec!["cpu".to_string()],
        )
    }

    fn session(texts: &[&str]) -> Session {
        let settings = GenerationSettings {
            master_seed: 10,
            ..GenerationSettings::default()
        };
        Session::from_texts("book", settings, texts.iter().copied())
    }

    #[test]
    fn pending_skips_generated_and_pauses() {
        let mut s = session(&["a", "b", "c"]);
        s.chunks[1].status = GenerationStatus::Generated;
        s.insert_pause(0, 500);
        let pending = pending_ids(&s);
        assert_eq!(pending, vec![s.chunks[1].id.clone(), s.chunks[3].id.clone()]);
    }

    #[test]
    fn longest_first_orders_tasks_and_round_robins_devices() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(
            Arc::new(MockModelFactory::new()),
            ArtifactLayout::new(dir.path(), "book"),
            vec!["cuda:0".to_string(), "cuda:1".to_string()],
        );
        let mut s = session(&["mid text", "a", "the longest text of all"]);
        s.settings.order = GenerationOrder::LongestFirst;
        let ids = pending_ids(&s);

        let tasks = orch.build_tasks(&s, &ids, 10, dir.path());

        let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["the longest text of all", "mid text", "a"]);
        let devices: Vec<&str> = tasks.iter().map(|t| t.device.as_str()).collect();
        assert_eq!(devices, vec!["cuda:0", "cuda:1", "cuda:0"]);
        assert!(tasks.iter().all(|t| t.master_seed == 10));
    }

    #[test]
    fn empty_device_list_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(
            Arc::new(MockModelFactory::new()),
            ArtifactLayout::new(dir.path(), "book"),
            Vec::new(),
        );
        assert_eq!(orch.devices(), &["cpu".to_string()]);
    }

    #[test]
    fn results_merge_into_chunks_and_emit_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        let orch = orchestrator(dir.path(), MockModelFactory::new()).with_events(tx);
        let mut s = session(&["one", "two"]);
        s.chunks[0].marked = true;

        let summaries = orch.run(&mut s).unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].completed, 2);
        assert!(!summaries[0].cancelled);
        for chunk in &s.chunks {
            assert_eq!(chunk.status, GenerationStatus::Generated);
            assert!(!chunk.marked);
            assert_eq!(chunk.similarity, Some(1.0));
            assert_eq!(chunk.seed, Some(10));
        }

        let events: Vec<GenerationEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(GenerationEvent::RunStarted { total: 2, .. })));
        assert!(events.contains(&GenerationEvent::Progress {
            fraction: 1.0,
            completed: 2,
            total: 2
        }));
        assert!(matches!(events.last(), Some(GenerationEvent::RunFinished(_))));
        assert!(!dir.path().join("book/run_1_temp").exists());
    }

    #[test]
    fn later_runs_reset_and_offset_master_seed() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new();
        let log = factory.log();
        let store = Arc::new(JsonSessionStore::new(dir.path()));
        let orch = orchestrator(dir.path(), factory).with_store(store.clone());
        let mut s = session(&["only chunk"]);
        s.settings.runs = 3;

        let summaries = orch.run(&mut s).unwrap();

        let seeds: Vec<u64> = summaries.iter().map(|r| r.master_seed).collect();
        assert_eq!(seeds, vec![10, 11, 12]);
        assert_eq!(log.seeds(), vec![10, 11, 12]);
        assert_eq!(store.load("book").unwrap().chunks[0].seed, Some(12));
    }

    #[test]
    fn failures_are_marked() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), MockModelFactory::new().failing_device("cpu"));
        let mut s = session(&["x"]);

        let summary = &orch.run(&mut s).unwrap()[0];

        assert_eq!(summary.errors, 1);
        assert_eq!(s.chunks[0].status, GenerationStatus::Failed);
        assert!(s.chunks[0].marked);
        assert_eq!(s.chunks[0].seed, None);
    }

    #[test]
    fn regenerate_only_touches_requested_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), MockModelFactory::new());
        let mut s = session(&["a", "b", "c"]);
        let pause = s.insert_pause(1, 300);
        let target = s.chunks[2].id.clone();

        let summary = orch
            .regenerate(&mut s, &[target.clone(), target.clone(), pause])
            .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(s.chunk(&target).unwrap().status, GenerationStatus::Generated);
        assert_eq!(s.chunks[0].status, GenerationStatus::NotGenerated);
        assert_eq!(s.chunks[3].status, GenerationStatus::NotGenerated);
    }

    #[test]
    fn regenerate_unknown_chunk_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), MockModelFactory::new());
        let mut s = session(&["a"]);
        assert!(orch.regenerate(&mut s, &[ChunkId::from("nope")]).is_err());
    }

    #[test]
    fn regenerate_marked_picks_marked_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), MockModelFactory::new());
        let mut s = session(&["a", "b", "c"]);
        s.chunks[0].status = GenerationStatus::Failed;
        s.chunks[2].marked = true;

        let summary = orch.regenerate_marked(&mut s).unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(s.chunks[1].status, GenerationStatus::NotGenerated);
        assert!(s.marked_ids().is_empty());
    }

    #[test]
    fn invalid_settings_are_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new();
        let orch = orchestrator(dir.path(), factory.clone());
        let mut s = session(&["a"]);
        s.settings.num_candidates = 5;

        assert!(orch.run(&mut s).is_err());
        assert_eq!(factory.loads(), 0);
    }

    #[test]
    fn drained_pool_is_only_an_error_without_a_stop() {
        assert_eq!(drained_level(true), log::Level::Info);
        assert_eq!(drained_level(false), log::Level::Error);
    }
}
