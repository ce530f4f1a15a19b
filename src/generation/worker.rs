//! Bounded generate-validate loop for a single chunk.
//!
//! Per task: load models (once per worker), condition the voice (cached),
//! then render up to `max_attempts` candidates, stopping early once
//! `num_candidates` have passed. The shortest passing candidate wins; with no
//! pass the best-scoring failure becomes a placeholder. Every other candidate
//! file is deleted before the result is returned.

use crate::audio::{move_file, write_wav};
use crate::defaults;
use crate::error::Result;
use crate::generation::task::{Candidate, ResultStatus, Task, TaskResult, seed_for_attempt};
use crate::models::{ModelFactory, WorkerModels};
use crate::similarity;
use crate::text::normalize_for_speech;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum ModelState {
    Unloaded,
    Ready(WorkerModels),
    /// Initialisation failed; the reason is reported for every later task.
    Failed(String),
}

/// Worker bound to one device, owning its models for its whole life.
pub struct ChunkWorker {
    device: String,
    factory: Arc<dyn ModelFactory>,
    models: ModelState,
    /// Reference path and clamped exaggeration the generator is conditioned on.
    voice: Option<(PathBuf, u32)>,
}

impl ChunkWorker {
    pub fn new(device: impl Into<String>, factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            device: device.into(),
            factory,
            models: ModelState::Unloaded,
            voice: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Produce exactly one result for `task`. Never fails past this boundary.
    pub fn process(&mut self, task: &Task) -> TaskResult {
        if task.text.trim().is_empty() {
            return TaskResult::error(&task.chunk_id, "chunk has no text to speak");
        }
        if let Err(message) = self.ensure_models() {
            return TaskResult::error(&task.chunk_id, message);
        }
        if let Err(e) = self.ensure_voice(task) {
            log::error!(
                "worker[{}]: voice conditioning failed for chunk {}: {e}",
                self.device,
                task.chunk_id.short()
            );
            return TaskResult::error(&task.chunk_id, e.to_string());
        }
        if let Err(e) = fs::create_dir_all(&task.temp_dir) {
            return TaskResult::error(
                &task.chunk_id,
                format!("cannot create {}: {e}", task.temp_dir.display()),
            );
        }

        let ModelState::Ready(models) = &mut self.models else {
            return TaskResult::error(&task.chunk_id, "models unavailable");
        };
        let outcome = run_attempts(&self.device, models, task);
        finalize(task, outcome)
    }

    fn ensure_models(&mut self) -> std::result::Result<(), String> {
        match &self.models {
            ModelState::Ready(_) => Ok(()),
            ModelState::Failed(reason) => Err(reason.clone()),
            ModelState::Unloaded => match self.factory.load(&self.device) {
                Ok(models) => {
                    log::info!(
                        "worker[{}]: loaded {} / {}",
                        self.device,
                        models.generator.model_name(),
                        models.transcriber.model_name()
                    );
                    self.models = ModelState::Ready(models);
                    Ok(())
                }
                Err(e) => {
                    let reason = e.to_string();
                    log::error!("worker[{}]: {reason}; skipping its remaining tasks", self.device);
                    self.models = ModelState::Failed(reason.clone());
                    Err(reason)
                }
            },
        }
    }

    fn ensure_voice(&mut self, task: &Task) -> Result<()> {
        let Some(reference) = &task.voice_reference else {
            return Ok(());
        };
        let exaggeration = task
            .params
            .exaggeration
            .min(defaults::MAX_CONDITIONING_EXAGGERATION);
        let key = (reference.clone(), exaggeration.to_bits());
        if self.voice.as_ref() == Some(&key) {
            return Ok(());
        }
        if let ModelState::Ready(models) = &mut self.models {
            models.generator.prepare_voice(reference, exaggeration)?;
            log::debug!(
                "worker[{}]: conditioned on {}",
                self.device,
                reference.display()
            );
            self.voice = Some(key);
        }
        Ok(())
    }
}

/// Candidates kept after the attempt loop.
#[derive(Default)]
struct Outcome {
    passed: Vec<Candidate>,
    best_failed: Option<Candidate>,
    attempts: u32,
}

fn run_attempts(device: &str, models: &mut WorkerModels, task: &Task) -> Outcome {
    let spoken = normalize_for_speech(&task.text);
    let mut outcome = Outcome::default();

    for attempt in 0..task.max_attempts {
        if outcome.passed.len() >= task.num_candidates as usize {
            break;
        }
        outcome.attempts += 1;
        let seed = seed_for_attempt(task.master_seed, attempt);
        let tag = format!("worker[{device}]: chunk {} attempt {}", task.chunk_id.short(), attempt + 1);

        let audio = match models.generator.generate(&spoken, &task.params, seed) {
            Ok(audio) => audio,
            Err(e) => {
                log::warn!("{tag}: generation failed (seed {seed}): {e}");
                continue;
            }
        };
        if audio.is_empty() || audio.duration_ms() < defaults::MIN_CANDIDATE_MS {
            log::warn!(
                "{tag}: rejected {} ms of audio (seed {seed})",
                audio.duration_ms()
            );
            continue;
        }

        let path = task.candidate_path(attempt, seed);
        if let Err(e) = write_wav(&path, &audio) {
            log::warn!("{tag}: cannot write candidate: {e}");
            remove_quietly(&path);
            continue;
        }
        let mut candidate = Candidate {
            attempt,
            seed,
            path,
            duration_ms: audio.duration_ms(),
            similarity: None,
        };

        if !task.validation_enabled {
            log::debug!("{tag}: validation bypassed");
            outcome.passed.push(candidate);
            continue;
        }

        let heard = match models.transcriber.transcribe(&candidate.path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("{tag}: transcription failed, discarding candidate: {e}");
                remove_quietly(&candidate.path);
                continue;
            }
        };
        let score = similarity::score(&task.text, &heard);
        candidate.similarity = Some(score);

        if score >= task.asr_threshold {
            log::debug!("{tag}: passed with {score:.3}");
            outcome.passed.push(candidate);
            continue;
        }

        log::info!(
            "{tag}: similarity {score:.3} below {:.2}",
            task.asr_threshold
        );
        let better = outcome
            .best_failed
            .as_ref()
            .is_none_or(|best| score > best.similarity.unwrap_or(0.0));
        if better {
            if let Some(old) = outcome.best_failed.replace(candidate) {
                remove_quietly(&old.path);
            }
        } else {
            remove_quietly(&candidate.path);
        }
    }
    outcome
}

/// Pick the winner, move it into place and delete everything else.
fn finalize(task: &Task, outcome: Outcome) -> TaskResult {
    let Outcome {
        mut passed,
        best_failed,
        attempts,
    } = outcome;

    let chosen_index = passed
        .iter()
        .enumerate()
        .min_by_key(|(index, c)| (c.duration_ms, *index))
        .map(|(index, _)| index);

    let (chosen, status, leftovers) = match chosen_index {
        Some(index) => {
            let chosen = passed.remove(index);
            let mut leftovers = passed;
            leftovers.extend(best_failed);
            (chosen, ResultStatus::Success, leftovers)
        }
        None => match best_failed {
            Some(best) => (best, ResultStatus::FailedPlaceholder, Vec::new()),
            None => {
                return TaskResult::error(
                    &task.chunk_id,
                    format!("no usable candidate after {attempts} attempt(s)"),
                );
            }
        },
    };

    for leftover in &leftovers {
        remove_quietly(&leftover.path);
    }

    if let Err(e) = move_file(&chosen.path, &task.artifact_path) {
        remove_quietly(&chosen.path);
        return TaskResult::error(
            &task.chunk_id,
            format!("cannot store {}: {e}", task.artifact_path.display()),
        );
    }

    TaskResult {
        chunk_id: task.chunk_id.clone(),
        status,
        seed: Some(chosen.seed),
        similarity: chosen.similarity,
        artifact_path: Some(task.artifact_path.clone()),
        error: None,
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        log::warn!("worker: cannot remove {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MockModelFactory;
    use crate::session::ChunkId;
    use crate::stt::MockTranscriber;
    use crate::tts::{MockGenerator, MockRender, SamplingParams};

    fn task(dir: &Path, text: &str) -> Task {
        let chunk_id = ChunkId::generate();
        Task {
            artifact_path: dir.join("chunks").join(format!("audio_{chunk_id}.wav")),
            chunk_id,
            sequence: 1,
            text: text.to_string(),
            device: "cpu".to_string(),
            master_seed: 500,
            num_candidates: 1,
            max_attempts: 3,
            asr_threshold: 0.85,
            validation_enabled: true,
            voice_reference: None,
            params: SamplingParams::default(),
            temp_dir: dir.join("run_1_temp"),
        }
    }

    fn temp_files(task: &Task) -> usize {
        fs::read_dir(&task.temp_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn first_passing_attempt_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new();
        let log = factory.log();
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let task = task(dir.path(), "call me ishmael");

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.seed, Some(500));
        assert_eq!(result.similarity, Some(1.0));
        assert!(task.artifact_path.exists());
        assert_eq!(temp_files(&task), 0);
        assert_eq!(log.seeds(), vec![500]);
        // text handed to the model is cleaned up for speech
        assert_eq!(log.calls()[0].text, "Call me ishmael.");
    }

    #[test]
    fn shortest_passing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new()
            .with_generator(|_| MockGenerator::new("g").with_durations([900, 400, 400]));
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let mut task = task(dir.path(), "some words");
        task.num_candidates = 3;

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Success);
        // equal durations keep the earlier attempt
        assert_eq!(result.seed, Some(501));
        assert_eq!(temp_files(&task), 0);
        let stored = crate::audio::read_wav(&task.artifact_path).unwrap();
        assert_eq!(stored.duration_ms(), 400);
    }

    #[test]
    fn best_failure_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new().with_transcriber(|_| {
            MockTranscriber::new("t").with_script(["abcdxxxxxx", "abcdefxxxx", "abcdexxxxx"])
        });
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let task = task(dir.path(), "abcdefghij");

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::FailedPlaceholder);
        assert_eq!(result.similarity, Some(0.6));
        assert_eq!(result.seed, Some(501));
        assert!(task.artifact_path.exists());
        assert_eq!(temp_files(&task), 0);
    }

    #[test]
    fn empty_crashed_and_short_attempts_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new().with_generator(|_| {
            MockGenerator::new("g").with_script([
                MockRender::Empty,
                MockRender::Crash,
                MockRender::Audio(50),
                MockRender::Audio(800),
            ])
        });
        let log = factory.log();
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let mut task = task(dir.path(), "retry me");
        task.max_attempts = 4;

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.seed, Some(503));
        assert_eq!(log.seeds(), vec![500, 501, 502, 503]);
    }

    #[test]
    fn nothing_usable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new()
            .with_generator(|_| MockGenerator::new("g").with_script([MockRender::Crash; 3]));
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let task = task(dir.path(), "doomed");

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.error.unwrap().contains("3 attempt"));
        assert!(!task.artifact_path.exists());
        assert_eq!(temp_files(&task), 0);
    }

    #[test]
    fn transcription_failure_discards_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new()
            .with_transcriber(|_| MockTranscriber::new("t").then_fail().with_script(["fine text"]));
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let task = task(dir.path(), "fine text");

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.seed, Some(501));
        assert_eq!(temp_files(&task), 0);
    }

    #[test]
    fn bypassed_validation_passes_without_score() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new()
            .with_transcriber(|_| MockTranscriber::new("t").with_failure());
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let mut task = task(dir.path(), "unchecked");
        task.validation_enabled = false;

        let result = worker.process(&task);

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.similarity, None);
    }

    #[test]
    fn init_failure_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new().failing_device("cuda:9");
        let shared = Arc::new(factory.clone());
        let mut worker = ChunkWorker::new("cuda:9", shared);

        let first = worker.process(&task(dir.path(), "one"));
        let second = worker.process(&task(dir.path(), "two"));

        assert_eq!(first.status, ResultStatus::Error);
        assert_eq!(second.status, ResultStatus::Error);
        assert!(second.error.unwrap().contains("cuda:9"));
        assert_eq!(factory.loads(), 1);
    }

    #[test]
    fn voice_is_prepared_once_per_reference() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new();
        let log = factory.log();
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));

        let mut first = task(dir.path(), "one");
        first.voice_reference = Some(PathBuf::from("narrator.wav"));
        first.params.exaggeration = 1.7;
        let mut second = task(dir.path(), "two");
        second.voice_reference = Some(PathBuf::from("narrator.wav"));
        // clamps to the same conditioning as the first task
        second.params.exaggeration = 1.2;

        worker.process(&first);
        worker.process(&second);
        assert_eq!(log.voice_preparations(), 1);

        let mut third = task(dir.path(), "three");
        third.voice_reference = Some(PathBuf::from("other.wav"));
        worker.process(&third);
        assert_eq!(log.voice_preparations(), 2);
    }

    #[test]
    fn voice_failure_is_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockModelFactory::new()
            .with_generator(|_| MockGenerator::new("g").with_voice_failure());
        let mut worker = ChunkWorker::new("cpu", Arc::new(factory));
        let mut task = task(dir.path(), "hello");
        task.voice_reference = Some(PathBuf::from("bad.wav"));

        let result = worker.process(&task);
        assert_eq!(result.status, ResultStatus::Error);
    }
}
