//! Assembly of per-chunk artifacts into the finished book.
//!
//! Steps: join artifacts with silences, add profile head/tail room tone,
//! write the raw mix to scratch space, run the post-processing chain, then
//! export to the target container. Scratch files are removed in every case.

pub mod export;
pub mod post_process;
pub mod timeline;

pub use post_process::{
    LoudnessNormalization, PostStage, SilenceTrim, StageOutcome, StageReport, run_chain,
};
pub use timeline::{Timeline, concatenate};

use crate::audio::write_wav;
use crate::config::AssemblySettings;
use crate::error::{NarrateError, Result};
use crate::session::{ArtifactLayout, Chunk, ChunkId, ScratchDir};
use crate::tools::{CommandExecutor, SystemCommandExecutor, ToolSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one assembled file.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    pub output: PathBuf,
    /// Length before post-processing
    pub duration_secs: f64,
    pub chunks_used: usize,
    pub missing: Vec<ChunkId>,
    pub stages: Vec<StageReport>,
}

pub struct AssemblyPipeline {
    layout: ArtifactLayout,
    settings: AssemblySettings,
    tools: ToolSet,
    executor: Arc<dyn CommandExecutor>,
}

impl AssemblyPipeline {
    /// Pipeline with no external tools; every post-processing stage is skipped.
    pub fn new(layout: ArtifactLayout, settings: AssemblySettings) -> Self {
        Self {
            layout,
            settings,
            tools: ToolSet::none(),
            executor: Arc::new(SystemCommandExecutor::new()),
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    fn stages(&self, sample_rate: u32) -> Vec<Box<dyn PostStage>> {
        vec![
            Box::new(LoudnessNormalization::new(
                self.tools.ffmpeg.clone(),
                self.settings.normalization.clone(),
                self.settings.profile.true_peak(),
                sample_rate,
            )),
            Box::new(SilenceTrim::new(
                self.tools.auto_editor.clone(),
                self.settings.trim.clone(),
            )),
        ]
    }

    /// Assemble `chunks` (any order; sequence decides) into `output`.
    pub fn assemble(&self, chunks: &[Chunk], output: &Path) -> Result<AssemblyReport> {
        let refs: Vec<&Chunk> = chunks.iter().collect();
        self.assemble_refs(&refs, output)
    }

    fn assemble_refs(&self, chunks: &[&Chunk], output: &Path) -> Result<AssemblyReport> {
        let mut timeline = concatenate(chunks, &self.layout, &self.settings)?;
        let profile = self.settings.profile;
        timeline.audio.prepend_silence(profile.head_ms());
        timeline.audio.append_silence(profile.tail_ms());
        log::info!(
            "assembly: joined {} chunk(s), {:.1}s, {} missing",
            timeline.chunks_used,
            timeline.audio.duration_secs(),
            timeline.missing.len()
        );

        let scratch = ScratchDir::create(self.layout.assembly_temp_dir())?;
        let raw = scratch.path().join("assembled_raw.wav");
        write_wav(&raw, &timeline.audio)?;

        let stages = self.stages(timeline.audio.sample_rate);
        let (processed, stages) =
            run_chain(&stages, &raw, scratch.path(), self.executor.as_ref())?;
        export::export(
            &processed,
            output,
            &self.settings.metadata,
            self.tools.ffmpeg.as_deref(),
            self.executor.as_ref(),
        )?;
        drop(scratch);

        log::info!("assembly: wrote {}", output.display());
        Ok(AssemblyReport {
            output: output.to_path_buf(),
            duration_secs: timeline.audio.duration_secs(),
            chunks_used: timeline.chunks_used,
            missing: timeline.missing,
            stages,
        })
    }

    /// One file per chapter: `<stem>_chapter_NN.<ext>` next to `output`.
    ///
    /// Chapters start at each heading; chapters without audio are skipped and
    /// the numbering stays contiguous over the files written.
    pub fn assemble_chapters(&self, chunks: &[Chunk], output: &Path) -> Result<Vec<AssemblyReport>> {
        let parts = partition_chapters(chunks);
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.layout.session_name().to_string());
        let ext = export::container(output);
        let dir = output.parent().unwrap_or_else(|| Path::new(""));

        let mut reports = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let path = dir.join(format!("{stem}_chapter_{:02}.{ext}", reports.len() + 1));
            match self.assemble_refs(part, &path) {
                Ok(report) => reports.push(report),
                Err(NarrateError::EmptyAssembly { .. }) => {
                    log::warn!("assembly: chapter partition {} has no audio; skipped", index + 1);
                }
                Err(e) => return Err(e),
            }
        }

        if reports.is_empty() {
            return Err(NarrateError::EmptyAssembly {
                message: "no chapter has generated audio".to_string(),
            });
        }
        Ok(reports)
    }
}

/// Split at chapter headings, in sequence order. A heading opens a new part.
pub fn partition_chapters(chunks: &[Chunk]) -> Vec<Vec<&Chunk>> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.sequence);

    let mut parts: Vec<Vec<&Chunk>> = Vec::new();
    for chunk in ordered {
        match parts.last_mut() {
            Some(part) if !chunk.chapter_heading => part.push(chunk),
            Some(part) if part.is_empty() => part.push(chunk),
            _ => parts.push(vec![chunk]),
        }
    }
    parts
}
