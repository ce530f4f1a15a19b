//! Ordered, independently skippable post-processing of the joined book.

use crate::config::{NormalizationSettings, TrimSettings};
use crate::error::Result;
use crate::tools::CommandExecutor;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// One external processing step turning `input` into `output`.
pub trait PostStage: Send + Sync {
    /// Name for logging/diagnostics.
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Tool the stage runs; `None` when it is not installed.
    fn tool(&self) -> Option<&Path>;

    /// Argument list for the tool.
    fn args(&self, input: &Path, output: &Path) -> Vec<String>;
}

/// Loudness normalization through ffmpeg's `loudnorm` filter.
///
/// `loudnorm` resamples to 192 kHz unless told otherwise, so the output is
/// pinned to the rate of the joined mix.
pub struct LoudnessNormalization {
    ffmpeg: Option<PathBuf>,
    settings: NormalizationSettings,
    true_peak: f32,
    sample_rate: u32,
}

impl LoudnessNormalization {
    pub fn new(
        ffmpeg: Option<PathBuf>,
        settings: NormalizationSettings,
        true_peak: f32,
        sample_rate: u32,
    ) -> Self {
        Self {
            ffmpeg,
            settings,
            true_peak,
            sample_rate,
        }
    }
}

impl PostStage for LoudnessNormalization {
    fn name(&self) -> &'static str {
        "loudness-normalization"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn tool(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-af".to_string(),
            format!(
                "loudnorm=I={}:TP={}:LRA={}",
                self.settings.integrated_lufs, self.true_peak, self.settings.loudness_range
            ),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            output.display().to_string(),
        ]
    }
}

/// Silence trimming through auto-editor.
pub struct SilenceTrim {
    auto_editor: Option<PathBuf>,
    settings: TrimSettings,
}

impl SilenceTrim {
    pub fn new(auto_editor: Option<PathBuf>, settings: TrimSettings) -> Self {
        Self {
            auto_editor,
            settings,
        }
    }
}

impl PostStage for SilenceTrim {
    fn name(&self) -> &'static str {
        "silence-trim"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn tool(&self) -> Option<&Path> {
        self.auto_editor.as_deref()
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            input.display().to_string(),
            "--silent-speed".to_string(),
            self.settings.silent_speed.to_string(),
            "--frame-margin".to_string(),
            self.settings.frame_margin.to_string(),
            "--edit".to_string(),
            format!("audio:threshold={}", self.settings.threshold),
            "--no-open".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    Disabled,
    ToolMissing,
    /// Tool failed; the previous stage's output was carried forward
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub outcome: StageOutcome,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StageOutcome::Applied => write!(f, "{}: applied", self.stage),
            StageOutcome::Disabled => write!(f, "{}: disabled", self.stage),
            StageOutcome::ToolMissing => write!(f, "{}: skipped (tool not found)", self.stage),
            StageOutcome::Failed(reason) => write!(f, "{}: skipped ({reason})", self.stage),
        }
    }
}

/// Run every stage in order inside `work_dir`, starting from `input`.
///
/// Returns the file holding the last successful output (possibly `input`
/// itself) and one report per stage. A stage never aborts the chain.
pub fn run_chain(
    stages: &[Box<dyn PostStage>],
    input: &Path,
    work_dir: &Path,
    executor: &dyn CommandExecutor,
) -> Result<(PathBuf, Vec<StageReport>)> {
    let mut current = input.to_path_buf();
    let mut reports = Vec::with_capacity(stages.len());

    for (index, stage) in stages.iter().enumerate() {
        let outcome = if !stage.is_enabled() {
            StageOutcome::Disabled
        } else if let Some(tool) = stage.tool() {
            let output = work_dir.join(format!("stage_{}_{}.wav", index + 1, stage.name()));
            let args = stage.args(&current, &output);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let tool = tool.display().to_string();

            match executor.execute(&tool, &args) {
                Ok(_) if output.is_file() => {
                    current = output;
                    StageOutcome::Applied
                }
                Ok(_) => {
                    fs::remove_file(&output).ok();
                    StageOutcome::Failed(format!("{tool} produced no output"))
                }
                Err(e) => {
                    fs::remove_file(&output).ok();
                    StageOutcome::Failed(e.to_string())
                }
            }
        } else {
            StageOutcome::ToolMissing
        };

        let report = StageReport {
            stage: stage.name(),
            outcome,
        };
        match &report.outcome {
            StageOutcome::Applied | StageOutcome::Disabled => log::debug!("assembly: {report}"),
            _ => log::warn!("assembly: {report}"),
        }
        reports.push(report);
    }

    Ok((current, reports))
}
