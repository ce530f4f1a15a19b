use crate::defaults;
use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Compute devices, one worker slot each (e.g. "cuda:0", "cuda:1", "cpu")
    pub devices: Vec<String>,
    pub paths: PathsConfig,
    /// Defaults copied into new sessions
    pub generation: GenerationSettings,
    pub assembly: AssemblySettings,
    pub models: ModelsConfig,
    pub tools: ToolsConfig,
    /// Master seed from `NARRATE_SEED`; applied to every run like `--seed`
    #[serde(skip)]
    pub seed_override: Option<u64>,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub output_root: PathBuf,
}

/// Order in which pending chunks are dispatched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOrder {
    /// Sequence order
    #[default]
    InOrder,
    /// Longest text first, so slow generations start early and the pool drains evenly
    LongestFirst,
}

/// Run-level generation parameters, stored with each session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    /// Number of full runs (full-run mode only)
    pub runs: u32,
    /// 0 draws a fresh random master seed per run
    pub master_seed: u64,
    /// Passing candidates to collect before stopping early
    pub num_candidates: u32,
    /// Total attempts per chunk, failures included
    pub max_attempts: u32,
    pub asr_threshold: f32,
    /// When false every candidate passes without transcription
    pub validation_enabled: bool,
    pub exaggeration: f32,
    pub temperature: f32,
    pub cfg_weight: f32,
    pub disable_watermark: bool,
    pub order: GenerationOrder,
    pub voice_reference: Option<PathBuf>,
    /// Assemble the book after each completed full run
    pub auto_assemble: bool,
}

/// Delivery-format profile for the assembled book
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryProfile {
    #[default]
    Standard,
    /// Audiobook marketplace rules: lower peak ceiling plus head/tail room tone
    Acx,
}

impl DeliveryProfile {
    /// True-peak ceiling for loudness normalization, in dBTP.
    pub fn true_peak(self) -> f32 {
        match self {
            DeliveryProfile::Standard => defaults::STANDARD_TRUE_PEAK,
            DeliveryProfile::Acx => defaults::ACX_TRUE_PEAK,
        }
    }

    /// Silence before the first chunk, in milliseconds.
    pub fn head_ms(self) -> u32 {
        match self {
            DeliveryProfile::Standard => 0,
            DeliveryProfile::Acx => defaults::ACX_HEAD_SILENCE_MS,
        }
    }

    /// Silence after the last chunk, in milliseconds.
    pub fn tail_ms(self) -> u32 {
        match self {
            DeliveryProfile::Standard => 0,
            DeliveryProfile::Acx => defaults::ACX_TAIL_SILENCE_MS,
        }
    }
}

/// Loudness normalization stage (ffmpeg loudnorm)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizationSettings {
    pub enabled: bool,
    pub integrated_lufs: f32,
    pub loudness_range: f32,
}

/// Silence trimming stage (auto-editor)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrimSettings {
    pub enabled: bool,
    pub silent_speed: u32,
    pub frame_margin: u32,
    pub threshold: f32,
}

/// Tags written into the final file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

/// Assembly pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblySettings {
    pub inter_chunk_silence_ms: u32,
    pub paragraph_silence_ms: u32,
    pub chapter_silence_ms: u32,
    /// Chunks were grouped from several sentences; paragraph pauses are not applied
    pub grouping_enabled: bool,
    pub profile: DeliveryProfile,
    pub normalization: NormalizationSettings,
    pub trim: TrimSettings,
    pub metadata: Metadata,
}

/// External command templates for the command-line model backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelsConfig {
    /// Argument vector producing `{out}` as WAV from `{text}`
    pub generate_command: Vec<String>,
    /// Argument vector printing the transcript of `{audio}` to stdout
    pub transcribe_command: Vec<String>,
}

/// Explicit locations of optional post-processing tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: Option<PathBuf>,
    pub auto_editor: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: vec![defaults::DEFAULT_DEVICE.to_string()],
            paths: PathsConfig::default(),
            generation: GenerationSettings::default(),
            assembly: AssemblySettings::default(),
            models: ModelsConfig::default(),
            tools: ToolsConfig::default(),
            seed_override: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(defaults::DEFAULT_OUTPUT_ROOT),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            runs: defaults::DEFAULT_RUNS,
            master_seed: 0,
            num_candidates: defaults::DEFAULT_NUM_CANDIDATES,
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
            asr_threshold: defaults::DEFAULT_ASR_THRESHOLD,
            validation_enabled: true,
            exaggeration: defaults::DEFAULT_EXAGGERATION,
            temperature: defaults::DEFAULT_TEMPERATURE,
            cfg_weight: defaults::DEFAULT_CFG_WEIGHT,
            disable_watermark: true,
            order: GenerationOrder::InOrder,
            voice_reference: None,
            auto_assemble: false,
        }
    }
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            integrated_lufs: defaults::NORMALIZATION_LUFS,
            loudness_range: defaults::NORMALIZATION_LRA,
        }
    }
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            silent_speed: defaults::TRIM_SILENT_SPEED,
            frame_margin: defaults::TRIM_FRAME_MARGIN,
            threshold: defaults::TRIM_THRESHOLD,
        }
    }
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            inter_chunk_silence_ms: defaults::INTER_CHUNK_SILENCE_MS,
            paragraph_silence_ms: defaults::PARAGRAPH_SILENCE_MS,
            chapter_silence_ms: defaults::CHAPTER_SILENCE_MS,
            grouping_enabled: true,
            profile: DeliveryProfile::Standard,
            normalization: NormalizationSettings::default(),
            trim: TrimSettings::default(),
            metadata: Metadata::default(),
        }
    }
}

impl GenerationSettings {
    /// Reject settings the retry loop cannot honour.
    ///
    /// Only passing candidates count toward `num_candidates`, while
    /// `max_attempts` bounds every try, so `num_candidates > max_attempts`
    /// could never be satisfied.
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 {
            return Err(invalid("generation.runs", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("generation.max_attempts", "must be at least 1"));
        }
        if self.num_candidates == 0 {
            return Err(invalid("generation.num_candidates", "must be at least 1"));
        }
        if self.num_candidates > self.max_attempts {
            return Err(invalid(
                "generation.num_candidates",
                &format!(
                    "{} exceeds max_attempts ({}); only passing attempts count toward candidates",
                    self.num_candidates, self.max_attempts
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.asr_threshold) {
            return Err(invalid(
                "generation.asr_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> NarrateError {
    NarrateError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NarrateError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                NarrateError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML or invalid values.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(NarrateError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.generation.validate()?;
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            return Err(invalid("devices", "device names must not be empty"));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - NARRATE_OUTPUT_ROOT → paths.output_root
    /// - NARRATE_DEVICES → devices (comma-separated)
    /// - NARRATE_SEED → generation.master_seed, and the run seed of loaded sessions
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("NARRATE_OUTPUT_ROOT")
            && !root.is_empty()
        {
            self.paths.output_root = PathBuf::from(root);
        }

        if let Ok(devices) = std::env::var("NARRATE_DEVICES") {
            let list = parse_device_list(&devices);
            if !list.is_empty() {
                self.devices = list;
            }
        }

        if let Ok(seed) = std::env::var("NARRATE_SEED")
            && let Ok(seed) = seed.trim().parse::<u64>()
        {
            self.generation.master_seed = seed;
            self.seed_override = Some(seed);
        }

        self
    }

    /// Master seed for a run: the command-line value, then `NARRATE_SEED`.
    pub fn run_seed(&self, cli_seed: Option<u64>) -> Option<u64> {
        cli_seed.or(self.seed_override)
    }

    /// Devices to run on, falling back to the default device.
    pub fn resolved_devices(&self) -> Vec<String> {
        if self.devices.is_empty() {
            vec![defaults::DEFAULT_DEVICE.to_string()]
        } else {
            self.devices.clone()
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/narrate/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("narrate").join("config.toml"))
    }
}

/// Split a comma-separated device list, dropping blanks.
pub fn parse_device_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
