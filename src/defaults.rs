//! Default configuration constants for narrate.
//!
//! Shared constants used by the configuration types, the chunk worker and the
//! assembly pipeline, kept in one place so the numbers stay consistent.

/// Default compute device when none is configured.
pub const DEFAULT_DEVICE: &str = "cpu";

/// Default directory (relative to the working directory) holding sessions.
pub const DEFAULT_OUTPUT_ROOT: &str = "outputs";

/// Default number of full runs per `generate` invocation.
pub const DEFAULT_RUNS: u32 = 1;

/// Number of passing candidates to collect before a chunk stops early.
pub const DEFAULT_NUM_CANDIDATES: u32 = 1;

/// Total generation attempts per chunk, failures included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Minimum similarity between source text and transcript for a take to pass.
pub const DEFAULT_ASR_THRESHOLD: f32 = 0.85;

/// Default sampling parameters.
pub const DEFAULT_EXAGGERATION: f32 = 0.5;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_CFG_WEIGHT: f32 = 0.7;

/// Voice conditioning clamps exaggeration to this ceiling.
pub const MAX_CONDITIONING_EXAGGERATION: f32 = 1.0;

/// Candidates shorter than this are rejected as empty output.
pub const MIN_CANDIDATE_MS: u64 = 100;

/// Upper bound for randomly drawn seeds (inclusive).
pub const MAX_RANDOM_SEED: u64 = (1 << 32) - 1;

/// Silence between consecutive chunks in the assembled book.
pub const INTER_CHUNK_SILENCE_MS: u32 = 250;

/// Silence after a chunk that ends a paragraph (grouping disabled only).
pub const PARAGRAPH_SILENCE_MS: u32 = 750;

/// Silence placed before and after a chapter heading.
pub const CHAPTER_SILENCE_MS: u32 = 2000;

/// Duration used for pause markers that lost their duration.
pub const DEFAULT_PAUSE_MS: u32 = 1000;

/// Target integrated loudness for normalization, in LUFS.
pub const NORMALIZATION_LUFS: f32 = -23.0;

/// Loudness range passed to the normalization filter.
pub const NORMALIZATION_LRA: f32 = 11.0;

/// True-peak ceilings per delivery profile, in dBTP.
pub const STANDARD_TRUE_PEAK: f32 = -1.5;
pub const ACX_TRUE_PEAK: f32 = -3.0;

/// Room tone added around an ACX deliverable.
pub const ACX_HEAD_SILENCE_MS: u32 = 750;
pub const ACX_TAIL_SILENCE_MS: u32 = 2000;

/// Silence trimming: speed multiplier for silent sections (effectively cut).
pub const TRIM_SILENT_SPEED: u32 = 99999;

/// Silence trimming: frames of margin kept around speech.
pub const TRIM_FRAME_MARGIN: u32 = 6;

/// Silence trimming: amplitude threshold below which audio counts as silent.
pub const TRIM_THRESHOLD: f32 = 0.04;

/// Executable names of the optional post-processing tools.
pub const FFMPEG: &str = "ffmpeg";
pub const AUTO_EDITOR: &str = "auto-editor";

/// Sample rate used when a buffer has to be synthesized without a reference.
pub const FALLBACK_SAMPLE_RATE: u32 = 24000;
