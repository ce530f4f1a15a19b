//! Messages exchanged between the orchestrator and its workers.

use crate::defaults;
use crate::session::ChunkId;
use crate::tts::SamplingParams;
use std::path::PathBuf;

/// One generation job for one chunk, built once per dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub chunk_id: ChunkId,
    pub sequence: usize,
    pub text: String,
    pub device: String,
    /// 0 draws a random seed for every attempt
    pub master_seed: u64,
    pub num_candidates: u32,
    pub max_attempts: u32,
    pub asr_threshold: f32,
    pub validation_enabled: bool,
    pub voice_reference: Option<PathBuf>,
    pub params: SamplingParams,
    /// Run-scoped scratch directory for candidate files
    pub temp_dir: PathBuf,
    /// Permanent location of the chosen candidate
    pub artifact_path: PathBuf,
}

impl Task {
    /// Scratch path for one attempt, unique per chunk and attempt.
    pub fn candidate_path(&self, attempt: u32, seed: u64) -> PathBuf {
        self.temp_dir.join(format!(
            "c_{}_cand_{}_seed{}.wav",
            self.chunk_id,
            attempt + 1,
            seed
        ))
    }
}

/// One rendered attempt awaiting selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub attempt: u32,
    pub seed: u64,
    pub path: PathBuf,
    pub duration_ms: u64,
    /// `None` when validation is bypassed
    pub similarity: Option<f32>,
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// A candidate passed validation
    Success,
    /// Nothing passed; the best-scoring failure was kept
    FailedPlaceholder,
    /// No usable candidate
    Error,
}

/// Outcome of one task, merged into the chunk by id.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub chunk_id: ChunkId,
    pub status: ResultStatus,
    pub seed: Option<u64>,
    pub similarity: Option<f32>,
    pub artifact_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn error(chunk_id: &ChunkId, message: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.clone(),
            status: ResultStatus::Error,
            seed: None,
            similarity: None,
            artifact_path: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Seed for a zero-based attempt: `master + attempt`, or random when master is 0.
pub fn seed_for_attempt(master_seed: u64, attempt: u32) -> u64 {
    if master_seed == 0 {
        random_seed()
    } else {
        master_seed.wrapping_add(attempt as u64)
    }
}

/// Master seed for a zero-based run: `configured + run`, or random when configured is 0.
pub fn master_seed_for_run(configured: u64, run_index: u32) -> u64 {
    if configured == 0 {
        random_seed()
    } else {
        configured.wrapping_add(run_index as u64)
    }
}

/// Uniform random seed in `1..=MAX_RANDOM_SEED`.
pub fn random_seed() -> u64 {
    let bits = uuid::Uuid::new_v4().as_u128();
    (bits % defaults::MAX_RANDOM_SEED as u128) as u64 + 1
}
