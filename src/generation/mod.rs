//! Generation engine: tasks, the per-chunk retry loop, the device pool and
//! the run orchestrator.

pub mod orchestrator;
pub mod pool;
pub mod task;
pub mod worker;

pub use orchestrator::{GenerationEvent, Orchestrator, RunSummary, pending_ids};
pub use pool::{StopHandle, WorkerPool};
pub use task::{
    Candidate, ResultStatus, Task, TaskResult, master_seed_for_run, random_seed, seed_for_attempt,
};
pub use worker::ChunkWorker;
