//! narrate - Multi-device audiobook generation
//!
//! Turns a chunked text session into audio: every chunk is rendered several
//! times with reproducible seeds, each take is checked by speech recognition,
//! and the best take is kept. Finished chunks are assembled into a book.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assembly;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(feature = "cli")]
pub mod diagnostics;
pub mod error;
pub mod generation;
pub mod models;
pub mod session;
pub mod similarity;
pub mod stt;
pub mod text;
pub mod tools;
pub mod tts;

// Capability traits (generate -> transcribe -> score)
pub use models::{ModelFactory, WorkerModels};
pub use stt::Transcriber;
pub use tools::{CommandExecutor, SystemCommandExecutor};
pub use tts::SpeechGenerator;

// Engine
pub use assembly::{AssemblyPipeline, AssemblyReport};
pub use generation::{GenerationEvent, Orchestrator, RunSummary, StopHandle};

// Error handling
pub use error::{NarrateError, Result};

// Config and session
pub use config::{AssemblySettings, Config, GenerationSettings};
pub use session::{ArtifactLayout, Chunk, ChunkId, JsonSessionStore, Session};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
