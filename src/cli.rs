//! Command-line interface for narrate
//!
//! Provides argument parsing using clap derive macros.

use crate::config::parse_device_list;
use crate::session::{ArtifactLayout, ChunkId, Session};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

/// Multi-device audiobook generation
#[derive(Parser, Debug)]
#[command(
    name = "narrate",
    version,
    about = "Audiobook generation with recognition-validated takes"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: progress details, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate every chunk that has no audio yet
    Generate {
        /// Session file (<name>_session.json)
        #[arg(long, short = 's', value_name = "FILE")]
        session: PathBuf,

        /// Number of full runs (overrides the session setting)
        #[arg(long, value_name = "N")]
        runs: Option<u32>,

        /// Master seed; 0 draws a random seed per run
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,

        /// Devices to use, comma-separated (e.g. cuda:0,cuda:1)
        #[arg(long, value_name = "LIST")]
        devices: Option<String>,
    },

    /// Regenerate selected chunks
    Regenerate {
        /// Session file (<name>_session.json)
        #[arg(long, short = 's', value_name = "FILE")]
        session: PathBuf,

        /// Chunk id or sequence number (repeatable)
        #[arg(long = "chunk", value_name = "ID")]
        chunks: Vec<String>,

        /// Regenerate every marked or failed chunk (the default without --chunk)
        #[arg(long, conflicts_with = "chunks")]
        marked: bool,

        /// Devices to use, comma-separated
        #[arg(long, value_name = "LIST")]
        devices: Option<String>,
    },

    /// Assemble generated chunks into the finished book
    Assemble {
        /// Session file (<name>_session.json)
        #[arg(long, short = 's', value_name = "FILE")]
        session: PathBuf,

        /// Output file; the extension picks the container (wav, mp3, m4b, ...)
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write one file per chapter
        #[arg(long)]
        chapters: bool,
    },

    /// Show per-chunk generation status
    Status {
        /// Session file (<name>_session.json)
        #[arg(long, short = 's', value_name = "FILE")]
        session: PathBuf,

        /// List every chunk, not only those needing attention
        #[arg(long)]
        all: bool,
    },

    /// Check external tools and model commands
    Check,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file location
    Path,
}

/// Log filter for the requested verbosity. `RUST_LOG` takes precedence.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Device list given on the command line, if any.
pub fn devices_arg(value: Option<&str>) -> Option<Vec<String>> {
    value.map(parse_device_list).filter(|list| !list.is_empty())
}

/// Artifact layout for a session loaded from `session_file`.
///
/// Files stored at `<root>/<name>/<name>_session.json` keep their root;
/// anything else falls back to `output_root`.
pub fn layout_for(session_file: &Path, session: &Session, output_root: &Path) -> ArtifactLayout {
    let session_dir = session_file.parent();
    let in_place = session_dir
        .and_then(Path::file_name)
        .is_some_and(|dir| dir == session.name.as_str());

    match session_dir.and_then(Path::parent) {
        Some(root) if in_place => ArtifactLayout::new(root, session.name.clone()),
        _ => ArtifactLayout::new(output_root, session.name.clone()),
    }
}

/// Resolve `--chunk` arguments: an exact id, or a 1-based sequence number.
///
/// Unresolvable arguments are passed through so the orchestrator reports them.
pub fn resolve_chunk_args(session: &Session, args: &[String]) -> Vec<ChunkId> {
    args.iter()
        .map(|arg| {
            let arg = arg.trim();
            if session.chunks.iter().any(|c| c.id.as_str() == arg) {
                return ChunkId::from(arg);
            }
            arg.parse::<usize>()
                .ok()
                .and_then(|seq| session.chunks.iter().find(|c| c.sequence == seq))
                .map(|c| c.id.clone())
                .unwrap_or_else(|| ChunkId::from(arg))
        })
        .collect()
}
