//! External command execution and post-processing tool discovery.
//!
//! The `CommandExecutor` trait keeps every subprocess call behind one seam so
//! the assembly pipeline and the command-line model backend can be tested
//! without the real tools installed.

use crate::config::ToolsConfig;
use crate::defaults;
use crate::error::{NarrateError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Trait for executing system commands.
///
/// Object-safe, Send + Sync for use from worker threads.
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with arguments.
    ///
    /// Returns the stdout of the command on success.
    /// Returns an error if the command is not found or exits non-zero.
    fn execute(&self, command: &str, args: &[&str]) -> Result<String>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        log::debug!("tools: running {} {}", command, args.join(" "));
        let output = Command::new(command).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NarrateError::ToolNotFound {
                    tool: command.to_string(),
                }
            } else {
                NarrateError::ExternalTool {
                    message: format!("Failed to execute {}: {}", command, e),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NarrateError::ExternalTool {
                message: format!(
                    "{} failed with status {:?}: {}",
                    command,
                    output.status.code(),
                    stderr.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Locations of the optional post-processing tools; `None` disables a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSet {
    pub ffmpeg: Option<PathBuf>,
    pub auto_editor: Option<PathBuf>,
}

impl ToolSet {
    /// No tools: every external stage is skipped.
    pub fn none() -> Self {
        Self::default()
    }

    /// Resolve tools from explicit config paths, then `PATH`.
    pub fn detect(config: &ToolsConfig) -> Self {
        let tools = Self {
            ffmpeg: resolve_tool(config.ffmpeg.as_deref(), defaults::FFMPEG),
            auto_editor: resolve_tool(config.auto_editor.as_deref(), defaults::AUTO_EDITOR),
        };
        for (name, path) in [
            (defaults::FFMPEG, &tools.ffmpeg),
            (defaults::AUTO_EDITOR, &tools.auto_editor),
        ] {
            match path {
                Some(p) => log::info!("tools: {name} found at {}", p.display()),
                None => log::warn!("tools: {name} not found; its post-processing stage is disabled"),
            }
        }
        tools
    }
}

fn resolve_tool(explicit: Option<&Path>, name: &str) -> Option<PathBuf> {
    match explicit {
        Some(path) if path.is_file() => Some(path.to_path_buf()),
        Some(path) => {
            log::warn!("tools: configured {name} path {} does not exist", path.display());
            None
        }
        None => find_in_path(name),
    }
}

/// Search `PATH` for an executable, without running it.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        [name.to_string(), format!("{name}.exe")]
            .into_iter()
            .map(|candidate| dir.join(candidate))
            .find(|p| p.is_file())
    })
}

/// Mock command executor for testing.
///
/// Records every call. By default a call "succeeds" by copying its input file
/// to its output file (input follows `-i`, or is the first argument; output is
/// the last argument), which is enough to stand in for ffmpeg and auto-editor.
#[derive(Debug, Default)]
pub struct MockCommandExecutor {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failing: HashSet<String>,
    missing: HashSet<String>,
    stdout: Option<String>,
}

impl MockCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls whose program path ends with `program` exit non-zero.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Calls whose program path ends with `program` are not found.
    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// Return this text as stdout on success.
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = Some(stdout.to_string());
        self
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Get the number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn matches(set: &HashSet<String>, command: &str) -> bool {
        set.iter().any(|p| command.ends_with(p.as_str()))
    }
}

impl CommandExecutor for MockCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((
                command.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));
        }

        if Self::matches(&self.missing, command) {
            return Err(NarrateError::ToolNotFound {
                tool: command.to_string(),
            });
        }
        if Self::matches(&self.failing, command) {
            return Err(NarrateError::ExternalTool {
                message: format!("{command} failed with status Some(1): mock failure"),
            });
        }

        let input = args
            .iter()
            .position(|a| *a == "-i")
            .and_then(|i| args.get(i + 1))
            .or_else(|| args.first());
        if let (Some(input), Some(output)) = (input, args.last())
            && input != output
            && Path::new(input).is_file()
        {
            fs::copy(input, output)?;
        }

        Ok(self.stdout.clone().unwrap_or_default())
    }
}
