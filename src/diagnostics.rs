//! System diagnostics and dependency checking.
//!
//! Verifies that the optional post-processing tools are installed and report
//! a version.

use crate::config::Config;
use crate::defaults;
use crate::tools::ToolSet;
use std::path::Path;
use std::process::Command;

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Tool is installed and working
    Ok,
    /// Tool is not found
    NotFound,
    /// Tool is found but has issues
    Warning(String),
}

/// Check if a command exists and is executable.
pub fn check_command(command: &Path) -> CheckResult {
    match Command::new(command).arg("--version").output() {
        Ok(output) if output.status.success() => CheckResult::Ok,
        Ok(_) => CheckResult::Warning(format!(
            "'{}' found but --version failed",
            command.display()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(format!("Error checking '{}': {}", command.display(), e)),
    }
}

fn check_tool(path: Option<&Path>) -> CheckResult {
    match path {
        Some(p) => check_command(p),
        None => CheckResult::NotFound,
    }
}

/// Run all dependency checks and print results.
pub fn check_dependencies(config: &Config) {
    println!("Checking system dependencies...\n");
    let tools = ToolSet::detect(&config.tools);

    print!("{} (loudness normalization, final encoding): ", defaults::FFMPEG);
    match check_tool(tools.ffmpeg.as_deref()) {
        CheckResult::Ok => println!("✓ OK"),
        CheckResult::NotFound => {
            println!("✗ NOT FOUND");
            println!("  Install: sudo apt install ffmpeg  (Debian/Ubuntu)");
            println!("           sudo pacman -S ffmpeg    (Arch)");
        }
        CheckResult::Warning(msg) => println!("⚠ WARNING: {}", msg),
    }

    print!("{} (silence trimming): ", defaults::AUTO_EDITOR);
    match check_tool(tools.auto_editor.as_deref()) {
        CheckResult::Ok => println!("✓ OK"),
        CheckResult::NotFound => {
            println!("✗ NOT FOUND");
            println!("  Install: pip install auto-editor");
        }
        CheckResult::Warning(msg) => println!("⚠ WARNING: {}", msg),
    }

    println!();
    println!("Model backend:");
    let generate = &config.models.generate_command;
    let transcribe = &config.models.transcribe_command;
    if generate.is_empty() {
        println!("  generate_command: - not configured");
    } else {
        println!("  generate_command: {}", generate.join(" "));
    }
    if transcribe.is_empty() {
        println!("  transcribe_command: - not configured (validation needs it)");
    } else {
        println!("  transcribe_command: {}", transcribe.join(" "));
    }

    println!();
    println!("Devices: {}", config.resolved_devices().join(", "));
    if tools.ffmpeg.is_none() || tools.auto_editor.is_none() {
        println!("⚠ Missing tools only disable their post-processing stage; assembly still works.");
    }
}
