use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use crossbeam_channel::{Receiver, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use narrate::assembly::AssemblyPipeline;
use narrate::cli::{Cli, Commands, ConfigAction, devices_arg, layout_for, log_filter, resolve_chunk_args};
use narrate::config::Config;
use narrate::diagnostics::check_dependencies;
use narrate::generation::{GenerationEvent, Orchestrator, RunSummary};
use narrate::models::CommandModelFactory;
use narrate::session::{ArtifactLayout, GenerationStatus, JsonSessionStore, Session};
use narrate::tools::{SystemCommandExecutor, ToolSet};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose, cli.quiet)),
    )
    .init();

    match cli.command {
        Commands::Generate {
            session,
            runs,
            seed,
            devices,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let mut loaded = load_session(&session, &config)?;
            if let Some(runs) = runs {
                loaded.settings.runs = runs;
            }
            if let Some(seed) = config.run_seed(seed) {
                loaded.settings.master_seed = seed;
            }
            let devices = devices_arg(devices.as_deref()).unwrap_or_else(|| config.resolved_devices());
            let (layout, orchestrator, progress) =
                build_orchestrator(&config, &session, &loaded, devices, cli.quiet);

            let started = Instant::now();
            let result = orchestrator.run(&mut loaded);
            drop(orchestrator);
            join_progress(progress);
            let summaries = result?;

            for summary in &summaries {
                print_summary(summary, cli.quiet);
            }
            if !cli.quiet {
                println!(
                    "{} {} in {}",
                    "Session:".dimmed(),
                    layout.session_file().display(),
                    format_elapsed(started.elapsed())
                );
            }
        }
        Commands::Regenerate {
            session,
            chunks,
            marked,
            devices,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let mut loaded = load_session(&session, &config)?;
            if let Some(seed) = config.run_seed(None) {
                loaded.settings.master_seed = seed;
            }
            let devices = devices_arg(devices.as_deref()).unwrap_or_else(|| config.resolved_devices());
            let ids = resolve_chunk_args(&loaded, &chunks);
            let (_, orchestrator, progress) =
                build_orchestrator(&config, &session, &loaded, devices, cli.quiet);

            let started = Instant::now();
            let result = if marked || chunks.is_empty() {
                orchestrator.regenerate_marked(&mut loaded)
            } else {
                orchestrator.regenerate(&mut loaded, &ids)
            };
            drop(orchestrator);
            join_progress(progress);
            let summary = result?;

            print_summary(&summary, cli.quiet);
            if !cli.quiet {
                println!("{} {}", "Elapsed:".dimmed(), format_elapsed(started.elapsed()));
            }
        }
        Commands::Assemble {
            session,
            output,
            chapters,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let loaded = load_session(&session, &config)?;
            let layout = layout_for(&session, &loaded, &config.paths.output_root);
            let output = output.unwrap_or_else(|| default_output(&layout));
            let pipeline = AssemblyPipeline::new(layout, config.assembly.clone())
                .with_tools(ToolSet::detect(&config.tools));

            let reports = if chapters {
                pipeline.assemble_chapters(&loaded.chunks, &output)?
            } else {
                vec![pipeline.assemble(&loaded.chunks, &output)?]
            };

            if !cli.quiet {
                for report in &reports {
                    println!(
                        "{} {} ({:.1}s, {} chunk(s))",
                        "Wrote".green(),
                        report.output.display(),
                        report.duration_secs,
                        report.chunks_used
                    );
                    if !report.missing.is_empty() {
                        println!(
                            "  {} {} chunk(s) had no audio",
                            "Skipped:".yellow(),
                            report.missing.len()
                        );
                    }
                    for stage in &report.stages {
                        println!("  {}", stage.to_string().dimmed());
                    }
                }
            }
        }
        Commands::Status { session, all } => {
            let config = load_config(cli.config.as_deref())?;
            let loaded = load_session(&session, &config)?;
            print_status(&loaded, all);
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            check_dependencies(&config);
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "narrate",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/narrate/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Load a session; records without settings take the configured defaults.
fn load_session(path: &Path, config: &Config) -> Result<Session> {
    JsonSessionStore::load_path_with_defaults(path, &config.generation)
        .with_context(|| format!("cannot load session {}", path.display()))
}

/// Orchestrator wired to the command-line model backend, plus the progress
/// thread fed by its events.
fn build_orchestrator(
    config: &Config,
    session_file: &Path,
    session: &Session,
    devices: Vec<String>,
    quiet: bool,
) -> (ArtifactLayout, Orchestrator, Option<JoinHandle<()>>) {
    let layout = layout_for(session_file, session, &config.paths.output_root);
    let executor = Arc::new(SystemCommandExecutor::new());
    let factory = CommandModelFactory::new(&config.models, executor.clone())
        .with_scratch_dir(layout.session_dir().join("model_scratch"));
    let assembler = AssemblyPipeline::new(layout.clone(), config.assembly.clone())
        .with_tools(ToolSet::detect(&config.tools))
        .with_executor(executor);

    let mut orchestrator = Orchestrator::new(Arc::new(factory), layout.clone(), devices)
        .with_store(Arc::new(JsonSessionStore::new(layout.root())))
        .with_assembler(assembler);

    let progress = if quiet {
        None
    } else {
        let (tx, rx) = unbounded();
        orchestrator = orchestrator.with_events(tx);
        Some(spawn_progress(rx))
    };

    if !quiet {
        println!(
            "{} {} on {}",
            "Generating".green(),
            session.name,
            orchestrator.devices().join(", ")
        );
    }
    (layout, orchestrator, progress)
}

/// Drive a progress bar from orchestrator events until the sender is dropped.
fn spawn_progress(events: Receiver<GenerationEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut bar: Option<ProgressBar> = None;
        for event in events {
            match event {
                GenerationEvent::RunStarted {
                    run_index,
                    master_seed,
                    total,
                } => {
                    let pb = ProgressBar::new(total as u64);
                    pb.set_style(
                        // SAFETY: hardcoded template string, always valid
                        #[allow(clippy::expect_used)]
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
                            .expect("hardcoded progress bar template")
                            .progress_chars("#>-"),
                    );
                    pb.set_message(format!("run {} seed {master_seed}", run_index + 1));
                    bar = Some(pb);
                }
                GenerationEvent::ChunkUpdated {
                    sequence,
                    status,
                    similarity,
                    ..
                } => {
                    if let Some(pb) = &bar
                        && status == GenerationStatus::Failed
                    {
                        let score = similarity.map_or("-".to_string(), |s| format!("{s:.2}"));
                        pb.println(format!("  chunk {sequence} failed (similarity {score})"));
                    }
                }
                GenerationEvent::Progress { completed, .. } => {
                    if let Some(pb) = &bar {
                        pb.set_position(completed as u64);
                    }
                }
                GenerationEvent::RunFinished(_) => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                }
            }
        }
    })
}

fn join_progress(progress: Option<JoinHandle<()>>) {
    if let Some(handle) = progress
        && handle.join().is_err()
    {
        log::warn!("progress display thread panicked");
    }
}

fn print_summary(summary: &RunSummary, quiet: bool) {
    if quiet {
        return;
    }
    let headline = format!(
        "Run {} (seed {}): {}/{} done",
        summary.run_index + 1,
        summary.master_seed,
        summary.completed,
        summary.total
    );
    if summary.cancelled || summary.errors > 0 || summary.placeholders > 0 {
        println!("{}", headline.yellow());
    } else {
        println!("{}", headline.green());
    }
    println!(
        "  {} {}  {} {}  {} {}",
        "ok:".dimmed(),
        summary.succeeded,
        "placeholder:".dimmed(),
        summary.placeholders,
        "error:".dimmed(),
        summary.errors
    );
    if let Some(path) = &summary.assembled {
        println!("  {} {}", "Assembled:".dimmed(), path.display());
    }
}

fn print_status(session: &Session, all: bool) {
    let counts = session.status_counts();
    println!("{} {}", "Session:".dimmed(), session.name);
    println!(
        "  {} {}  {} {}  {} {}  {} {}",
        "generated:".dimmed(),
        counts.generated.green(),
        "failed:".dimmed(),
        counts.failed.red(),
        "pending:".dimmed(),
        counts.not_generated,
        "pauses:".dimmed(),
        counts.pauses
    );

    for chunk in session.ordered() {
        if chunk.is_pause() || (!all && !chunk.marked && chunk.status != GenerationStatus::Failed) {
            continue;
        }
        let status = match chunk.status {
            GenerationStatus::Generated => "generated".green().to_string(),
            GenerationStatus::Failed => "failed".red().to_string(),
            GenerationStatus::NotGenerated => "pending".to_string(),
        };
        let score = chunk
            .similarity
            .map_or("-".to_string(), |s| format!("{s:.2}"));
        let mark = if chunk.marked { "*" } else { " " };
        println!(
            "{mark}{:>5} {} {:<9} {:>5}  {}",
            chunk.sequence,
            chunk.id.short().dimmed(),
            status,
            score,
            preview(&chunk.text, 48)
        );
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

fn default_output(layout: &ArtifactLayout) -> PathBuf {
    layout
        .session_dir()
        .join(format!("{}.wav", layout.session_name()))
}

fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => match custom_path.map(Path::to_path_buf).or_else(Config::default_path) {
            Some(path) => println!("{}", path.display()),
            None => bail!("no configuration directory on this platform"),
        },
    }
    Ok(())
}
