//! # parley-cli
//!
//! Binary entry point for Parley.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading and flag overrides
//! - Signal handling that turns Ctrl-C into a clean, resumable stop
//! - Progress display, quality reports and session listings

mod display;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use display::{ColorMode, ProgressView, print_report, print_session_list, print_termination};
use parley_adapters::{BackendConfigError, CliBackend, CliExecutor};
use parley_core::{
    ConfigError, ErrorKind, InputError, ParleyConfig, PromptBuilder, ResumeOverrides, SessionError,
    SessionManager, SessionTarget, StoreError, TranscriptStore, read_task_file, regenerate_report,
    validate_task,
};
use parley_proto::{Role, SessionStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILED: i32 = 1;
const EXIT_INPUT: i32 = 2;
const EXIT_STORAGE: i32 = 3;
const EXIT_INVARIANT: i32 = 70;
const EXIT_INTERRUPTED: i32 = 130;

/// Parley - bounded, resumable two-agent design debates
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "parley.yml", global = true)]
    config: PathBuf,

    /// Directory holding session transcripts (overrides output.dir)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new debate
    Run(RunArgs),

    /// Continue an interrupted debate from its next round
    Resume(ResumeArgs),

    /// Regenerate and print the quality report of a finished debate
    Report(ReportArgs),

    /// List stored sessions
    List,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// What to design
    #[arg(conflicts_with = "task_file")]
    task: Option<String>,

    /// Read the task description from a file
    #[arg(short = 'f', long, conflicts_with = "task")]
    task_file: Option<PathBuf>,

    /// Maximum number of rounds (1-30)
    #[arg(short = 'r', long)]
    max_rounds: Option<u32>,

    /// Seconds allowed per agent call (1-3600)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Retries per agent call after the first attempt (0-5)
    #[arg(long)]
    retries: Option<u32>,

    /// Model passed to the agent CLI
    #[arg(short, long)]
    model: Option<String>,

    /// Backend: auto, claude, gemini, codex, or custom
    #[arg(short, long)]
    backend: Option<String>,

    /// Show the resolved configuration and first prompt without calling an agent
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct ResumeArgs {
    /// Session id, or "latest"
    #[arg(default_value = "latest")]
    target: String,

    /// Raise the round limit
    #[arg(short = 'r', long)]
    max_rounds: Option<u32>,

    /// Seconds allowed per agent call
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Model passed to the agent CLI
    #[arg(short, long)]
    model: Option<String>,
}

/// Output format for the report command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum ReportFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// The markdown report as stored in the session
    Markdown,
    /// JSON for programmatic access
    Json,
}

#[derive(Parser, Debug)]
struct ReportArgs {
    /// Session id, or "latest"
    #[arg(default_value = "latest")]
    target: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(hint) = err.downcast_ref::<SessionError>().and_then(SessionError::hint) {
                eprintln!("Hint: {hint}");
            }
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

/// Default log filter. `--verbose` and `verbose: true` in the config file
/// both select debug output.
fn default_log_level(cli_verbose: bool, config: &ParleyConfig) -> &'static str {
    if cli_verbose || config.verbose { "debug" } else { "warn" }
}

/// Logs go to stderr. `RUST_LOG` wins over the default level.
fn init_logging(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let use_colors = cli.color.should_use_colors();
    let mut config = load_config(&cli.config)?;
    init_logging(default_log_level(cli.verbose, &config));
    if !cli.config.exists() {
        debug!(path = %cli.config.display(), "Config file not found, using defaults");
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.to_string_lossy().into_owned();
    }

    match cli.command {
        Commands::Run(args) => run_command(config, use_colors, args).await,
        Commands::Resume(args) => resume_command(config, use_colors, args).await,
        Commands::Report(args) => report_command(&config, use_colors, &args),
        Commands::List => list_command(&config, use_colors),
    }
}

fn load_config(path: &Path) -> Result<ParleyConfig> {
    if path.exists() {
        ParleyConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        Ok(ParleyConfig::default())
    }
}

async fn run_command(mut config: ParleyConfig, use_colors: bool, args: RunArgs) -> Result<i32> {
    if let Some(max_rounds) = args.max_rounds {
        config.debate.max_rounds = max_rounds;
    }
    if let Some(timeout) = args.timeout {
        config.debate.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        config.debate.max_retries = retries;
    }
    if args.model.is_some() {
        config.debate.model = args.model;
    }
    if let Some(backend) = args.backend {
        config.cli.backend = backend;
    }

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }

    let task = match (args.task, args.task_file) {
        (Some(task), _) => task,
        (None, Some(path)) => read_task_file(&path)?,
        (None, None) => {
            return Err(anyhow::Error::new(InputError::EmptyTask)
                .context("No task given. Pass the task text or --task-file PATH"));
        }
    };

    if args.dry_run {
        print_dry_run(&config, &task)?;
        return Ok(0);
    }

    let backend = CliBackend::from_config(&config.cli)?;
    info!(backend = %backend.name, command = %backend.command, "Using backend");

    let mut session_config = config.session_config();
    session_config.backend = backend.name.clone();

    let store = TranscriptStore::new(&session_config.output_dir);
    let interrupted = install_signal_handlers();
    let executor = Arc::new(CliExecutor::new(backend));
    let mut manager = SessionManager::new(store, executor, interrupted).with_quality(config.quality);

    let progress = ProgressView::new(use_colors);
    let view = progress.clone();
    manager.set_observer(move |event| view.on_event(event));
    let progress = scopeguard::guard(progress, |p| p.finish());

    println!("Debating: {}", task.trim());
    let outcome = manager.start(&task, session_config).await?;

    progress.finish();
    print_termination(&outcome, progress.elapsed(), use_colors);
    Ok(exit_code_for_status(outcome.status))
}

async fn resume_command(config: ParleyConfig, use_colors: bool, args: ResumeArgs) -> Result<i32> {
    let store = TranscriptStore::new(&config.output.dir);
    let id = SessionTarget::parse(&args.target).resolve(&store)?;
    let meta = store.read_meta(&id).map_err(SessionError::from)?;

    // The session keeps the backend it started with; the file only supplies
    // custom command details.
    let mut cli_config = config.cli.clone();
    cli_config.backend = meta.config.backend.clone();
    let backend = CliBackend::from_config(&cli_config)?;
    info!(session_id = %id, backend = %backend.name, "Resuming with backend");

    let interrupted = install_signal_handlers();
    let executor = Arc::new(CliExecutor::new(backend));
    let mut manager = SessionManager::new(store, executor, interrupted).with_quality(config.quality);

    let progress = ProgressView::new(use_colors);
    let view = progress.clone();
    manager.set_observer(move |event| view.on_event(event));
    let progress = scopeguard::guard(progress, |p| p.finish());

    println!(
        "Resuming {id} after round {} of {}",
        meta.round_count,
        args.max_rounds.unwrap_or(meta.config.max_rounds)
    );
    let overrides = ResumeOverrides {
        max_rounds: args.max_rounds,
        timeout_secs: args.timeout,
        model: args.model,
    };
    let outcome = manager.resume(&SessionTarget::Id(id), &overrides).await?;

    progress.finish();
    print_termination(&outcome, progress.elapsed(), use_colors);
    Ok(exit_code_for_status(outcome.status))
}

fn report_command(config: &ParleyConfig, use_colors: bool, args: &ReportArgs) -> Result<i32> {
    let store = TranscriptStore::new(&config.output.dir);
    let report = regenerate_report(&store, &SessionTarget::parse(&args.target), config.quality)?;

    match args.format {
        ReportFormat::Text => print_report(&report, use_colors),
        ReportFormat::Markdown => print!("{}", report.to_markdown()),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(0)
}

fn list_command(config: &ParleyConfig, use_colors: bool) -> Result<i32> {
    let store = TranscriptStore::new(&config.output.dir);
    let handles = store.list().map_err(SessionError::from)?;

    let mut sessions = Vec::with_capacity(handles.len());
    for handle in handles {
        match store.read_meta(&handle.id) {
            Ok(meta) => sessions.push(meta),
            Err(e) => warn!(session_id = %handle.id, error = %e, "Skipping unreadable session"),
        }
    }
    print_session_list(&sessions, use_colors);
    Ok(0)
}

fn print_dry_run(config: &ParleyConfig, task: &str) -> Result<()> {
    for warning in validate_task(task)? {
        eprintln!("Warning [task]: {warning}");
    }
    let session = config.session_config();

    println!("Dry run mode - configuration:");
    println!("  Backend: {}", config.cli.backend);
    if let Some(command) = &config.cli.command {
        println!("  Command: {command} {}", config.cli.args.join(" "));
    }
    println!("  Model: {}", session.model.as_deref().unwrap_or("(backend default)"));
    println!("  Max rounds: {}", session.max_rounds);
    println!("  Timeout: {}s per call", session.timeout_secs);
    println!("  Retries: {}", session.max_retries);
    println!("  Output dir: {}", session.output_dir.display());
    println!();
    println!("First {} prompt:", Role::Architect.label());
    println!("{}", PromptBuilder::new(task.trim()).build(Role::Architect, &[], None));
    Ok(())
}

/// Sets the interrupt flag on the first Ctrl-C or SIGTERM. A second Ctrl-C
/// exits immediately.
fn install_signal_handlers() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));

    let interrupted_sigint = Arc::clone(&interrupted);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupted_sigint.swap(true, Ordering::SeqCst) {
                eprintln!("\nForced exit. Rounds saved so far are kept.");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("\nInterrupt received, stopping after the current agent call (Ctrl-C again to force)");
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let interrupted_sigterm = Arc::clone(&interrupted);
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::spawn(async move {
                    sigterm.recv().await;
                    warn!("SIGTERM received, stopping after the current agent call");
                    interrupted_sigterm.store(true, Ordering::SeqCst);
                });
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    interrupted
}

fn exit_code_for_status(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Converged | SessionStatus::Exhausted => 0,
        SessionStatus::Interrupted => EXIT_INTERRUPTED,
        SessionStatus::Failed | SessionStatus::Running => EXIT_FAILED,
    }
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<SessionError>() {
        return match e.kind() {
            ErrorKind::Input => EXIT_INPUT,
            ErrorKind::Storage => EXIT_STORAGE,
            ErrorKind::Invariant => EXIT_INVARIANT,
        };
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return match e {
            StoreError::Invariant(_) => EXIT_INVARIANT,
            _ => EXIT_STORAGE,
        };
    }
    if err.downcast_ref::<InputError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<BackendConfigError>().is_some()
    {
        return EXIT_INPUT;
    }
    EXIT_FAILED
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::InvariantViolation;

    #[test]
    fn test_cli_parses_run_with_overrides() {
        let cli = Cli::parse_from([
            "parley",
            "run",
            "Design a cache for the catalog service",
            "--max-rounds",
            "4",
            "--model",
            "opus",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task.as_deref(), Some("Design a cache for the catalog service"));
                assert_eq!(args.max_rounds, Some(4));
                assert_eq!(args.model.as_deref(), Some("opus"));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_resume_defaults_to_latest() {
        let cli = Cli::parse_from(["parley", "resume"]);
        match cli.command {
            Commands::Resume(args) => assert_eq!(args.target, "latest"),
            other => panic!("expected resume, got {other:?}"),
        }
    }

    #[test]
    fn test_task_and_task_file_conflict() {
        let result = Cli::try_parse_from(["parley", "run", "inline task text", "--task-file", "t.md"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbose_from_flag_or_config_file() {
        let quiet = ParleyConfig::default();
        assert_eq!(default_log_level(false, &quiet), "warn");
        assert_eq!(default_log_level(true, &quiet), "debug");

        let verbose = ParleyConfig::parse_yaml("verbose: true\n").unwrap();
        assert_eq!(default_log_level(false, &verbose), "debug");
    }

    #[test]
    fn test_exit_codes_for_statuses() {
        assert_eq!(exit_code_for_status(SessionStatus::Converged), 0);
        assert_eq!(exit_code_for_status(SessionStatus::Exhausted), 0);
        assert_eq!(exit_code_for_status(SessionStatus::Failed), 1);
        assert_eq!(exit_code_for_status(SessionStatus::Interrupted), 130);
    }

    #[test]
    fn test_exit_codes_for_errors() {
        let input = anyhow::Error::new(SessionError::from(InputError::EmptyTask));
        assert_eq!(exit_code_for_error(&input), EXIT_INPUT);

        let storage = anyhow::Error::new(SessionError::from(StoreError::NotFound("x".into())));
        assert_eq!(exit_code_for_error(&storage), EXIT_STORAGE);

        let invariant = anyhow::Error::new(SessionError::from(StoreError::Invariant(
            InvariantViolation::DoubleFinalize { id: "x".into() },
        )));
        assert_eq!(exit_code_for_error(&invariant), EXIT_INVARIANT);

        let config = anyhow::Error::new(ConfigError::MissingCommand).context("Configuration validation failed");
        assert_eq!(exit_code_for_error(&config), EXIT_INPUT);

        assert_eq!(exit_code_for_error(&anyhow::anyhow!("boom")), EXIT_FAILED);
    }
}
