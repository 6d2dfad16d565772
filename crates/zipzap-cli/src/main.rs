//! zipzap - recursively extract every archive under a directory
//!
//! Thin command-line front end for `zipzap-core`:
//! - `run` scans a tree and extracts what has not been extracted yet
//! - `status` shows the recorded progress for a tree
//! - `clear` forgets recorded progress
//! - `config` shows or creates the user configuration file

use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use zipzap_core::{
    ArchiveFormat, ArchiveRootSelection, Config, ConflictPolicy, IdentityMode, ProgressStore,
    RunController, RunOutcome, Snapshot, Summary, TaskState,
};

mod logging;
mod progress;

use progress::ProgressObserver;

/// zipzap - extract every archive under a directory, resumably
///
/// Progress is recorded next to the scanned tree, so an interrupted run can
/// simply be started again.
#[derive(Parser)]
#[command(name = "zipzap")]
#[command(author, version, about = "Recursively extract archives in place, resuming where the last run stopped", long_about = None)]
struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Append log events to this file
    #[arg(long, global = true, value_name = "PATH", default_value = "zipzap.log")]
    log_file: PathBuf,

    /// Do not write a log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and extract every archive found
    Run(RunArgs),

    /// Show recorded progress for a directory
    Status {
        /// Directory that was scanned
        dir: PathBuf,

        /// Progress file (default: .zipzap-progress.json in DIR)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget recorded progress for a directory
    Clear {
        /// Directory that was scanned
        dir: PathBuf,

        /// Progress file (default: .zipzap-progress.json in DIR)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
    },

    /// Show or create the configuration file
    Config {
        /// Write the commented default configuration if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory to scan
    dir: PathBuf,

    /// Configuration file (default: the user configuration file)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Progress file (default: .zipzap-progress.json in DIR)
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Replace existing files that differ from the archive
    #[arg(long)]
    overwrite: bool,

    /// What to do with a differing existing file when not overwriting
    #[arg(long, value_enum, value_name = "POLICY")]
    on_conflict: Option<OnConflict>,

    /// Attempts per archive before giving up on it
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Also extract archives found in the extracted output (one extra pass)
    #[arg(long)]
    nested: bool,

    /// Extract each archive into a folder named after it
    #[arg(long)]
    subfolder: bool,

    /// Identify archives by content hash instead of size and modification time
    #[arg(long)]
    content_hash: bool,

    /// Archive formats to extract (zip, tar, tar.gz, tar.zst, tar.xz)
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    formats: Option<Vec<String>>,

    /// Glob pattern, relative to DIR, to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Per-archive timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Delete each archive after it is fully extracted
    #[arg(long)]
    remove_archives: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnConflict {
    Rename,
    Skip,
    Abort,
}

impl From<OnConflict> for ConflictPolicy {
    fn from(value: OnConflict) -> Self {
        match value {
            OnConflict::Rename => ConflictPolicy::Rename,
            OnConflict::Skip => ConflictPolicy::Skip,
            OnConflict::Abort => ConflictPolicy::Abort,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 3 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    if let Err(e) = logging::setup_logging(cli.verbose, cli.quiet, log_file) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    match run(cli.command) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            process::exit(map_error_to_exit_code(&e));
        }
    }
}

fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Run(args) => run_extraction(args),
        Commands::Status { dir, state, json } => {
            let state_path = state_path(&dir, state)?;
            let Some(snapshot) = ProgressStore::load_snapshot(&state_path)? else {
                if json {
                    println!("null");
                } else {
                    println!("No progress recorded for {}", dir.display());
                }
                return Ok(0);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
            Ok(0)
        }
        Commands::Clear { dir, state } => {
            let state_path = state_path(&dir, state)?;
            ProgressStore::open(&state_path)?.clear()?;
            println!("Cleared progress for {}", dir.display());
            Ok(0)
        }
        Commands::Config { init } => {
            if init {
                let path = Config::init_default()?;
                println!("{}", path.display());
                return Ok(0);
            }
            let path = Config::config_path()?;
            if path.exists() {
                println!("# {}", path.display());
                print!("{}", std::fs::read_to_string(&path)?);
            } else {
                println!("# {} (not created; defaults shown)", path.display());
                print!("{}", Config::default_config_content());
            }
            Ok(0)
        }
    }
}

fn run_extraction(args: RunArgs) -> Result<i32> {
    let config = build_config(&args)?;
    info!("Extracting archives under {:?}", args.dir);

    let observer = (args.progress && !args.json).then(|| Arc::new(ProgressObserver::new()));
    let controller = match &observer {
        Some(observer) => RunController::new().with_observer(observer.clone()),
        None => RunController::new(),
    };

    let summary = controller.run_once(&args.dir, &config);
    if let Some(observer) = &observer {
        observer.finish();
    }
    let summary = summary?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(match summary.outcome() {
        RunOutcome::AllCompleted => 0,
        RunOutcome::SomeFailed => 4,
        RunOutcome::Cancelled => 5,
    })
}

/// Configuration file values with command-line overrides applied
fn build_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(state) = &args.state {
        config.state_file = Some(state.clone());
    }
    if let Some(workers) = args.workers {
        config.max_parallel_workers = workers;
    }
    if args.overwrite {
        config.overwrite = true;
    }
    if let Some(policy) = args.on_conflict {
        config.on_conflict = policy.into();
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if args.nested {
        config.include_nested_archives = true;
    }
    if args.subfolder {
        config.archive_root = ArchiveRootSelection::NamedSubfolder;
    }
    if args.content_hash {
        config.identity = IdentityMode::ContentHash;
    }
    if let Some(names) = &args.formats {
        config.formats = names
            .iter()
            .map(|name| {
                ArchiveFormat::from_name(name.trim()).ok_or_else(|| {
                    zipzap_core::Error::Config(format!("Unknown archive format: {}", name))
                })
            })
            .collect::<zipzap_core::Result<Vec<_>>>()?;
    }
    config.exclude.extend(args.exclude.iter().cloned());
    if let Some(timeout) = args.timeout {
        config.extract_timeout_secs = Some(timeout);
    }
    if args.remove_archives {
        config.remove_after_extract = true;
    }

    config.validate()?;
    Ok(config)
}

fn state_path(dir: &Path, state: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(state) = state {
        return Ok(state);
    }
    Ok(Config::load_default()?.state_path(dir))
}

fn print_summary(summary: &Summary) {
    println!("Completed: {}", summary.completed);
    println!("Skipped:   {}", summary.skipped);
    println!("Failed:    {}", summary.failed.len());
    for failure in &summary.failed {
        println!(
            "  {}: {}: {} (attempts: {})",
            failure.path.display(),
            failure.kind,
            failure.reason,
            failure.attempts
        );
    }
    if !summary.warnings.is_empty() {
        println!("Warnings:  {}", summary.warnings.len());
        for warning in &summary.warnings {
            println!("  {}", warning);
        }
    }
    if summary.cancelled {
        println!("Cancelled: {} archives not started", summary.not_started);
    }
}

fn print_status(snapshot: &Snapshot) {
    if let Some(root) = &snapshot.root {
        println!("Root:      {}", root.display());
    }
    if let Some(saved_at) = snapshot.saved_at {
        println!(
            "Saved:     {} (revision {})",
            saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            snapshot.revision
        );
    }
    for state in [
        TaskState::Completed,
        TaskState::Extracting,
        TaskState::Discovered,
        TaskState::Failed,
    ] {
        println!("{:<10} {}", format!("{}:", state), snapshot.count(state));
    }
    for task in snapshot.in_state(TaskState::Failed) {
        if let Some(error) = &task.last_error {
            println!("  {}: {} (attempts: {})", task.path.display(), error, task.attempts);
        }
    }
    for task in snapshot.in_state(TaskState::Extracting) {
        println!(
            "  {}: in progress ({}/{} entries)",
            task.path.display(),
            task.extracted_entries(),
            task.entries.len()
        );
    }
}

/// Map errors to exit codes:
/// - 0: Success
/// - 1: General or configuration error
/// - 2: I/O error or missing input
/// - 3: Invalid arguments or paths
/// - 4: Some archives failed
/// - 5: Cancelled
fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(core_err) = err.downcast_ref::<zipzap_core::Error>() {
        match core_err {
            zipzap_core::Error::Io(_) | zipzap_core::Error::NotFound(_) => 2,
            zipzap_core::Error::InvalidPath(_)
            | zipzap_core::Error::PathTraversal(_)
            | zipzap_core::Error::UnsupportedFormat(_) => 3,
            zipzap_core::Error::CorruptArchive { .. }
            | zipzap_core::Error::CorruptEntry { .. }
            | zipzap_core::Error::ConflictUnresolved { .. }
            | zipzap_core::Error::Timeout(_) => 4,
            zipzap_core::Error::Config(_) | zipzap_core::Error::State(_) => 1,
        }
    } else if err.is::<std::io::Error>() {
        2
    } else {
        1
    }
}
