//! Run controller: one scan-and-extract pass over a directory tree

use crate::config::Config;
use crate::error::{FailureKind, ScanWarning, WarningKind};
use crate::orchestrator::{Orchestrator, TaskOutcome};
use crate::scanner::{ScanItem, Scanner};
use crate::store::{ProgressStore, Snapshot};
use crate::task::ArchiveTask;
use crate::{Error, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Callbacks for live progress display
///
/// Methods are called from worker threads.
pub trait RunObserver: Send + Sync {
    fn scan_warning(&self, _warning: &ScanWarning) {}

    /// The scan finished with `candidates` archives to process
    fn scan_finished(&self, _candidates: usize) {}

    fn task_started(&self, _task: &ArchiveTask) {}

    fn task_finished(&self, _outcome: &TaskOutcome) {}
}

/// A failed archive in the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    AllCompleted,
    SomeFailed,
    Cancelled,
}

/// Aggregated result of [`RunController::run_once`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub completed: usize,
    pub failed: Vec<FailureReport>,
    pub skipped: usize,
    pub warnings: Vec<ScanWarning>,
    pub cancelled: bool,
    /// Candidates left untouched because the run was cancelled
    pub not_started: usize,
}

impl Summary {
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if !self.failed.is_empty() {
            RunOutcome::SomeFailed
        } else {
            RunOutcome::AllCompleted
        }
    }

    fn record_failure(&mut self, task: &ArchiveTask) {
        let (kind, reason) = match &task.last_error {
            Some(e) => (e.kind, e.message.clone()),
            None => (FailureKind::Io, "unknown error".to_string()),
        };
        self.failed.push(FailureReport {
            path: task.path.clone(),
            kind,
            reason,
            attempts: task.attempts,
        });
    }
}

/// Cloneable cancellation trigger for a [`RunController`]
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Stop starting new archives; in-flight ones finish
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Drives scanner and orchestrator for a whole tree
pub struct RunController {
    cancelled: Arc<AtomicBool>,
    store: Mutex<Option<Arc<ProgressStore>>>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            store: Mutex::new(None),
            observer: None,
        }
    }

    /// Register a progress observer
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Request cooperative cancellation of the current run
    ///
    /// A request made while no run is active applies to the next run, which
    /// then starts no archives. The flag is cleared when a run ends.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Snapshot of the progress store of the current or last run
    pub fn status(&self) -> Option<Snapshot> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|store| store.snapshot())
    }

    /// Scan `root` and extract every archive found
    ///
    /// Archive failures are reported in the summary; an `Err` means the run
    /// could not start or its progress could not be saved.
    pub fn run_once(&self, root: &Path, config: &Config) -> Result<Summary> {
        let result = self.run(root, config);
        self.cancelled.store(false, Ordering::SeqCst);
        result
    }

    fn run(&self, root: &Path, config: &Config) -> Result<Summary> {
        config.validate()?;
        let root = resolve_root(root)?;
        let started = Instant::now();

        let store = Arc::new(ProgressStore::open(config.state_path(&root))?);
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&store));

        let mut summary = Summary::default();
        if let Some(aside) = store.recovered_from() {
            self.warn(
                &mut summary,
                ScanWarning {
                    path: Some(store.path().to_path_buf()),
                    kind: WarningKind::Unreadable,
                    message: format!("progress file was unreadable and moved to {:?}", aside),
                },
            );
        }
        store.set_root(&root)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .thread_name(|i| format!("zipzap-worker-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("Failed to start worker pool: {}", e)))?;

        info!(root = ?root, workers = config.worker_count(), "Starting run");

        let scanner = Scanner::new(&root, config, &store)?;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for item in scanner.scan() {
            if self.is_cancelled() {
                break;
            }
            match item {
                ScanItem::Warning(warning) => self.warn(&mut summary, warning),
                ScanItem::Candidate(task) => {
                    if seen.insert(task.key()) {
                        candidates.push(task);
                    }
                }
            }
        }
        debug!(candidates = candidates.len(), "Scan finished");
        if let Some(observer) = &self.observer {
            observer.scan_finished(candidates.len());
        }

        let orchestrator = Orchestrator::new(&store, config);
        let nested = self.run_pass(&pool, &orchestrator, candidates, &mut summary);

        if config.include_nested_archives && !self.is_cancelled() && !nested.is_empty() {
            info!(count = nested.len(), "Extracting nested archives");
            let nested_tasks: Vec<ArchiveTask> = nested
                .iter()
                .filter_map(|path| match scanner.classify(path) {
                    Some(ScanItem::Candidate(task)) if seen.insert(task.key()) => Some(task),
                    Some(ScanItem::Warning(warning)) => {
                        self.warn(&mut summary, warning);
                        None
                    }
                    _ => None,
                })
                .collect();
            self.run_pass(&pool, &orchestrator, nested_tasks, &mut summary);
        }

        summary.cancelled = self.is_cancelled();
        store.flush()?;

        info!(
            completed = summary.completed,
            failed = summary.failed.len(),
            skipped = summary.skipped,
            warnings = summary.warnings.len(),
            cancelled = summary.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
        Ok(summary)
    }

    /// Process `tasks` on the pool, re-queuing retryable failures until none are left
    ///
    /// Returns the nested archive outputs of the tasks completed in this pass.
    fn run_pass(
        &self,
        pool: &ThreadPool,
        orchestrator: &Orchestrator<'_>,
        tasks: Vec<ArchiveTask>,
        summary: &mut Summary,
    ) -> Vec<PathBuf> {
        let mut queue = tasks;
        let mut nested = Vec::new();

        while !queue.is_empty() {
            let outcomes: Vec<Option<TaskOutcome>> = pool.install(|| {
                queue
                    .into_par_iter()
                    .map(|task| {
                        if self.is_cancelled() {
                            return None;
                        }
                        if let Some(observer) = &self.observer {
                            observer.task_started(&task);
                        }
                        let outcome = orchestrator.process(task);
                        if let Some(observer) = &self.observer {
                            observer.task_finished(&outcome);
                        }
                        Some(outcome)
                    })
                    .collect()
            });

            let mut retries = Vec::new();
            for outcome in outcomes {
                match outcome {
                    None => summary.not_started += 1,
                    Some(TaskOutcome::Completed(task)) => {
                        summary.completed += 1;
                        nested.extend(task.nested);
                    }
                    Some(TaskOutcome::Skipped(_)) => summary.skipped += 1,
                    Some(TaskOutcome::Failed(task)) => summary.record_failure(&task),
                    Some(TaskOutcome::Retry(task)) => {
                        if self.is_cancelled() {
                            summary.record_failure(&task);
                        } else {
                            retries.push(task);
                        }
                    }
                }
            }
            if !retries.is_empty() {
                debug!(count = retries.len(), "Retrying failed archives");
            }
            queue = retries;
        }

        nested
    }

    fn warn(&self, summary: &mut Summary, warning: ScanWarning) {
        if let Some(observer) = &self.observer {
            observer.scan_warning(&warning);
        }
        summary.warnings.push(warning);
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("Directory not found: {:?}", root)),
        _ => Error::Io(e),
    })?;
    if !canonical.is_dir() {
        warn!(path = ?root, "Scan root is not a directory");
        return Err(Error::InvalidPath(format!("{:?} is not a directory", root)));
    }
    Ok(canonical)
}
