//! ZipZap - resumable recursive archive extraction
//!
//! This library scans a directory tree for archives and extracts each one in
//! place, recording progress in a durable store so an interrupted run can be
//! resumed without redoing completed work.

pub mod archive;
pub mod config;
pub mod conflict;
pub mod controller;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod scanner;
pub mod security;
pub mod store;
pub mod task;
pub mod utils;

pub use error::{Error, Result};

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveFormat, ArchiveReader};
pub use config::{ArchiveRootSelection, CompareMode, Config, ConflictPolicy, IdentityMode};
pub use conflict::{ConflictResolver, Decision};
pub use controller::{CancelHandle, FailureReport, RunController, RunObserver, RunOutcome, Summary};
pub use error::{FailureKind, ScanWarning, TaskError, WarningKind};
pub use identity::ArchiveIdentity;
pub use orchestrator::{Orchestrator, TaskOutcome};
pub use scanner::{ScanItem, Scanner};
pub use store::{ProgressStore, Snapshot};
pub use task::{ArchiveTask, EntryStatus, TaskState};
