//! Archive task model

use crate::archive::ArchiveFormat;
use crate::config::ArchiveRootSelection;
use crate::error::TaskError;
use crate::identity::ArchiveIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle state of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Discovered,
    Extracting,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Discovered => "discovered",
            TaskState::Extracting => "extracting",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Per-entry progress within an archive being extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Written, or already present with identical content
    Extracted,
    /// Not yet written
    Pending,
    /// Left unwritten because of an unresolved conflict
    Conflicted,
}

/// One discovered archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveTask {
    pub identity: ArchiveIdentity,
    /// Absolute path to the archive
    pub path: PathBuf,
    pub format: ArchiveFormat,
    /// Directory the entries are extracted into
    pub destination_dir: PathBuf,
    pub state: TaskState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<TaskError>,
    /// Entry name → status, kept while an archive is partially extracted
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, EntryStatus>,
    /// Extracted outputs that are themselves archives
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl ArchiveTask {
    /// A freshly discovered task
    pub fn new(identity: ArchiveIdentity, format: ArchiveFormat, root: ArchiveRootSelection) -> Self {
        let path = identity.path.clone();
        let destination_dir = destination_for(&path, root);
        Self {
            identity,
            path,
            format,
            destination_dir,
            state: TaskState::Discovered,
            attempts: 0,
            last_error: None,
            entries: BTreeMap::new(),
            nested: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Store key
    pub fn key(&self) -> String {
        self.identity.key()
    }

    /// Whether a failed task may be attempted again
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        match self.state {
            TaskState::Failed => {
                self.attempts < max_attempts
                    && self.last_error.as_ref().map_or(true, |e| e.kind.is_retryable())
            }
            _ => false,
        }
    }

    /// Entries already written by an earlier attempt
    pub fn extracted_entries(&self) -> usize {
        self.entries
            .values()
            .filter(|s| **s == EntryStatus::Extracted)
            .count()
    }
}

/// Extraction target for the archive at `path`
pub fn destination_for(path: &Path, root: ArchiveRootSelection) -> PathBuf {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    match root {
        ArchiveRootSelection::SameDir => parent,
        ArchiveRootSelection::NamedSubfolder => parent.join(ArchiveFormat::stem(path)),
    }
}
