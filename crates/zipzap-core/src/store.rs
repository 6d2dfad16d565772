//! Durable progress store
//!
//! The store owns the only copy of the run's task map. Every mutation goes
//! through one mutex and is followed by an atomic save: the document is
//! written to a temporary file beside the progress file, synced, and renamed
//! over it.

use crate::error::TaskError;
use crate::task::{ArchiveTask, EntryStatus, TaskState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Version of the progress file layout
pub const FORMAT_VERSION: u32 = 1;

/// Persisted progress document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    /// Incremented on every save
    pub revision: u64,
    pub saved_at: Option<DateTime<Utc>>,
    /// Directory the recorded scan covers
    pub root: Option<PathBuf>,
    /// Identity key → task
    pub tasks: BTreeMap<String, ArchiveTask>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            revision: 0,
            saved_at: None,
            root: None,
            tasks: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Number of tasks in `state`
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Tasks currently in `state`
    pub fn in_state(&self, state: TaskState) -> impl Iterator<Item = &ArchiveTask> {
        self.tasks.values().filter(move |t| t.state == state)
    }
}

/// Progress store backed by a JSON file
pub struct ProgressStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
    claims: Mutex<HashSet<String>>,
    recovered: Option<PathBuf>,
}

impl ProgressStore {
    /// Load the store at `path`; a missing file yields an empty store
    ///
    /// A file that cannot be parsed is moved aside to `<file>.corrupt` and the
    /// store starts empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut recovered = None;

        let snapshot = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            match parse(&contents) {
                Ok(snapshot) => {
                    debug!(path = ?path, tasks = snapshot.tasks.len(), revision = snapshot.revision, "Loaded progress file");
                    snapshot
                }
                Err(e) => {
                    let aside = corrupt_path(&path);
                    warn!(path = ?path, moved_to = ?aside, error = %e, "Progress file is unreadable, starting fresh");
                    fs::rename(&path, &aside)?;
                    recovered = Some(aside);
                    Snapshot::default()
                }
            }
        } else {
            Snapshot::default()
        };

        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
            claims: Mutex::new(HashSet::new()),
            recovered,
        })
    }

    /// Read a progress file without taking ownership of it
    ///
    /// Returns `None` when the file does not exist. Unlike [`open`](Self::open),
    /// an unreadable file is reported as [`Error::State`] and left in place.
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Option<Snapshot>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        parse(&contents).map(Some)
    }

    /// Location of the progress file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unreadable progress file was moved during `open`
    pub fn recovered_from(&self) -> Option<&Path> {
        self.recovered.as_deref()
    }

    /// Clone of the current snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<ArchiveTask> {
        self.lock().tasks.get(key).cloned()
    }

    /// Number of tracked tasks
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the scan root
    pub fn set_root(&self, root: &Path) -> Result<()> {
        let mut snapshot = self.lock();
        snapshot.root = Some(root.to_path_buf());
        self.save(&mut snapshot)
    }

    /// Insert or replace a task, dropping stale records for the same archive path
    ///
    /// Nested outputs recorded by a dropped record move to the new one, so they
    /// stay excluded from later scans.
    pub fn upsert(&self, mut task: ArchiveTask) -> Result<()> {
        let mut snapshot = self.lock();
        let key = task.key();
        let stale: Vec<String> = snapshot
            .tasks
            .iter()
            .filter(|(k, t)| **k != key && t.path == task.path)
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            debug!(key = %k, "Dropping superseded task record");
            if let Some(old) = snapshot.tasks.remove(&k) {
                merge_nested(&mut task.nested, old.nested);
            }
        }
        snapshot.tasks.insert(key, task);
        self.save(&mut snapshot)
    }

    /// Mutate one task and persist the result
    pub fn update<F>(&self, key: &str, f: F) -> Result<ArchiveTask>
    where
        F: FnOnce(&mut ArchiveTask),
    {
        let mut snapshot = self.lock();
        let task = snapshot
            .tasks
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("No task recorded for {}", key)))?;
        f(task);
        task.updated_at = Utc::now();
        let updated = task.clone();
        self.save(&mut snapshot)?;
        Ok(updated)
    }

    /// `Discovered`/`Failed`/`Extracting` → `Extracting`, counting the attempt
    pub fn begin_attempt(&self, key: &str) -> Result<ArchiveTask> {
        self.update(key, |task| {
            task.state = TaskState::Extracting;
            task.attempts += 1;
        })
    }

    /// Persist per-entry progress of an in-flight task
    pub fn record_entries(&self, key: &str, entries: &BTreeMap<String, EntryStatus>) -> Result<()> {
        self.update(key, |task| task.entries = entries.clone())
            .map(|_| ())
    }

    /// `Extracting` → `Completed`
    pub fn complete(&self, key: &str, nested: Vec<PathBuf>) -> Result<ArchiveTask> {
        self.update(key, |task| {
            task.state = TaskState::Completed;
            task.last_error = None;
            task.entries.clear();
            merge_nested(&mut task.nested, nested);
        })
    }

    /// `Extracting` → `Failed`, keeping entry statuses for a later resume
    pub fn fail(
        &self,
        key: &str,
        error: TaskError,
        entries: BTreeMap<String, EntryStatus>,
        nested: Vec<PathBuf>,
    ) -> Result<ArchiveTask> {
        self.update(key, |task| {
            task.state = TaskState::Failed;
            task.last_error = Some(error);
            task.entries = entries;
            merge_nested(&mut task.nested, nested);
        })
    }

    /// Forget one task so a later run starts it from scratch
    pub fn reset(&self, key: &str) -> Result<bool> {
        let mut snapshot = self.lock();
        let removed = snapshot.tasks.remove(key).is_some();
        if removed {
            self.save(&mut snapshot)?;
        }
        Ok(removed)
    }

    /// Forget every task and remove the progress file
    pub fn clear(&self) -> Result<()> {
        let mut snapshot = self.lock();
        snapshot.tasks.clear();
        snapshot.root = None;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        info!(path = ?self.path, "Cleared progress");
        Ok(())
    }

    /// Write the current snapshot
    pub fn flush(&self) -> Result<()> {
        let mut snapshot = self.lock();
        self.save(&mut snapshot)
    }

    /// Outputs recorded as nested archives by completed tasks
    pub fn nested_outputs(&self) -> HashSet<PathBuf> {
        self.lock()
            .tasks
            .values()
            .flat_map(|t| t.nested.iter().cloned())
            .collect()
    }

    /// Claim `key` for one worker; `None` while another worker holds it
    pub fn try_claim(&self, key: &str) -> Option<ClaimGuard<'_>> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if claims.insert(key.to_string()) {
            Some(ClaimGuard {
                store: self,
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, snapshot: &mut Snapshot) -> Result<()> {
        snapshot.revision += 1;
        snapshot.saved_at = Some(Utc::now());
        snapshot.format_version = FORMAT_VERSION;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let json = serde_json::to_vec_pretty(&*snapshot)?;
        let mut staged = NamedTempFile::new_in(&parent)?;
        staged.write_all(&json)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(path = ?self.path, revision = snapshot.revision, "Saved progress");
        Ok(())
    }
}

/// Exclusive in-process claim on a task identity, released on drop
pub struct ClaimGuard<'a> {
    store: &'a ProgressStore,
    key: String,
}

impl ClaimGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.store
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn parse(contents: &str) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_json::from_str(contents)?;
    if snapshot.format_version > FORMAT_VERSION {
        return Err(Error::State(format!(
            "unsupported progress format version {}",
            snapshot.format_version
        )));
    }
    Ok(snapshot)
}

fn merge_nested(into: &mut Vec<PathBuf>, from: Vec<PathBuf>) {
    for path in from {
        if !into.contains(&path) {
            into.push(path);
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}
