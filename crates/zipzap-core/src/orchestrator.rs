//! Per-archive extraction state machine
//!
//! A task moves `Discovered → Extracting → Completed | Failed`. The move to
//! `Extracting` is persisted before the first byte is written, so an
//! interrupted run leaves the task visibly in flight and the next run resumes
//! it. Errors never leave this module; they end up on the task record.

use crate::archive::{self, ArchiveEntry, ArchiveFormat, ArchiveReader, Deadline, EntryKind, WriteOptions};
use crate::config::Config;
use crate::conflict::{ConflictResolver, Decision};
use crate::error::{FailureKind, TaskError};
use crate::security::sanitize_path;
use crate::store::ProgressStore;
use crate::task::{ArchiveTask, EntryStatus, TaskState};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Entry statuses are saved after this many processed entries
const ENTRY_SAVE_INTERVAL: usize = 10;

/// How often a target that keeps appearing during staging is re-resolved
const MAX_STAGING_RACES: usize = 3;

/// Result of processing one task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(ArchiveTask),
    /// Failed for good in this run
    Failed(ArchiveTask),
    /// Failed with attempts left; queue it again after the current pass
    Retry(ArchiveTask),
    /// Already complete, or being handled by another worker
    Skipped(ArchiveTask),
}

impl TaskOutcome {
    pub fn task(&self) -> &ArchiveTask {
        match self {
            TaskOutcome::Completed(t)
            | TaskOutcome::Failed(t)
            | TaskOutcome::Retry(t)
            | TaskOutcome::Skipped(t) => t,
        }
    }

    pub fn into_task(self) -> ArchiveTask {
        match self {
            TaskOutcome::Completed(t)
            | TaskOutcome::Failed(t)
            | TaskOutcome::Retry(t)
            | TaskOutcome::Skipped(t) => t,
        }
    }
}

/// What one entry write ended in
enum EntryResult {
    Written(PathBuf),
    /// Nothing written; carries the path of an identical copy if one exists
    Kept(Option<PathBuf>),
    Conflicted(PathBuf),
}

/// Progress of one attempt, kept even when the attempt aborts
#[derive(Default)]
struct Attempt {
    entries: BTreeMap<String, EntryStatus>,
    nested: Vec<PathBuf>,
    /// Entry statuses go to the store
    tracked: bool,
}

/// Drives archive tasks through their states
pub struct Orchestrator<'a> {
    store: &'a ProgressStore,
    config: &'a Config,
    resolver: ConflictResolver,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a ProgressStore, config: &'a Config) -> Self {
        Self {
            store,
            config,
            resolver: ConflictResolver::from_config(config),
        }
    }

    /// Process one scanned task
    pub fn process(&self, task: ArchiveTask) -> TaskOutcome {
        let fallback = task.clone();
        match self.drive(task) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(archive = ?fallback.path, error = %e, "Could not record progress");
                let mut task = fallback;
                task.state = TaskState::Failed;
                task.last_error = Some(TaskError::from(&e));
                TaskOutcome::Failed(task)
            }
        }
    }

    fn drive(&self, task: ArchiveTask) -> Result<TaskOutcome> {
        if task.state == TaskState::Skipped {
            debug!(archive = ?task.path, "Already extracted");
            return Ok(TaskOutcome::Skipped(task));
        }

        let key = task.key();
        let Some(_claim) = self.store.try_claim(&key) else {
            debug!(archive = ?task.path, "Archive is being handled by another worker");
            return Ok(TaskOutcome::Skipped(task));
        };

        match task.state {
            TaskState::Failed if !task.can_retry(self.config.max_attempts) => {
                debug!(archive = ?task.path, attempts = task.attempts, "Not retrying failed archive");
                return Ok(TaskOutcome::Failed(task));
            }
            TaskState::Extracting if task.attempts >= self.config.max_attempts => {
                warn!(archive = ?task.path, attempts = task.attempts, "Interrupted on its last attempt");
                let error = TaskError {
                    kind: FailureKind::Io,
                    message: format!("interrupted after {} attempts", task.attempts),
                };
                let entries = task.entries.clone();
                let failed = self.store.fail(&key, error, entries, Vec::new())?;
                return Ok(TaskOutcome::Failed(failed));
            }
            TaskState::Discovered => self.store.upsert(task)?,
            _ => {
                if self.store.get(&key).is_none() {
                    self.store.upsert(task)?;
                }
            }
        }

        let task = self.store.begin_attempt(&key)?;
        info!(archive = ?task.path, attempt = task.attempts, dest = ?task.destination_dir, "Extracting");

        let mut attempt = Attempt::default();
        match self.extract(&task, &mut attempt) {
            Ok(()) => {
                let done = self.store.complete(&key, attempt.nested)?;
                info!(archive = ?done.path, "Extraction completed");
                if self.config.remove_after_extract {
                    self.remove_archive(&done.path);
                }
                Ok(TaskOutcome::Completed(done))
            }
            Err(e) => {
                let entries = if attempt.tracked {
                    attempt.entries
                } else {
                    BTreeMap::new()
                };
                let failed = self.store.fail(&key, TaskError::from(&e), entries, attempt.nested)?;
                if failed.can_retry(self.config.max_attempts) {
                    warn!(archive = ?failed.path, attempt = failed.attempts, error = %e, "Extraction failed, will retry");
                    Ok(TaskOutcome::Retry(failed))
                } else {
                    error!(archive = ?failed.path, attempt = failed.attempts, error = %e, "Extraction failed");
                    Ok(TaskOutcome::Failed(failed))
                }
            }
        }
    }

    /// Extract every entry of `task`, recording statuses in `attempt`
    fn extract(&self, task: &ArchiveTask, attempt: &mut Attempt) -> Result<()> {
        let deadline = self.config.extract_timeout().map(Deadline::after);
        let mut reader = archive::open(&task.path, task.format)?;
        let entries = reader.entries().to_vec();
        debug!(
            archive = ?reader.path(),
            format = reader.format().name(),
            entries = entries.len(),
            "Archive opened"
        );

        // Every name is checked before anything is written
        let targets = entries
            .iter()
            .map(|entry| self.target_for(task, entry))
            .collect::<Result<Vec<_>>>()?;

        attempt.tracked =
            entries.len() >= self.config.entry_tracking_threshold || !task.entries.is_empty();
        attempt.entries = task.entries.clone();
        for entry in &entries {
            attempt
                .entries
                .entry(entry.name.clone())
                .or_insert(EntryStatus::Pending);
        }

        fs::create_dir_all(&task.destination_dir)?;

        let mut io_error: Option<Error> = None;
        let mut conflict: Option<Error> = None;

        for (processed, (entry, target)) in entries.iter().zip(&targets).enumerate() {
            if let Some(deadline) = &deadline {
                deadline.check()?;
            }

            if attempt.entries.get(&entry.name) == Some(&EntryStatus::Extracted) {
                debug!(entry = %entry.name, "Extracted by an earlier attempt");
                continue;
            }

            let status = match self.extract_one(reader.as_mut(), entry, target, deadline) {
                Ok(EntryResult::Written(path)) | Ok(EntryResult::Kept(Some(path))) => {
                    if self.is_archive(&path) {
                        attempt.nested.push(path);
                    }
                    EntryStatus::Extracted
                }
                Ok(EntryResult::Kept(None)) => EntryStatus::Extracted,
                Ok(EntryResult::Conflicted(path)) => {
                    warn!(entry = %entry.name, path = ?path, "Existing output left in place");
                    conflict.get_or_insert(Error::ConflictUnresolved {
                        path,
                        reason: "output exists and differs; on_conflict is abort".to_string(),
                    });
                    EntryStatus::Conflicted
                }
                Err(Error::Io(e)) => {
                    warn!(entry = %entry.name, error = %e, "Failed to write entry");
                    attempt.tracked = true;
                    io_error.get_or_insert(Error::Io(e));
                    EntryStatus::Pending
                }
                Err(e) => return Err(e),
            };
            attempt.entries.insert(entry.name.clone(), status);

            if attempt.tracked && (processed + 1) % ENTRY_SAVE_INTERVAL == 0 {
                self.store.record_entries(&task.key(), &attempt.entries)?;
            }
        }

        reader.close();

        match (io_error, conflict) {
            (Some(e), _) | (None, Some(e)) => Err(e),
            (None, None) => Ok(()),
        }
    }

    fn target_for(&self, task: &ArchiveTask, entry: &ArchiveEntry) -> Result<PathBuf> {
        let target = sanitize_path(&task.destination_dir, &entry.name)?;
        if entry.is_file() && target == task.destination_dir {
            return Err(Error::CorruptEntry {
                entry: entry.name.clone(),
                reason: "file entry has an empty name".to_string(),
            });
        }
        Ok(target)
    }

    fn extract_one(
        &self,
        reader: &mut dyn ArchiveReader,
        entry: &ArchiveEntry,
        target: &Path,
        deadline: Option<Deadline>,
    ) -> Result<EntryResult> {
        match entry.kind {
            EntryKind::Directory => self.create_directory(target),
            EntryKind::File => self.write_file(reader, entry, target, deadline),
            EntryKind::Symlink | EntryKind::Other => {
                warn!(entry = %entry.name, kind = ?entry.kind, "Not extracting special entry");
                Ok(EntryResult::Kept(None))
            }
        }
    }

    fn create_directory(&self, target: &Path) -> Result<EntryResult> {
        match fs::symlink_metadata(target) {
            Ok(m) if m.is_dir() => Ok(EntryResult::Kept(None)),
            Ok(_) => Ok(EntryResult::Conflicted(target.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(target)?;
                Ok(EntryResult::Written(target.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(
        &self,
        reader: &mut dyn ArchiveReader,
        entry: &ArchiveEntry,
        target: &Path,
        deadline: Option<Deadline>,
    ) -> Result<EntryResult> {
        for _ in 0..MAX_STAGING_RACES {
            let decision = self
                .resolver
                .resolve(target, entry.size, || reader.entry_digest(entry))?;

            let (output, replace) = match decision {
                Decision::Skip => return Ok(EntryResult::Kept(None)),
                Decision::Identical(path) => return Ok(EntryResult::Kept(Some(path))),
                Decision::Abort => return Ok(EntryResult::Conflicted(target.to_path_buf())),
                Decision::Proceed => (target.to_path_buf(), fs::symlink_metadata(target).is_ok()),
                Decision::Rename(path) => (path, false),
            };

            let options = WriteOptions {
                replace,
                preserve_timestamps: self.config.preserve_timestamps,
                deadline,
            };
            match reader.extract_entry(entry, &output, options) {
                Ok(_) => return Ok(EntryResult::Written(output)),
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(path = ?output, "Output appeared while staging, resolving again");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ConflictUnresolved {
            path: target.to_path_buf(),
            reason: "output kept changing while the entry was written".to_string(),
        })
    }

    fn is_archive(&self, path: &Path) -> bool {
        ArchiveFormat::from_path(path).is_some_and(|f| self.config.formats.contains(&f))
    }

    fn remove_archive(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => info!(archive = ?path, "Removed extracted archive"),
            Err(e) => warn!(archive = ?path, error = %e, "Failed to remove extracted archive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveRootSelection, ConflictPolicy};
    use crate::identity::ArchiveIdentity;
    use tempfile::TempDir;
    use zipzap_testing::fixtures::{write_zip, ZipFixture};

    fn new_task(path: &Path, config: &Config) -> ArchiveTask {
        let identity = ArchiveIdentity::compute(path, config.identity).unwrap();
        ArchiveTask::new(identity, ArchiveFormat::Zip, config.archive_root)
    }

    fn setup() -> (TempDir, PathBuf, ProgressStore) {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let store = ProgressStore::open(root.join(".zipzap-progress.json")).unwrap();
        (temp_dir, root, store)
    }

    #[test]
    fn test_extracts_and_completes() {
        let config = Config::default();
        let (_temp_dir, root, store) = setup();
        let archive = root.join("a.zip");
        write_zip(
            &archive,
            &[
                ZipFixture::dir("docs/"),
                ZipFixture::file("docs/one.txt", b"one"),
                ZipFixture::file("two.txt", b"two"),
            ],
        )
        .unwrap();

        let outcome = Orchestrator::new(&store, &config).process(new_task(&archive, &config));
        let task = match outcome {
            TaskOutcome::Completed(task) => task,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(task.attempts, 1);
        assert!(task.entries.is_empty());
        assert_eq!(fs::read(root.join("docs/one.txt")).unwrap(), b"one");
        assert_eq!(fs::read(root.join("two.txt")).unwrap(), b"two");
        assert_eq!(store.get(&task.key()).unwrap().state, TaskState::Completed);
    }

    #[test]
    fn test_abort_policy_fails_with_conflict() {
        let config = Config {
            on_conflict: ConflictPolicy::Abort,
            ..Config::default()
        };
        let (_temp_dir, root, store) = setup();
        let archive = root.join("a.zip");
        write_zip(
            &archive,
            &[
                ZipFixture::file("keep.txt", b"from archive"),
                ZipFixture::file("new.txt", b"fresh"),
            ],
        )
        .unwrap();
        fs::write(root.join("keep.txt"), b"mine").unwrap();

        let outcome = Orchestrator::new(&store, &config).process(new_task(&archive, &config));
        let task = match outcome {
            TaskOutcome::Failed(task) => task,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(task.last_error.unwrap().kind, FailureKind::ConflictUnresolved);
        assert_eq!(fs::read(root.join("keep.txt")).unwrap(), b"mine");
        // Later entries are still attempted
        assert_eq!(fs::read(root.join("new.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn test_named_subfolder_and_removal() {
        let config = Config {
            archive_root: ArchiveRootSelection::NamedSubfolder,
            remove_after_extract: true,
            ..Config::default()
        };
        let (_temp_dir, root, store) = setup();
        let archive = root.join("photos.zip");
        write_zip(&archive, &[ZipFixture::file("img.jpg", b"jpeg")]).unwrap();

        let outcome = Orchestrator::new(&store, &config).process(new_task(&archive, &config));
        assert!(matches!(outcome, TaskOutcome::Completed(_)));
        assert_eq!(fs::read(root.join("photos/img.jpg")).unwrap(), b"jpeg");
        assert!(!archive.exists());
    }

    #[test]
    fn test_nested_archives_are_recorded() {
        let config = Config::default();
        let (_temp_dir, root, store) = setup();
        let inner = root.join("inner-src.zip");
        write_zip(&inner, &[ZipFixture::file("deep.txt", b"deep")]).unwrap();
        let inner_bytes = fs::read(&inner).unwrap();
        fs::remove_file(&inner).unwrap();

        let archive = root.join("outer.zip");
        write_zip(&archive, &[ZipFixture::file("inner.zip", &inner_bytes)]).unwrap();

        let outcome = Orchestrator::new(&store, &config).process(new_task(&archive, &config));
        let task = outcome.into_task();
        assert_eq!(task.nested, vec![root.join("inner.zip")]);
        assert!(store.nested_outputs().contains(&root.join("inner.zip")));
    }

    #[test]
    fn test_corrupt_archive_is_not_retried() {
        let config = Config::default();
        let (_temp_dir, root, store) = setup();
        let archive = root.join("broken.zip");
        fs::write(&archive, b"PK\x03\x04 truncated").unwrap();

        let outcome = Orchestrator::new(&store, &config).process(new_task(&archive, &config));
        let task = match outcome {
            TaskOutcome::Failed(task) => task,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.unwrap().kind, FailureKind::CorruptArchive);

        // A later pass leaves the record untouched
        let stored = store.get(&task.identity.key()).unwrap();
        let again = Orchestrator::new(&store, &config).process(stored);
        assert_eq!(again.task().attempts, 1);
    }
}
