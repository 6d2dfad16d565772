//! Directory scanner producing archive candidates

use crate::archive::ArchiveFormat;
use crate::config::Config;
use crate::error::{ScanWarning, WarningKind};
use crate::identity::ArchiveIdentity;
use crate::store::ProgressStore;
use crate::task::{ArchiveTask, TaskState};
use crate::Result;
use glob::Pattern;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Prefix of the staging files written next to extraction targets
const STAGING_PREFIX: &str = ".tmp";

/// One item of a scan
#[derive(Debug, Clone)]
pub enum ScanItem {
    /// An archive to hand to the orchestrator
    Candidate(ArchiveTask),
    /// A non-fatal problem; the walk continued past it
    Warning(ScanWarning),
}

/// Walks a directory tree and classifies archive files against the progress store
pub struct Scanner<'a> {
    root: PathBuf,
    config: &'a Config,
    store: &'a ProgressStore,
    excludes: Vec<Pattern>,
    ignored: HashSet<PathBuf>,
}

impl<'a> Scanner<'a> {
    /// Scanner over `root`
    ///
    /// The progress file is never a candidate; neither are recorded nested
    /// archive outputs unless nested extraction is enabled.
    pub fn new(root: &Path, config: &'a Config, store: &'a ProgressStore) -> Result<Self> {
        let excludes = config
            .exclude
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ignored = HashSet::new();
        ignored.insert(canonical_or_self(store.path()));
        if !config.include_nested_archives {
            ignored.extend(store.nested_outputs());
        }

        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            excludes,
            ignored,
        })
    }

    /// Lazily walk the tree; each call starts a fresh walk
    pub fn scan(&self) -> impl Iterator<Item = ScanItem> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_excluded(entry.path()))
            .filter_map(move |entry| match entry {
                Ok(entry) => self.visit(&entry),
                Err(err) => Some(ScanItem::Warning(walk_warning(err))),
            })
    }

    /// Classify a single file, as the walk would
    pub fn classify(&self, path: &Path) -> Option<ScanItem> {
        let format = match self.detect_format(path) {
            Ok(Some(format)) => format,
            Ok(None) => return None,
            Err(e) => return Some(ScanItem::Warning(unreadable(path, &e))),
        };

        let identity = match ArchiveIdentity::compute(path, self.config.identity) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(path = ?path, error = %e, "Cannot read archive metadata");
                return Some(ScanItem::Warning(ScanWarning {
                    path: Some(path.to_path_buf()),
                    kind: WarningKind::Unreadable,
                    message: e.to_string(),
                }));
            }
        };

        if self.ignored.contains(&identity.path) {
            debug!(path = ?identity.path, "Ignoring recorded output");
            return None;
        }

        let task = match self.store.get(&identity.key()) {
            Some(mut stored) => match stored.state {
                TaskState::Completed | TaskState::Skipped => {
                    if !self.config.report_skipped {
                        return None;
                    }
                    stored.state = TaskState::Skipped;
                    stored
                }
                TaskState::Discovered | TaskState::Extracting | TaskState::Failed => stored,
            },
            None => ArchiveTask::new(identity, format, self.config.archive_root),
        };

        debug!(path = ?task.path, state = %task.state, "Found archive");
        Some(ScanItem::Candidate(task))
    }

    fn visit(&self, entry: &DirEntry) -> Option<ScanItem> {
        if !entry.file_type().is_file() {
            return None;
        }
        self.classify(entry.path())
    }

    fn detect_format(&self, path: &Path) -> io::Result<Option<ArchiveFormat>> {
        if let Some(format) = ArchiveFormat::from_path(path) {
            return Ok(self.enabled(format));
        }
        if !self.config.detect_by_signature || is_staging_file(path) {
            return Ok(None);
        }
        Ok(ArchiveFormat::sniff(path)?.and_then(|f| self.enabled(f)))
    }

    fn enabled(&self, format: ArchiveFormat) -> Option<ArchiveFormat> {
        self.config.formats.contains(&format).then_some(format)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excludes.is_empty() {
            return false;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                self.excludes.iter().any(|p| p.matches_path(relative))
            }
            _ => false,
        }
    }
}

fn walk_warning(err: walkdir::Error) -> ScanWarning {
    let path = err.path().map(Path::to_path_buf);

    let warning = if let Some(ancestor) = err.loop_ancestor() {
        ScanWarning {
            path,
            kind: WarningKind::SymlinkLoop,
            message: format!("symlink loop back to {:?}", ancestor),
        }
    } else if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::PermissionDenied) {
        ScanWarning {
            path,
            kind: WarningKind::PermissionDenied,
            message: "permission denied".to_string(),
        }
    } else {
        ScanWarning {
            path,
            kind: WarningKind::Unreadable,
            message: err.to_string(),
        }
    };

    warn!(path = ?warning.path, kind = ?warning.kind, "{}", warning.message);
    warning
}

fn unreadable(path: &Path, err: &io::Error) -> ScanWarning {
    warn!(path = ?path, error = %err, "Cannot read file");
    ScanWarning {
        path: Some(path.to_path_buf()),
        kind: if err.kind() == io::ErrorKind::PermissionDenied {
            WarningKind::PermissionDenied
        } else {
            WarningKind::Unreadable
        },
        message: err.to_string(),
    }
}

fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(STAGING_PREFIX))
}

fn canonical_or_self(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    // The file may not exist yet; resolve its directory instead
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
