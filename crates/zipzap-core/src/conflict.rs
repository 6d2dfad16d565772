//! Decides what happens when an extraction target already exists

use crate::config::{CompareMode, Config, ConflictPolicy};
use crate::utils::hash_file;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Upper bound on `name_N` candidates tried before giving up
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Outcome for one output path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write to the requested path
    Proceed,
    /// Leave the existing, differing file; the entry counts as extracted
    Skip,
    /// An identical copy of the entry already exists at this path
    Identical(PathBuf),
    /// Write to this sibling instead
    Rename(PathBuf),
    /// The entry cannot be written under the current policy
    Abort,
}

/// Conflict resolver
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    overwrite: bool,
    policy: ConflictPolicy,
    compare: CompareMode,
}

impl ConflictResolver {
    pub fn new(overwrite: bool, policy: ConflictPolicy, compare: CompareMode) -> Self {
        Self {
            overwrite,
            policy,
            compare,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.overwrite, config.on_conflict, config.compare)
    }

    /// Whether a `Proceed` decision may replace an existing file
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Resolve `output` for an entry of `expected_size` bytes
    ///
    /// `digest` yields the entry's blake3 digest; it is called at most once
    /// and only when an existing file has to be compared by content.
    pub fn resolve<F>(&self, output: &Path, expected_size: u64, mut digest: F) -> Result<Decision>
    where
        F: FnMut() -> Result<String>,
    {
        let mut cached: Option<String> = None;
        let mut entry_digest = move || -> Result<String> {
            if let Some(d) = &cached {
                return Ok(d.clone());
            }
            let d = digest()?;
            cached = Some(d.clone());
            Ok(d)
        };

        let metadata = match fs::symlink_metadata(output) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Decision::Proceed),
            Err(e) => return Err(e.into()),
        };

        if self.is_identical(output, &metadata, expected_size, &mut entry_digest)? {
            debug!(path = ?output, "Existing file matches entry");
            return Ok(Decision::Identical(output.to_path_buf()));
        }

        // Directories and symlinks in the way are never replaced
        let replaceable = metadata.file_type().is_file();
        if self.overwrite && replaceable {
            return Ok(Decision::Proceed);
        }

        let policy = if replaceable {
            self.policy
        } else {
            ConflictPolicy::Rename
        };

        match policy {
            ConflictPolicy::Skip => Ok(Decision::Skip),
            ConflictPolicy::Abort => Ok(Decision::Abort),
            ConflictPolicy::Rename => self.rename_target(output, expected_size, &mut entry_digest),
        }
    }

    fn rename_target<F>(&self, output: &Path, expected_size: u64, digest: &mut F) -> Result<Decision>
    where
        F: FnMut() -> Result<String>,
    {
        for counter in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = numbered_sibling(output, counter);
            match fs::symlink_metadata(&candidate) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(from = ?output, to = ?candidate, "Renaming conflicting output");
                    return Ok(Decision::Rename(candidate));
                }
                Err(e) => return Err(e.into()),
                Ok(metadata) => {
                    // An earlier run may already have written the renamed copy
                    if self.is_identical(&candidate, &metadata, expected_size, digest)? {
                        return Ok(Decision::Identical(candidate));
                    }
                }
            }
        }

        Err(Error::ConflictUnresolved {
            path: output.to_path_buf(),
            reason: format!("no free name after {} attempts", MAX_RENAME_ATTEMPTS),
        })
    }

    fn is_identical<F>(
        &self,
        path: &Path,
        metadata: &fs::Metadata,
        expected_size: u64,
        digest: &mut F,
    ) -> Result<bool>
    where
        F: FnMut() -> Result<String>,
    {
        if !metadata.file_type().is_file() || metadata.len() != expected_size {
            return Ok(false);
        }
        match self.compare {
            CompareMode::Size => Ok(true),
            CompareMode::Content => Ok(hash_file(path)? == digest()?),
        }
    }
}

/// `dir/name.ext` → `dir/name_N.ext`
pub fn numbered_sibling(path: &Path, counter: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}{}", stem, counter, extension))
}
