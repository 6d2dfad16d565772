//! Configuration module

use crate::archive::ArchiveFormat;
use crate::{Error, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the progress file written at the scan root when `state_file` is unset
pub const DEFAULT_STATE_FILE: &str = ".zipzap-progress.json";

/// Upper bound for the automatic worker count
const MAX_AUTO_WORKERS: usize = 8;

/// Run configuration shared by the scanner, orchestrator and run controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replace differing files instead of renaming around them
    pub overwrite: bool,
    /// What to do with a differing existing file when `overwrite` is off
    pub on_conflict: ConflictPolicy,
    /// How an existing file is judged identical to an entry
    pub compare: CompareMode,
    /// Extraction attempts per archive, across runs
    pub max_attempts: u32,
    /// Worker threads (0 = auto)
    pub max_parallel_workers: usize,
    /// Run one extra pass over archives found inside extracted output
    pub include_nested_archives: bool,
    /// Where an archive's entries land
    pub archive_root: ArchiveRootSelection,
    /// How an archive's identity is derived
    pub identity: IdentityMode,
    /// Yield already completed archives as skipped instead of omitting them
    pub report_skipped: bool,
    /// Follow directory symlinks while scanning
    pub follow_symlinks: bool,
    /// Archive formats the scanner picks up
    pub formats: Vec<ArchiveFormat>,
    /// Sniff magic bytes of files without a known extension
    pub detect_by_signature: bool,
    /// Glob patterns, relative to the scan root, to ignore
    pub exclude: Vec<String>,
    /// Archives with at least this many entries get per-entry status tracking
    pub entry_tracking_threshold: usize,
    /// Per-archive extraction timeout in seconds
    pub extract_timeout_secs: Option<u64>,
    /// Delete each archive once it is completely extracted
    pub remove_after_extract: bool,
    /// Apply entry modification times to extracted files
    pub preserve_timestamps: bool,
    /// Progress file location (defaults to the scan root)
    pub state_file: Option<PathBuf>,
}

/// Policy for an existing output that differs from the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Write the entry next to the existing file under a counter suffix
    #[default]
    Rename,
    /// Leave the existing file and do not extract the entry
    Skip,
    /// Fail the archive with an unresolved conflict
    Abort,
}

/// How an existing file is compared with an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Same size is enough
    Size,
    /// Same size and same blake3 digest
    #[default]
    Content,
}

/// Extraction target for an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveRootSelection {
    /// Entries land next to the archive
    #[default]
    SameDir,
    /// Entries land in a sibling folder named after the archive
    NamedSubfolder,
}

/// Signature used for an archive's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// Canonical path, size and modification time
    #[default]
    SizeMtime,
    /// Canonical path and blake3 digest of the archive bytes
    ContentHash,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overwrite: false,
            on_conflict: ConflictPolicy::Rename,
            compare: CompareMode::Content,
            max_attempts: 3,
            max_parallel_workers: 0,
            include_nested_archives: false,
            archive_root: ArchiveRootSelection::SameDir,
            identity: IdentityMode::SizeMtime,
            report_skipped: true,
            follow_symlinks: false,
            formats: vec![ArchiveFormat::Zip],
            detect_by_signature: false,
            exclude: Vec::new(),
            entry_tracking_threshold: 20,
            extract_timeout_secs: None,
            remove_after_extract: false,
            preserve_timestamps: true,
            state_file: None,
        }
    }
}

impl Config {
    /// Get the user configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir().ok_or_else(|| {
            Error::Config("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join("zipzap").join("config.toml"))
    }

    /// Get default configuration content with comments
    pub fn default_config_content() -> String {
        r#"# ZipZap Configuration File

# Replace existing files that differ from the archive entry
overwrite = false
# When overwrite is off and a differing file exists: rename, skip, abort
on_conflict = "rename"
# How an existing file is judged identical: size, content
compare = "content"

# Attempts per archive before it is marked permanently failed
max_attempts = 3
# Worker threads (0 = min(cpu count, 8))
max_parallel_workers = 0
# Per-archive timeout in seconds
# extract_timeout_secs = 600

# Extract into: same-dir, named-subfolder
archive_root = "same-dir"
# Archive identity: size-mtime, content-hash
identity = "size-mtime"

# Formats to pick up: zip, tar, tar.gz, tar.zst, tar.xz
formats = ["zip"]
detect_by_signature = false
follow_symlinks = false
# Glob patterns relative to the scanned directory
exclude = []

# Extract archives found inside extracted output (one extra pass)
include_nested_archives = false
# Report already completed archives as skipped
report_skipped = true
# Track per-entry status for archives with at least this many entries
entry_tracking_threshold = 20
# Delete archives after successful extraction
remove_after_extract = false
preserve_timestamps = true

# Progress file (default: .zipzap-progress.json in the scanned directory)
# state_file = "/var/tmp/zipzap-progress.json"
"#
        .to_string()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user configuration file, falling back to defaults when it does not exist
    pub fn load_default() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the commented default configuration to the user config path
    pub fn init_default() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, Self::default_config_content())?;
        }
        Ok(path)
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.formats.is_empty() {
            return Err(Error::Config("at least one archive format must be enabled".to_string()));
        }
        for pattern in &self.exclude {
            glob::Pattern::new(pattern)?;
        }
        Ok(())
    }

    /// Worker count after resolving the automatic default
    pub fn worker_count(&self) -> usize {
        if self.max_parallel_workers > 0 {
            return self.max_parallel_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_AUTO_WORKERS)
    }

    /// Per-archive timeout, if configured
    pub fn extract_timeout(&self) -> Option<Duration> {
        self.extract_timeout_secs.map(Duration::from_secs)
    }

    /// Progress file for a scan rooted at `root`
    pub fn state_path(&self, root: &Path) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_STATE_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.overwrite);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.on_conflict, ConflictPolicy::Rename);
        assert_eq!(config.archive_root, ArchiveRootSelection::SameDir);
        assert_eq!(config.formats, vec![ArchiveFormat::Zip]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_content_parses() {
        let config: Config = toml::from_str(&Config::default_config_content()).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.identity, IdentityMode::SizeMtime);
        assert!(config.extract_timeout_secs.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
            overwrite = true
            archive_root = "named-subfolder"
            formats = ["zip", "tar.gz"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.overwrite);
        assert_eq!(config.archive_root, ArchiveRootSelection::NamedSubfolder);
        assert_eq!(config.formats, vec![ArchiveFormat::Zip, ArchiveFormat::TarGz]);
        assert_eq!(config.entry_tracking_threshold, 20);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            max_attempts: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            exclude: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            formats: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_count() {
        let config = Config {
            max_parallel_workers: 3,
            ..Config::default()
        };
        assert_eq!(config.worker_count(), 3);

        let auto = Config::default().worker_count();
        assert!((1..=MAX_AUTO_WORKERS).contains(&auto));
    }

    #[test]
    fn test_state_path() {
        let root = Path::new("/data");
        assert_eq!(
            Config::default().state_path(root),
            root.join(DEFAULT_STATE_FILE)
        );

        let config = Config {
            state_file: Some(PathBuf::from("/tmp/p.json")),
            ..Config::default()
        };
        assert_eq!(config.state_path(root), PathBuf::from("/tmp/p.json"));
    }
}
