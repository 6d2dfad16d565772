//! Testing utilities and fixtures for zipzap
//!
//! This crate provides archive builders, scenario trees and assertions
//! shared by the zipzap test suites.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod assertions;
pub mod fixtures;

/// Creates a temporary test directory with cleanup on drop
pub struct TestDir {
    _dir: TempDir,
    root: PathBuf,
}

impl TestDir {
    /// Creates a new temporary test directory
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        // Archive identities use canonical paths; keep the root comparable
        let root = std::fs::canonicalize(dir.path())?;
        Ok(Self { _dir: dir, root })
    }

    /// Returns the canonical path to the temporary directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Joins `name` onto the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Creates a file with the given name and content in the test directory
    pub fn create_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Creates a directory with the given name in the test directory
    pub fn create_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}
