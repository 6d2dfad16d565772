//! Stable archive identity used to recognise an archive across runs

use crate::config::IdentityMode;
use crate::utils::{hash_file, modified_ns};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Content signature part of an identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signature {
    SizeMtime { size: u64, modified_ns: i64 },
    ContentHash { size: u64, blake3: String },
}

/// Canonical path plus content signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveIdentity {
    pub path: PathBuf,
    pub signature: Signature,
}

impl ArchiveIdentity {
    /// Compute the identity of the archive at `path`
    pub fn compute(path: &Path, mode: IdentityMode) -> Result<Self> {
        let path = fs::canonicalize(path)?;
        let metadata = fs::metadata(&path)?;

        let signature = match mode {
            IdentityMode::SizeMtime => Signature::SizeMtime {
                size: metadata.len(),
                modified_ns: modified_ns(&metadata),
            },
            IdentityMode::ContentHash => Signature::ContentHash {
                size: metadata.len(),
                blake3: hash_file(&path)?,
            },
        };

        Ok(Self { path, signature })
    }

    /// Key under which the task is stored
    pub fn key(&self) -> String {
        match &self.signature {
            Signature::SizeMtime { size, modified_ns } => {
                format!("{}#{}:{}", self.path.display(), size, modified_ns)
            }
            Signature::ContentHash { blake3, .. } => {
                format!("{}#blake3:{}", self.path.display(), blake3)
            }
        }
    }

    /// Archive size in bytes
    pub fn size(&self) -> u64 {
        match self.signature {
            Signature::SizeMtime { size, .. } | Signature::ContentHash { size, .. } => size,
        }
    }
}

impl fmt::Display for ArchiveIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
