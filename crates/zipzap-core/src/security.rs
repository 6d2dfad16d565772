//! Path safety checks for archive entries

use crate::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::error;

/// Normalize an entry name as stored in an archive: `\` becomes `/`
pub fn normalize_entry_name(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Resolve an untrusted entry name beneath `base`
///
/// Rejects absolute names, drive prefixes, any `..` component and names that
/// would be written through a symlink already present under `base`.
pub fn sanitize_path(base: &Path, untrusted: &str) -> Result<PathBuf> {
    let normalized = normalize_entry_name(untrusted);
    let mut result = base.to_path_buf();

    if has_drive_prefix(&normalized) {
        error!(path = %untrusted, "Entry name carries a drive prefix");
        return Err(Error::PathTraversal(untrusted.to_string()));
    }

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(name) => {
                result.push(name);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                error!(path = %untrusted, "Entry name contains parent directory component");
                return Err(Error::PathTraversal(untrusted.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                error!(path = %untrusted, "Entry name is absolute");
                return Err(Error::PathTraversal(untrusted.to_string()));
            }
        }
    }

    // Existing symlinks between base and the target could redirect the write
    for ancestor in result.ancestors().skip(1) {
        if ancestor == base || !ancestor.starts_with(base) {
            break;
        }
        if fs::symlink_metadata(ancestor).is_ok_and(|m| m.file_type().is_symlink()) {
            error!(path = %untrusted, link = ?ancestor, "Entry would be written through a symlink");
            return Err(Error::PathTraversal(untrusted.to_string()));
        }
    }

    Ok(result)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_path_normal() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let result = sanitize_path(base, "subdir/file.txt").unwrap();
        assert_eq!(result, base.join("subdir/file.txt"));

        let result = sanitize_path(base, "./subdir\\other.txt").unwrap();
        assert_eq!(result, base.join("subdir/other.txt"));
    }

    #[test]
    fn test_sanitize_path_rejects_escapes() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        for name in [
            "../etc/passwd",
            "../../etc/passwd",
            "/etc/passwd",
            "subdir/../../etc/passwd",
            "ok/../inside.txt",
            "..\\..\\windows\\system.ini",
            "C:/Windows/win.ini",
        ] {
            assert!(
                matches!(sanitize_path(base, name), Err(Error::PathTraversal(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_path_rejects_symlinked_parent() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("dest");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        assert!(sanitize_path(&base, "link/file.txt").is_err());
        assert!(sanitize_path(&base, "real/file.txt").is_ok());
    }
}
