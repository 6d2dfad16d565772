//! Common assertions for zipzap testing

use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Asserts that `path` is a regular file holding exactly `expected`
pub fn assert_file_contents(path: &Path, expected: &[u8]) -> Result<()> {
    let actual = std::fs::read(path)?;
    assert_eq!(
        actual,
        expected,
        "Content mismatch for {:?}: got {:?}",
        path,
        String::from_utf8_lossy(&actual)
    );
    Ok(())
}

/// Lists every regular file under `dir`, relative to it, sorted
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().strip_prefix(dir)?.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Asserts that no staging leftovers (`.tmp*` files) remain under `dir`
pub fn assert_no_staging_files(dir: &Path) -> Result<()> {
    let leftovers: Vec<_> = list_files(dir)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(".tmp"))
        })
        .collect();
    assert!(leftovers.is_empty(), "Staging files left behind: {:?}", leftovers);
    Ok(())
}

/// Asserts that a file has specific permissions (Unix only)
#[cfg(unix)]
pub fn assert_file_permissions(path: &Path, expected: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
    assert_eq!(
        mode, expected,
        "Permission mismatch for {:?}: expected {:o}, got {:o}",
        path, expected, mode
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestDir;

    #[test]
    fn test_list_files_is_relative_and_sorted() {
        let test_dir = TestDir::new().unwrap();
        test_dir.create_file("b.txt", b"b").unwrap();
        test_dir.create_file("a/c.txt", b"c").unwrap();

        let files = list_files(test_dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("a/c.txt"), PathBuf::from("b.txt")]);
        assert_file_contents(&test_dir.join("b.txt"), b"b").unwrap();
        assert_no_staging_files(test_dir.path()).unwrap();
    }
}
