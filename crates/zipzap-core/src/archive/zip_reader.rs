//! Zip reader implementation

use super::reader::{copy_stream, ArchiveEntry, ArchiveReader, EntryKind};
use super::ArchiveFormat;
use crate::security::normalize_entry_name;
use crate::{Error, Result};
use chrono::NaiveDate;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Zip reader
pub struct ZipReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    entries: Vec<ArchiveEntry>,
}

impl ZipReader {
    /// Open a zip archive and validate its central directory and local headers
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(path, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|e| archive_error(path, e))?;

            let mode = file.unix_mode();
            let kind = if file.is_dir() {
                EntryKind::Directory
            } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };

            entries.push(ArchiveEntry {
                index,
                name: normalize_entry_name(file.name()),
                size: file.size(),
                kind,
                mtime: file.last_modified().and_then(|dt| {
                    dos_to_unix(dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second())
                }),
                mode: mode.map(|m| m & 0o7777),
            });
        }

        debug!(path = ?path, entries = entries.len(), "Validated zip archive");

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            entries,
        })
    }
}

impl ArchiveReader for ZipReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn copy_entry(&mut self, entry: &ArchiveEntry, writer: &mut dyn Write) -> Result<u64> {
        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| entry_error(&entry.name, e))?;
        copy_stream(&mut file, writer, &entry.name)
    }
}

/// Convert a DOS date/time to a Unix timestamp (UTC)
fn dos_to_unix(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<i64> {
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, second as u32)
        .map(|dt| dt.and_utc().timestamp())
}

/// Structural failures while opening become `CorruptArchive`; plain read failures stay I/O
fn archive_error(path: &Path, err: ZipError) -> Error {
    match err {
        ZipError::Io(e)
            if !matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
            ) =>
        {
            Error::Io(e)
        }
        other => Error::CorruptArchive {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn entry_error(entry: &str, err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => super::reader::read_error(entry, e),
        other => Error::CorruptEntry {
            entry: entry.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use zipzap_testing::fixtures::{write_zip, ZipFixture};

    #[test]
    fn test_open_lists_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(
            &archive,
            &[
                ZipFixture::dir("docs/"),
                ZipFixture::file("docs/one.txt", b"one"),
                ZipFixture::file("two.txt", b"second"),
            ],
        )
        .unwrap();

        let reader = ZipReader::open(&archive).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["docs/", "docs/one.txt", "two.txt"]);
        assert!(reader.entries()[0].is_dir());
        assert_eq!(reader.entries()[2].size, 6);
        assert!(reader.entries()[2].mtime.is_some());
    }

    #[test]
    fn test_extract_entry_and_digest() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(&archive, &[ZipFixture::file("nested/x.txt", b"payload")]).unwrap();

        let mut reader = ZipReader::open(&archive).unwrap();
        let entry = reader.entries()[0].clone();
        let dest = temp_dir.path().join("out/nested/x.txt");
        let written = reader
            .extract_entry(&entry, &dest, Default::default())
            .unwrap();

        assert_eq!(written, 7);
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        assert_eq!(
            reader.entry_digest(&entry).unwrap(),
            blake3::hash(b"payload").to_hex().to_string()
        );
    }

    #[test]
    fn test_noclobber_refuses_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(&archive, &[ZipFixture::file("x.txt", b"new")]).unwrap();
        let dest = temp_dir.path().join("x.txt");
        fs::write(&dest, b"old").unwrap();

        let mut reader = ZipReader::open(&archive).unwrap();
        let entry = reader.entries()[0].clone();
        let err = reader
            .extract_entry(&entry, &dest, Default::default())
            .unwrap_err();

        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(&archive, &[ZipFixture::file("x.txt", b"0123456789")]).unwrap();
        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            ZipReader::open(&archive),
            Err(Error::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_dos_to_unix() {
        assert_eq!(dos_to_unix(1980, 1, 1, 0, 0, 0), Some(315_532_800));
        assert_eq!(dos_to_unix(2024, 2, 30, 0, 0, 0), None);
    }
}
