//! Tar reader implementation (plain, gzip, zstd and xz)

use super::reader::{copy_stream, read_error, ArchiveEntry, ArchiveReader, EntryKind};
use super::ArchiveFormat;
use crate::security::normalize_entry_name;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

/// Tar reader
///
/// Tar streams have no index. Data offsets are recorded while validating, and
/// entries are then read forward through one decoded stream, which is only
/// restarted when an earlier entry is requested.
pub struct TarReader {
    path: PathBuf,
    format: ArchiveFormat,
    entries: Vec<ArchiveEntry>,
    /// Data offset of each entry in the decoded stream
    offsets: Vec<u64>,
    cursor: Option<StreamCursor>,
}

struct StreamCursor {
    stream: Box<dyn Read + Send>,
    position: u64,
}

impl TarReader {
    /// Open a tar archive, decoding the whole stream once to validate it
    pub fn open(path: &Path, format: ArchiveFormat) -> Result<Self> {
        let mut archive = Archive::new(create_reader(path, format)?);
        let mut entries = Vec::new();
        let mut offsets = Vec::new();

        let corrupt = |e: io::Error| Error::CorruptArchive {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        for (index, entry) in archive.entries().map_err(corrupt)?.enumerate() {
            let mut entry = entry.map_err(corrupt)?;
            let name = normalize_entry_name(&entry.path().map_err(corrupt)?.to_string_lossy());
            let header = entry.header();
            let kind = match header.entry_type() {
                EntryType::Regular | EntryType::Continuous => EntryKind::File,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => EntryKind::Symlink,
                _ => EntryKind::Other,
            };
            let size = entry.size();
            let mtime = header.mtime().ok().map(|t| t as i64);
            let mode = header.mode().ok().map(|m| m & 0o7777);

            let offset = entry.raw_file_position();

            // Drain the data so decoder and padding errors surface now
            io::copy(&mut entry, &mut io::sink()).map_err(corrupt)?;

            entries.push(ArchiveEntry {
                index,
                name,
                size: if kind == EntryKind::File { size } else { 0 },
                kind,
                mtime,
                mode,
            });
            offsets.push(offset);
        }

        debug!(path = ?path, format = format.name(), entries = entries.len(), "Validated tar archive");

        Ok(Self {
            path: path.to_path_buf(),
            format,
            entries,
            offsets,
            cursor: None,
        })
    }
}

impl ArchiveReader for TarReader {
    fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn copy_entry(&mut self, entry: &ArchiveEntry, writer: &mut dyn Write) -> Result<u64> {
        let offset = *self
            .offsets
            .get(entry.index)
            .ok_or_else(|| Error::NotFound(format!("Entry not found in archive: {:?}", entry.name)))?;

        let cursor = match self.cursor.take() {
            Some(cursor) if cursor.position <= offset => self.cursor.insert(cursor),
            _ => {
                debug!(path = ?self.path, entry = %entry.name, "Restarting tar stream");
                self.cursor.insert(StreamCursor {
                    stream: create_reader(&self.path, self.format)?,
                    position: 0,
                })
            }
        };

        let result = read_at(cursor, offset, entry, writer);
        match &result {
            Ok(copied) if *copied == entry.size => cursor.position = offset + copied,
            _ => self.cursor = None,
        }
        result
    }
}

/// Skip forward to `offset` and copy the entry's data
fn read_at(
    cursor: &mut StreamCursor,
    offset: u64,
    entry: &ArchiveEntry,
    writer: &mut dyn Write,
) -> Result<u64> {
    let gap = offset - cursor.position;
    let skipped = io::copy(&mut cursor.stream.by_ref().take(gap), &mut io::sink())
        .map_err(|e| read_error(&entry.name, e))?;
    if skipped != gap {
        return Err(Error::CorruptEntry {
            entry: entry.name.clone(),
            reason: "archive ends before entry data".to_string(),
        });
    }
    cursor.position = offset;

    copy_stream(&mut cursor.stream.by_ref().take(entry.size), writer, &entry.name)
}

/// Create the decoding reader for a tar variant
fn create_reader(path: &Path, format: ArchiveFormat) -> Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    match format {
        ArchiveFormat::Tar => Ok(Box::new(file)),
        ArchiveFormat::TarGz => Ok(Box::new(GzDecoder::new(file))),
        ArchiveFormat::TarZst => Ok(Box::new(ZstdDecoder::with_buffer(file).map_err(|e| {
            Error::CorruptArchive {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?)),
        ArchiveFormat::TarXz => Ok(Box::new(XzDecoder::new(file))),
        ArchiveFormat::Zip => Err(Error::UnsupportedFormat(format!(
            "{:?} is not a tar archive",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use zipzap_testing::fixtures::{write_tar_gz, write_tar_xz, write_tar_zst};

    #[test]
    fn test_open_and_extract_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bundle.tar.gz");
        write_tar_gz(&archive, &[("a.txt", &b"alpha"[..]), ("sub/b.txt", &b"beta"[..])]).unwrap();

        let mut reader = TarReader::open(&archive, ArchiveFormat::TarGz).unwrap();
        assert_eq!(reader.entries().len(), 2);
        assert_eq!(reader.entries()[1].name, "sub/b.txt");

        let entry = reader.entries()[1].clone();
        let dest = temp_dir.path().join("out/sub/b.txt");
        reader
            .extract_entry(&entry, &dest, Default::default())
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"beta");
    }

    fn extract_all(reader: &mut TarReader, dest: &Path) {
        for entry in reader.entries().to_vec() {
            reader
                .extract_entry(&entry, &dest.join(&entry.name), Default::default())
                .unwrap();
        }
    }

    #[test]
    fn test_open_and_extract_tar_zst() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bundle.tar.zst");
        write_tar_zst(&archive, &[("a.txt", &b"alpha"[..]), ("sub/b.txt", &b"beta"[..])]).unwrap();

        let mut reader = TarReader::open(&archive, ArchiveFormat::TarZst).unwrap();
        assert_eq!(reader.format(), ArchiveFormat::TarZst);
        let dest = temp_dir.path().join("out");
        extract_all(&mut reader, &dest);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn test_open_and_extract_tar_xz() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bundle.tar.xz");
        let big = vec![7u8; 100_000];
        write_tar_xz(&archive, &[("big.bin", &big[..]), ("small.txt", &b"small"[..])]).unwrap();

        let mut reader = TarReader::open(&archive, ArchiveFormat::TarXz).unwrap();
        assert_eq!(reader.entries()[0].size, 100_000);
        let dest = temp_dir.path().join("out");
        extract_all(&mut reader, &dest);
        assert_eq!(fs::read(dest.join("big.bin")).unwrap(), big);
        assert_eq!(fs::read(dest.join("small.txt")).unwrap(), b"small");
    }

    #[test]
    fn test_entries_read_out_of_order() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bundle.tar.gz");
        write_tar_gz(
            &archive,
            &[("a.txt", &b"alpha"[..]), ("b.txt", &b"beta"[..]), ("c.txt", &b"gamma"[..])],
        )
        .unwrap();

        let mut reader = TarReader::open(&archive, ArchiveFormat::TarGz).unwrap();
        let entries = reader.entries().to_vec();
        let mut read = |index: usize| {
            let mut buffer = Vec::new();
            reader.copy_entry(&entries[index], &mut buffer).unwrap();
            buffer
        };

        assert_eq!(read(1), b"beta");
        assert_eq!(read(2), b"gamma");
        assert_eq!(read(0), b"alpha");
        assert_eq!(read(0), b"alpha");
        assert_eq!(read(2), b"gamma");
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bad.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(matches!(
            TarReader::open(&archive, ArchiveFormat::TarGz),
            Err(Error::CorruptArchive { .. })
        ));
    }
}
