//! Archive reader trait and the entry-copy plumbing shared by all formats

use super::ArchiveFormat;
use crate::{Error, Result};
use filetime::FileTime;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::debug;

/// Copy buffer size (64 KiB)
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Permissions for extracted files when the archive does not carry any
#[cfg(unix)]
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Kind of an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Devices, fifos, hard links and the like
    Other,
}

/// Entry in an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Position within the archive
    pub index: usize,
    /// Entry name with `/` separators
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    pub kind: EntryKind,
    /// Modification time (Unix timestamp)
    pub mtime: Option<i64>,
    /// Unix permission bits (if available)
    pub mode: Option<u32>,
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Wall-clock limit for one archive's extraction
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    /// Deadline `limit` from now
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Fail with [`Error::Timeout`] once the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::Timeout(self.limit))
        } else {
            Ok(())
        }
    }
}

/// How an entry is written to its destination
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Atomically replace an existing destination; otherwise fail with `AlreadyExists`
    pub replace: bool,
    /// Apply the entry's modification time
    pub preserve_timestamps: bool,
    pub deadline: Option<Deadline>,
}

/// An opened, structurally validated archive
///
/// Dropping the reader closes the underlying file.
pub trait ArchiveReader: Send {
    /// Format of the opened archive
    fn format(&self) -> ArchiveFormat;

    /// Path of the opened archive
    fn path(&self) -> &Path;

    /// Entries in archive order
    fn entries(&self) -> &[ArchiveEntry];

    /// Stream the contents of `entry` into `writer`, returning the byte count
    fn copy_entry(&mut self, entry: &ArchiveEntry, writer: &mut dyn Write) -> Result<u64>;

    /// Extract one file entry to `dest`, creating intermediate directories
    ///
    /// The entry is staged in a temporary file next to `dest` and renamed into
    /// place, so `dest` is either untouched or complete.
    fn extract_entry(
        &mut self,
        entry: &ArchiveEntry,
        dest: &Path,
        options: WriteOptions,
    ) -> Result<u64> {
        let parent = dest
            .parent()
            .ok_or_else(|| Error::InvalidPath(format!("{:?} has no parent directory", dest)))?;
        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        let copied = {
            let mut writer = DeadlineWriter::new(staged.as_file_mut(), options.deadline);
            self.copy_entry(entry, &mut writer)
        };
        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                if let Some(deadline) = options.deadline.filter(|d| d.expired()) {
                    return Err(Error::Timeout(deadline.limit()));
                }
                return Err(e);
            }
        };
        check_size(entry, written)?;

        set_entry_permissions(staged.path(), entry.mode)?;
        if options.preserve_timestamps {
            if let Some(mtime) = entry.mtime {
                filetime::set_file_mtime(staged.path(), FileTime::from_unix_time(mtime, 0))?;
            }
        }

        if options.replace {
            staged.persist(dest).map_err(|e| Error::Io(e.error))?;
        } else {
            staged.persist_noclobber(dest).map_err(|e| Error::Io(e.error))?;
        }

        debug!(entry = %entry.name, dest = ?dest, bytes = written, "Extracted entry");
        Ok(written)
    }

    /// Blake3 digest of an entry's contents, hex encoded
    fn entry_digest(&mut self, entry: &ArchiveEntry) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        let read = self.copy_entry(entry, &mut hasher)?;
        check_size(entry, read)?;
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Release the archive
    fn close(self: Box<Self>) {}
}

/// Copy a decoded entry stream into `writer`
///
/// Read-side decoding failures become [`Error::CorruptEntry`]; write-side failures stay I/O errors.
pub(crate) fn copy_stream<R, W>(reader: &mut R, writer: &mut W, entry: &str) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(entry, e)),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    writer.flush()?;
    Ok(total)
}

/// Classify an error raised while decoding entry data
pub(crate) fn read_error(entry: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Error::CorruptEntry {
            entry: entry.to_string(),
            reason: err.to_string(),
        },
        _ => Error::Io(err),
    }
}

fn check_size(entry: &ArchiveEntry, actual: u64) -> Result<()> {
    if actual != entry.size {
        return Err(Error::CorruptEntry {
            entry: entry.name.clone(),
            reason: format!("expected {} bytes, decoded {}", entry.size, actual),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn set_entry_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = mode
        .map(|m| m & 0o777)
        .filter(|m| *m != 0)
        .unwrap_or(DEFAULT_FILE_MODE);
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_entry_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Writer that refuses further writes once a deadline has passed
struct DeadlineWriter<W> {
    inner: W,
    deadline: Option<Deadline>,
}

impl<W: Write> DeadlineWriter<W> {
    fn new(inner: W, deadline: Option<Deadline>) -> Self {
        Self { inner, deadline }
    }
}

impl<W: Write> Write for DeadlineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(deadline) = &self.deadline {
            if deadline.expired() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "archive extraction deadline exceeded",
                ));
            }
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
