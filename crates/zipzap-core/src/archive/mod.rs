//! Archive reading: format detection, entry listing and single-entry extraction

pub mod format;
pub mod reader;
pub mod tar_reader;
pub mod zip_reader;

pub use format::ArchiveFormat;
pub use reader::{ArchiveEntry, ArchiveReader, Deadline, EntryKind, WriteOptions};

use crate::Result;
use std::path::Path;
use tracing::debug;

/// Open an archive of a known format, validating its structure before returning
pub fn open(path: &Path, format: ArchiveFormat) -> Result<Box<dyn ArchiveReader>> {
    debug!(path = ?path, format = format.name(), "Opening archive");

    let reader: Box<dyn ArchiveReader> = match format {
        ArchiveFormat::Zip => Box::new(zip_reader::ZipReader::open(path)?),
        ArchiveFormat::Tar
        | ArchiveFormat::TarGz
        | ArchiveFormat::TarZst
        | ArchiveFormat::TarXz => Box::new(tar_reader::TarReader::open(path, format)?),
    };

    Ok(reader)
}
