//! Archive format detection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Archive formats the reader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.zst")]
    TarZst,
    #[serde(rename = "tar.xz")]
    TarXz,
}

/// (suffix, format) pairs, longest suffixes first
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGz),
    (".tar.zst", ArchiveFormat::TarZst),
    (".tar.xz", ArchiveFormat::TarXz),
    (".tgz", ArchiveFormat::TarGz),
    (".tzst", ArchiveFormat::TarZst),
    (".txz", ArchiveFormat::TarXz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

impl ArchiveFormat {
    /// Every supported format
    pub const ALL: [ArchiveFormat; 5] = [
        ArchiveFormat::Zip,
        ArchiveFormat::Tar,
        ArchiveFormat::TarGz,
        ArchiveFormat::TarZst,
        ArchiveFormat::TarXz,
    ];

    /// Canonical name, as used in configuration
    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarZst => "tar.zst",
            ArchiveFormat::TarXz => "tar.xz",
        }
    }

    /// Parse a configuration name (`zip`, `tar.gz`, `tgz`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| suffix[1..] == name)
            .map(|(_, format)| *format)
    }

    /// Detect the format from the file name's (double) extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// Detect the format from the leading bytes of the file
    ///
    /// Compressed streams are assumed to carry a tar payload.
    pub fn sniff(path: &Path) -> io::Result<Option<Self>> {
        let mut header = Vec::with_capacity(USTAR_OFFSET + USTAR_MAGIC.len());
        File::open(path)?
            .take((USTAR_OFFSET + USTAR_MAGIC.len()) as u64)
            .read_to_end(&mut header)?;
        Ok(Self::from_signature(&header))
    }

    /// Match a byte prefix against known signatures
    pub fn from_signature(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
            Some(ArchiveFormat::Zip)
        } else if header.starts_with(GZIP_MAGIC) {
            Some(ArchiveFormat::TarGz)
        } else if header.starts_with(ZSTD_MAGIC) {
            Some(ArchiveFormat::TarZst)
        } else if header.starts_with(XZ_MAGIC) {
            Some(ArchiveFormat::TarXz)
        } else if header
            .get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len())
            .is_some_and(|magic| magic == USTAR_MAGIC)
        {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }

    /// File name without the archive suffix (`photos.tar.gz` → `photos`)
    pub fn stem(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lower = name.to_ascii_lowercase();

        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.len() > suffix.len() && lower.ends_with(suffix))
            .map(|(suffix, _)| name[..name.len() - suffix.len()].to_string())
            .unwrap_or(name)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("a.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_path(Path::new("A.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_path(Path::new("dir/x.tar.gz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("x.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("x.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(ArchiveFormat::from_path(Path::new(".zip")), None);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(ArchiveFormat::from_name("zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("tar.zst"), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::from_name("tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("rar"), None);
    }

    #[test]
    fn test_stem() {
        assert_eq!(ArchiveFormat::stem(Path::new("/x/photos.tar.gz")), "photos");
        assert_eq!(ArchiveFormat::stem(Path::new("Report.ZIP")), "Report");
        assert_eq!(ArchiveFormat::stem(Path::new("plain")), "plain");
    }

    #[test]
    fn test_sniff() {
        let temp_dir = TempDir::new().unwrap();
        let zip_like = temp_dir.path().join("blob");
        fs::write(&zip_like, b"PK\x03\x04rest").unwrap();
        assert_eq!(ArchiveFormat::sniff(&zip_like).unwrap(), Some(ArchiveFormat::Zip));

        let text = temp_dir.path().join("text");
        fs::write(&text, b"hello").unwrap();
        assert_eq!(ArchiveFormat::sniff(&text).unwrap(), None);
    }
}
