//! Common test fixtures for zipzap testing

use crate::TestDir;
use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use xz2::write::XzEncoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One entry of a zip fixture
#[derive(Debug, Clone)]
pub enum ZipFixture {
    File { name: String, data: Vec<u8> },
    Dir { name: String },
}

impl ZipFixture {
    pub fn file(name: &str, data: &[u8]) -> Self {
        ZipFixture::File {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }

    pub fn dir(name: &str) -> Self {
        ZipFixture::Dir {
            name: name.to_string(),
        }
    }
}

/// Writes a deflated zip archive at `path` with the given entries, in order
///
/// Entry names are written verbatim, so hostile names such as
/// `../../etc/passwd` can be produced.
pub fn write_zip(path: &Path, entries: &[ZipFixture]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in entries {
        match entry {
            ZipFixture::File { name, data } => {
                writer.start_file(name.as_str(), options)?;
                writer.write_all(data)?;
            }
            ZipFixture::Dir { name } => {
                writer.add_directory(name.as_str(), options)?;
            }
        }
    }

    writer.finish()?;
    Ok(())
}

/// Writes a zip with `count` small text entries named `file_000.txt`...
pub fn write_numbered_zip(path: &Path, count: usize) -> Result<()> {
    let entries: Vec<ZipFixture> = (0..count)
        .map(|i| {
            ZipFixture::file(
                &format!("file_{:03}.txt", i),
                format!("contents of entry {}\n", i).as_bytes(),
            )
        })
        .collect();
    write_zip(path, &entries)
}

/// Writes a zip whose second entry escapes the extraction directory
pub fn write_traversal_zip(path: &Path) -> Result<()> {
    write_zip(
        path,
        &[
            ZipFixture::file("harmless.txt", b"harmless"),
            ZipFixture::file("../../etc/passwd", b"root:x:0:0::/root:/bin/sh\n"),
        ],
    )
}

/// Mode of the file entries written by the tar fixtures
pub const TAR_FILE_MODE: u32 = 0o640;

/// Writes a gzip-compressed tar archive with regular file entries
pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let encoder = GzEncoder::new(create(path)?, Compression::default());
    append_files(encoder, entries)?.finish()?;
    Ok(())
}

/// Writes a zstd-compressed tar archive with regular file entries
pub fn write_tar_zst(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let encoder = zstd::stream::write::Encoder::new(create(path)?, 3)?;
    append_files(encoder, entries)?.finish()?;
    Ok(())
}

/// Writes an xz-compressed tar archive with regular file entries
pub fn write_tar_xz(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let encoder = XzEncoder::new(create(path)?, 6);
    append_files(encoder, entries)?.finish()?;
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

/// Appends the entries to a tar stream and returns the finished inner writer
fn append_files<W: Write>(writer: W, entries: &[(&str, &[u8])]) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(TAR_FILE_MODE);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, *data)?;
    }
    Ok(builder.into_inner()?)
}

/// Sets the modification time of `path` to `unix_secs`
pub fn set_mtime(path: &Path, unix_secs: i64) -> Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(unix_secs, 0))?;
    Ok(())
}

/// Paths of the standard two-archive scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    /// `a.zip` with `alpha.txt` and `beta.txt`
    pub a_zip: PathBuf,
    /// `sub/b.zip` with `gamma.txt`
    pub b_zip: PathBuf,
    /// Pre-existing `sub/gamma.txt` that differs from the archived one
    pub conflicting: PathBuf,
}

pub const ALPHA: &[u8] = b"alpha contents\n";
pub const BETA: &[u8] = b"beta contents\n";
pub const GAMMA_ARCHIVED: &[u8] = b"gamma from the archive\n";
pub const GAMMA_LOCAL: &[u8] = b"gamma edited locally\n";

/// Creates `a.zip`, `sub/b.zip` and a conflicting `sub/gamma.txt`
pub fn create_scenario_tree(test_dir: &TestDir) -> Result<Scenario> {
    let a_zip = test_dir.join("a.zip");
    write_zip(
        &a_zip,
        &[
            ZipFixture::file("alpha.txt", ALPHA),
            ZipFixture::file("beta.txt", BETA),
        ],
    )?;

    let b_zip = test_dir.join("sub/b.zip");
    write_zip(&b_zip, &[ZipFixture::file("gamma.txt", GAMMA_ARCHIVED)])?;

    let conflicting = test_dir.create_file("sub/gamma.txt", GAMMA_LOCAL)?;

    Ok(Scenario {
        a_zip,
        b_zip,
        conflicting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_write_zip_round_trip() {
        let test_dir = TestDir::new().unwrap();
        let path = test_dir.join("t.zip");
        write_zip(
            &path,
            &[ZipFixture::dir("d/"), ZipFixture::file("d/x.txt", b"x")],
        )
        .unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = String::new();
        archive
            .by_name("d/x.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "x");
    }

    #[test]
    fn test_traversal_zip_keeps_hostile_name() {
        let test_dir = TestDir::new().unwrap();
        let path = test_dir.join("evil.zip");
        write_traversal_zip(&path).unwrap();

        let archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert!(archive.file_names().any(|n| n == "../../etc/passwd"));
    }

    #[test]
    fn test_scenario_tree() {
        let test_dir = TestDir::new().unwrap();
        let scenario = create_scenario_tree(&test_dir).unwrap();
        assert!(scenario.a_zip.exists());
        assert!(scenario.b_zip.exists());
        assert_eq!(fs::read(&scenario.conflicting).unwrap(), GAMMA_LOCAL);
    }
}
