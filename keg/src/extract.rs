//! Unpacks a downloaded source archive into a working directory.

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Component, Path, PathBuf},
};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{Error, Result};

const GZIP_MAGIC_BYTES: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_BYTES: [u8; 5] = *b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    /// Anything else is installed as a single file.
    Plain,
}

impl ArchiveKind {
    pub fn detect<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut header = Vec::with_capacity(TAR_MAGIC_OFFSET + TAR_MAGIC_BYTES.len());
        File::open(path)?
            .take((TAR_MAGIC_OFFSET + TAR_MAGIC_BYTES.len()) as u64)
            .read_to_end(&mut header)?;

        if header.starts_with(&GZIP_MAGIC_BYTES) {
            Ok(ArchiveKind::TarGz)
        } else if header.get(TAR_MAGIC_OFFSET..) == Some(&TAR_MAGIC_BYTES[..]) {
            Ok(ArchiveKind::Tar)
        } else {
            Ok(ArchiveKind::Plain)
        }
    }
}

/// Extracts `archive` into `dest_dir` and returns the source root.
///
/// When the archive holds a single top-level directory the source root is
/// that directory. A non-archive download is copied in as `file_name`.
pub fn extract(archive: &Path, dest_dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;

    match ArchiveKind::detect(archive)? {
        ArchiveKind::TarGz => {
            let decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
            unpack(tar::Archive::new(decoder), dest_dir)?;
        }
        ArchiveKind::Tar => {
            unpack(tar::Archive::new(BufReader::new(File::open(archive)?)), dest_dir)?;
        }
        ArchiveKind::Plain => {
            debug!("{} is not an archive, using it as-is", archive.display());
            fs::copy(archive, dest_dir.join(file_name))?;
            return Ok(dest_dir.to_path_buf());
        }
    }

    source_root(dest_dir)
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, dest_dir: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);

    for entry in archive
        .entries()
        .map_err(|err| Error::Extract(err.to_string()))?
    {
        let mut entry = entry.map_err(|err| Error::Extract(err.to_string()))?;
        let path = entry
            .path()
            .map_err(|err| Error::Extract(err.to_string()))?
            .to_path_buf();

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(Error::Extract(format!(
                "entry {} escapes the extraction directory",
                path.display()
            )));
        }

        debug!("unpacking: {}", path.display());
        entry
            .unpack_in(dest_dir)
            .map_err(|err| Error::Extract(format!("{}: {}", path.display(), err)))?;
    }

    Ok(())
}

fn source_root(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}
