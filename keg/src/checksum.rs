//! Checksum utilities
//!
//! SHA-256 for verifying source archives against their formula, BLAKE3 for
//! the per-keg `CHECKSUM` manifest.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::CHECKSUM_FILE;

fn hash_reader<R: Read>(mut reader: R, mut update: impl FnMut(&[u8])) -> std::io::Result<()> {
    let mut buffer = [0u8; 65536]; // 64KB buffer
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        update(&buffer[..bytes_read]);
    }
    Ok(())
}

/// Compute BLAKE3 hash of a file
pub fn b3sum<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let reader = BufReader::new(File::open(path)?);
    let mut hasher = Blake3Hasher::new();
    hash_reader(reader, |chunk| {
        hasher.update(chunk);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute SHA256 hash of a file
pub fn sha256sum<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    hash_reader(reader, |chunk| hasher.update(chunk))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks a file against an expected SHA-256 digest, returning the digest.
pub fn verify_sha256<P: AsRef<Path>>(path: P, expected: &str) -> Result<String> {
    let path = path.as_ref();
    let actual = sha256sum(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_lowercase(),
            actual,
            path: path.to_path_buf(),
        });
    }
    Ok(actual)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let file_type = fs::symlink_metadata(&path)?.file_type();
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
    Ok(())
}

/// Writes `CHECKSUM` into `dir` with a `path:b3sum` line for every file
/// below it, sorted by path.
pub fn generate_checksum_file<P: AsRef<Path>>(dir: P) -> std::io::Result<String> {
    let dir = dir.as_ref();
    let checksum_path = dir.join(CHECKSUM_FILE);
    if checksum_path.exists() {
        fs::remove_file(&checksum_path)?;
    }

    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut content = String::new();
    for rel in files {
        let checksum = b3sum(dir.join(&rel))?;
        content.push_str(&format!("{}:{}\n", rel.display(), checksum));
    }

    fs::write(&checksum_path, &content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn hello_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_b3sum() {
        let file = hello_file();
        // Known BLAKE3 hash of "hello world"
        assert_eq!(
            b3sum(file.path()).unwrap(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_sha256sum() {
        let file = hello_file();
        assert_eq!(sha256sum(file.path()).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_verify_sha256() {
        let file = hello_file();
        assert!(verify_sha256(file.path(), &HELLO_SHA256.to_uppercase()).is_ok());

        let err = verify_sha256(file.path(), &"0".repeat(64)).unwrap_err();
        match err {
            Error::ChecksumMismatch { actual, .. } => assert_eq!(actual, HELLO_SHA256),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_generate_checksum_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"hello world").unwrap();
        fs::write(dir.path().join("README"), b"hello world").unwrap();

        let content = generate_checksum_file(dir.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("README:d74981ef"));
        assert!(lines[1].starts_with("bin/tool:d74981ef"));

        // Regenerating does not list the CHECKSUM file itself
        let again = generate_checksum_file(dir.path()).unwrap();
        assert_eq!(content, again);
    }
}
