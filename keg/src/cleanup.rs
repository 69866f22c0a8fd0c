use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use keg_linter::formula::Formula;

use crate::{
    checksum::generate_checksum_file,
    types::{InstallReceipt, InstalledFile, META_DIR, RECEIPT_FILE},
};

/// Final touches on a staged keg before it is committed: formula copy,
/// install receipt and `CHECKSUM`.
pub struct Finalize {
    dir_path: PathBuf,
}

impl Finalize {
    pub fn new<P: AsRef<Path>>(dir_path: P) -> Self {
        Self {
            dir_path: dir_path.as_ref().to_path_buf(),
        }
    }

    pub fn update(
        &self,
        formula: &Formula,
        formula_str: &str,
        formula_hash: &str,
        files: &[InstalledFile],
    ) -> io::Result<InstallReceipt> {
        self.write_formula(&formula.name, formula_str)?;
        let receipt = InstallReceipt {
            name: formula.name.clone(),
            version: formula.version.clone(),
            source_url: formula.url.clone(),
            sha256: formula.sha256.clone(),
            formula_hash: formula_hash.to_string(),
            files: files.to_vec(),
            installed_at: Utc::now(),
            installed_with: format!("keg {}", env!("CARGO_PKG_VERSION")),
        };
        self.write_receipt(&receipt)?;
        generate_checksum_file(&self.dir_path)?;
        Ok(receipt)
    }

    fn write_formula(&self, name: &str, formula_str: &str) -> io::Result<()> {
        let meta_dir = self.dir_path.join(META_DIR);
        fs::create_dir_all(&meta_dir)?;
        fs::write(meta_dir.join(format!("{}.formula", name)), formula_str)
    }

    fn write_receipt(&self, receipt: &InstallReceipt) -> io::Result<()> {
        let json = serde_json::to_string_pretty(receipt)?;
        let mut file = fs::File::create(self.dir_path.join(RECEIPT_FILE))?;
        file.write_all(json.as_bytes())?;
        writeln!(file)
    }
}

/// Path of the formula copy kept inside a keg.
pub fn kept_formula(keg: &Path, name: &str) -> PathBuf {
    keg.join(META_DIR).join(format!("{}.formula", name))
}

/// Removes a directory tree if present.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use keg_linter::formula::InstallDir;

    use super::*;
    use crate::types::CHECKSUM_FILE;

    #[test]
    fn test_finalize_writes_metadata() {
        let src = r#"class Tool < Formula
  desc "Does things"
  homepage "https://example.com/tool"
  url "https://example.com/tool-1.2.0.tar.gz"
  sha256 "abababababababababababababababababababababababababababababababab"

  def install
    bin.install "tool"
  end
end
"#;
        let (formula, _) = Formula::parse_str(src).unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"x").unwrap();
        let files = vec![InstalledFile::new(InstallDir::Bin, PathBuf::from("bin/tool"))];

        let receipt = Finalize::new(dir.path())
            .update(&formula, src, "hash", &files)
            .unwrap();
        assert_eq!(receipt.version, "1.2.0");

        let read_back = InstallReceipt::read(dir.path()).unwrap();
        assert_eq!(read_back.files, files);
        assert_eq!(
            fs::read_to_string(kept_formula(dir.path(), "tool")).unwrap(),
            src
        );

        let checksum = fs::read_to_string(dir.path().join(CHECKSUM_FILE)).unwrap();
        assert!(checksum.contains("bin/tool:"));
        assert!(checksum.contains(".keg/tool.formula:"));
        assert!(checksum.contains("INSTALL_RECEIPT.json:"));
    }

    #[test]
    fn test_remove_dir_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("gone");
        remove_dir_if_exists(&target).unwrap();
        fs::create_dir_all(target.join("nested")).unwrap();
        remove_dir_if_exists(&target).unwrap();
        assert!(!target.exists());
    }
}
