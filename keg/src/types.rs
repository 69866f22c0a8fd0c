use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use keg_linter::formula::InstallDir;
use serde::{Deserialize, Serialize};

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";
pub const CHECKSUM_FILE: &str = "CHECKSUM";
/// Per-keg metadata directory; holds a copy of the formula.
pub const META_DIR: &str = ".keg";

pub enum OutputStream {
    Stdout(String),
    Stderr(String),
}

/// Directory layout under a keg prefix.
#[derive(Debug, Clone)]
pub struct KegEnv {
    pub prefix: PathBuf,
    pub cache: PathBuf,
}

impl KegEnv {
    pub fn new<P: AsRef<Path>>(prefix: P, cache: Option<PathBuf>) -> Self {
        let prefix = prefix.as_ref().to_path_buf();
        let cache = cache.unwrap_or_else(|| prefix.join("cache"));
        Self { prefix, cache }
    }

    pub fn cellar(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar().join(name)
    }

    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.rack(name).join(version)
    }

    /// Whether `keg` is a version directory directly inside the rack of `name`.
    pub fn is_keg_path(&self, name: &str, keg: &Path) -> bool {
        let single_component = |path: &Path| {
            let mut components = path.components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            )
        };
        single_component(Path::new(name))
            && keg
                .strip_prefix(self.rack(name))
                .is_ok_and(single_component)
    }

    pub fn staging_path(&self, name: &str, version: &str) -> PathBuf {
        self.rack(name).join(format!(".{}.staging", version))
    }

    /// Where an existing keg of the same version waits while its
    /// replacement is committed.
    pub fn backup_path(&self, name: &str, version: &str) -> PathBuf {
        self.rack(name).join(format!(".{}.backup", version))
    }

    pub fn downloads(&self) -> PathBuf {
        self.cache.join("downloads")
    }

    pub fn download_path(&self, name: &str, version: &str, file_name: &str) -> PathBuf {
        self.downloads()
            .join(format!("{}--{}--{}", name, version, file_name))
    }

    pub fn logs(&self) -> PathBuf {
        self.cache.join("logs")
    }

    pub fn tmp(&self) -> PathBuf {
        self.cache.join("tmp")
    }

    pub fn db_path(&self) -> PathBuf {
        self.prefix.join("var").join("keg").join("keg.db")
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [self.cellar(), self.downloads(), self.logs(), self.tmp()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// A file placed into a keg, relative to the keg root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
    pub dir: String,
    pub path: PathBuf,
    pub linked: bool,
}

impl InstalledFile {
    pub fn new(dir: InstallDir, path: PathBuf) -> Self {
        Self {
            dir: dir.to_string(),
            path,
            linked: dir.is_linked(),
        }
    }
}

/// Written into every committed keg as `INSTALL_RECEIPT.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub sha256: String,
    pub formula_hash: String,
    pub files: Vec<InstalledFile>,
    pub installed_at: DateTime<Utc>,
    pub installed_with: String,
}

impl InstallReceipt {
    pub fn read(keg: &Path) -> crate::Result<Self> {
        let content = fs::read_to_string(keg.join(RECEIPT_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let env = KegEnv::new("/opt/keg", None);
        assert_eq!(env.cache, PathBuf::from("/opt/keg/cache"));
        assert_eq!(
            env.keg_path("mrgitclean", "1.0.0"),
            PathBuf::from("/opt/keg/Cellar/mrgitclean/1.0.0")
        );
        assert_eq!(
            env.staging_path("mrgitclean", "1.0.0"),
            PathBuf::from("/opt/keg/Cellar/mrgitclean/.1.0.0.staging")
        );
        assert_eq!(
            env.download_path("mrgitclean", "1.0.0", "v1.0.0.tar.gz"),
            PathBuf::from("/opt/keg/cache/downloads/mrgitclean--1.0.0--v1.0.0.tar.gz")
        );

        let env = KegEnv::new("/opt/keg", Some(PathBuf::from("/var/cache/keg")));
        assert_eq!(env.logs(), PathBuf::from("/var/cache/keg/logs"));
    }

    #[test]
    fn test_is_keg_path() {
        let env = KegEnv::new("/opt/keg", None);
        assert!(env.is_keg_path("mrgitclean", &env.keg_path("mrgitclean", "1.0.0")));
        assert!(!env.is_keg_path("mrgitclean", &env.keg_path("mrgitclean", "..")));
        assert!(!env.is_keg_path("mrgitclean", &env.keg_path("mrgitclean", ".")));
        assert!(!env.is_keg_path("mrgitclean", &env.keg_path("mrgitclean", "a/b")));
        assert!(!env.is_keg_path("mrgitclean", &env.rack("mrgitclean")));
        assert!(!env.is_keg_path("mrgitclean", &env.keg_path("other", "1.0.0")));
        assert!(!env.is_keg_path("..", &env.keg_path("..", "1.0.0")));
    }
}
