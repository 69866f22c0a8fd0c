//! Symlinks keg contents into the prefix.

use std::{
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use keg_linter::logger::TaskLogger;
use tracing::debug;

use crate::{
    error::{Error, Result},
    types::{InstalledFile, KegEnv},
};

/// Top-level keg directories whose files are linked into the prefix.
const LINKED_DIRS: [&str; 3] = ["bin", "sbin", "share"];

/// `dest` in the prefix pointing at `target` inside a keg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub dest: PathBuf,
    pub target: PathBuf,
}

pub fn plan_links(env: &KegEnv, keg: &Path, files: &[InstalledFile]) -> Vec<Link> {
    files
        .iter()
        .filter(|file| file.linked)
        .map(|file| Link {
            dest: env.prefix.join(&file.path),
            target: keg.join(&file.path),
        })
        .collect()
}

fn resolve_link(path: &Path) -> io::Result<PathBuf> {
    let target = fs::read_link(path)?;
    if target.is_absolute() {
        return Ok(target);
    }
    Ok(path
        .parent()
        .map(|parent| parent.join(&target))
        .unwrap_or(target))
}

pub struct Linker<'a> {
    env: &'a KegEnv,
    logger: &'a TaskLogger,
}

impl<'a> Linker<'a> {
    pub fn new(env: &'a KegEnv, logger: &'a TaskLogger) -> Self {
        Self { env, logger }
    }

    /// A destination is free when it does not exist or is a symlink into
    /// this formula's rack. Anything else is a conflict unless `overwrite`.
    pub fn check_conflicts(&self, name: &str, links: &[Link], overwrite: bool) -> Result<()> {
        let rack = self.env.rack(name);

        for link in links {
            let meta = match fs::symlink_metadata(&link.dest) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            if meta.is_dir() {
                return Err(Error::LinkConflict {
                    path: link.dest.clone(),
                });
            }
            if meta.file_type().is_symlink() && resolve_link(&link.dest)?.starts_with(&rack) {
                continue;
            }
            if overwrite {
                self.logger
                    .warn(format!("Overwriting {}", link.dest.display()));
                continue;
            }
            return Err(Error::LinkConflict {
                path: link.dest.clone(),
            });
        }
        Ok(())
    }

    pub fn link(&self, links: &[Link]) -> Result<usize> {
        for link in links {
            if let Some(parent) = link.dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(&link.dest).is_ok() {
                fs::remove_file(&link.dest)?;
            }
            debug!("linking {} -> {}", link.dest.display(), link.target.display());
            symlink(&link.target, &link.dest)?;
        }
        Ok(links.len())
    }

    /// Removes prefix symlinks that point into `keg`.
    pub fn unlink_keg(&self, keg: &Path) -> Result<usize> {
        let mut removed = 0;
        for dir in LINKED_DIRS {
            let root = keg.join(dir);
            if root.is_dir() {
                removed += self.unlink_tree(keg, &root)?;
            }
        }
        Ok(removed)
    }

    fn unlink_tree(&self, keg: &Path, dir: &Path) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if fs::symlink_metadata(&path)?.is_dir() {
                removed += self.unlink_tree(keg, &path)?;
                continue;
            }

            let Ok(rel) = path.strip_prefix(keg) else {
                continue;
            };
            let dest = self.env.prefix.join(rel);
            let points_here = fs::symlink_metadata(&dest)
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false)
                && resolve_link(&dest)? == path;
            if points_here {
                debug!("unlinking {}", dest.display());
                fs::remove_file(&dest)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
