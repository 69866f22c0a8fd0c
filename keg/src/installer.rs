use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use colored::Colorize;
use glob::{glob, Pattern};
use keg_cache::{HistoryAction, InstallDecision, InstallRecord, KegDatabase, TestStatus};
use keg_linter::{
    formula::{Formula, InstallStep},
    hash::compute_formula_hash,
    logger::TaskLogger,
    Linter,
};
use tracing::debug;

use crate::{
    cleanup::{kept_formula, remove_dir_if_exists, Finalize},
    error::{Error, Result},
    extract::extract,
    fetch::fetch_source,
    link::{plan_links, Link, Linker},
    smoke::{SelfTest, TestOutcome, DEFAULT_TEST_TIMEOUT},
    types::{InstallReceipt, InstalledFile, KegEnv},
};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub force: bool,
    pub skip_test: bool,
    pub overwrite: bool,
    pub test_timeout: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            force: false,
            skip_test: false,
            overwrite: false,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub enum InstallOutcome {
    /// The same version, archive and formula are already installed.
    Unchanged {
        name: String,
        version: String,
        keg: PathBuf,
    },
    Installed {
        name: String,
        version: String,
        keg: PathBuf,
        action: HistoryAction,
        /// `None` when the self-test was skipped or the formula has none.
        test: Option<TestOutcome>,
    },
}

pub struct Installer {
    logger: TaskLogger,
    env: KegEnv,
    db: KegDatabase,
    options: InstallOptions,
}

impl Installer {
    pub fn new(logger: TaskLogger, env: KegEnv, options: InstallOptions) -> Result<Self> {
        env.ensure_dirs()?;
        let db = KegDatabase::open(&env.db_path())?;
        Ok(Installer {
            logger,
            env,
            db,
            options,
        })
    }

    pub fn db(&self) -> &KegDatabase {
        &self.db
    }

    /// Lints, fetches, verifies, installs, links and tests a formula file.
    pub async fn install(&self, file_path: &Path) -> Result<InstallOutcome> {
        let logger = &self.logger;
        let formula_str = fs::read_to_string(file_path)?;
        let formula = Linter::new(logger.clone())
            .lint_str(&formula_str)
            .ok_or_else(|| Error::InvalidFormula(file_path.display().to_string()))?;

        let log_path = self.env.logs().join(format!("{}.log", formula.name));
        if let Err(err) = logger.move_log_file(&log_path) {
            debug!("keeping log at its original path: {}", err);
        }

        self.install_formula(&formula, &formula_str).await
    }

    pub async fn install_formula(
        &self,
        formula: &Formula,
        formula_str: &str,
    ) -> Result<InstallOutcome> {
        let logger = &self.logger;
        let name = &formula.name;
        let version = &formula.version;
        let keg = self.env.keg_path(name, version);
        if !self.env.is_keg_path(name, &keg) {
            return Err(Error::InvalidFormula(format!(
                "'{}' {} does not name a keg directory",
                name, version
            )));
        }
        let formula_hash = compute_formula_hash(formula_str);

        let existing = self.db.get_install(name)?;
        let decision = InstallDecision::evaluate(
            existing.as_ref(),
            version,
            &formula.sha256,
            &formula_hash,
            keg.is_dir(),
            self.options.force,
        );
        if !decision.should_install {
            logger.info(format!(
                "{} {} is already installed and up-to-date",
                name.bright_cyan(),
                version
            ));
            return Ok(InstallOutcome::Unchanged {
                name: name.clone(),
                version: version.clone(),
                keg,
            });
        }
        debug!("install decision for {}: {:?}", name, decision.reason);

        let archive = fetch_source(formula, &self.env, logger).await?;

        let work_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(self.env.tmp())?;
        let source_root = extract(&archive, work_dir.path(), &formula.archive_name())?;
        debug!("source root: {}", source_root.display());

        let staging = self.env.staging_path(name, version);
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;

        let staged = self.stage(formula, formula_str, &formula_hash, &source_root, &staging);
        let receipt = match staged {
            Ok(receipt) => receipt,
            Err(err) => {
                self.discard_staging(name, &staging);
                return Err(err);
            }
        };

        let linker = Linker::new(&self.env, logger);
        let links = plan_links(&self.env, &keg, &receipt.files);
        if let Err(err) = linker.check_conflicts(name, &links, self.options.overwrite) {
            self.discard_staging(name, &staging);
            return Err(err);
        }

        let previous_keg = existing
            .as_ref()
            .map(|record| PathBuf::from(&record.keg_path))
            .filter(|path| path.is_dir() && self.env.is_keg_path(name, path));
        let linked = self.commit(&linker, name, version, &links, previous_keg.as_deref())?;
        if let Some(old) = previous_keg.filter(|old| *old != keg) {
            logger.info(format!("Removing previous keg {}", old.display()));
            remove_dir_if_exists(&old)?;
        }
        logger.info(format!("Linked {} file(s) into {}", linked, self.env.prefix.display()));

        let action = decision.action();
        let mut record = InstallRecord::new(
            name.clone(),
            version.clone(),
            formula.sha256.clone(),
            formula_hash,
            formula.url.clone(),
            keg.to_string_lossy().into_owned(),
        );
        if self.options.skip_test || formula.test.is_empty() {
            record.test_status = TestStatus::Skipped;
        }
        self.db.record_install(&record, action)?;

        logger.success(format!(
            "Installed {} {} to {}",
            name.bright_cyan(),
            version,
            keg.display()
        ));

        let test = if self.options.skip_test {
            None
        } else if formula.test.is_empty() {
            logger.warn(format!("{} has no test block", name));
            None
        } else {
            Some(self.run_self_test(formula, &keg).await?)
        };

        Ok(InstallOutcome::Installed {
            name: name.clone(),
            version: version.clone(),
            keg,
            action,
            test,
        })
    }

    /// Moves the staged keg into place and links it. On failure the keg that
    /// was installed before, and its links, are put back.
    fn commit(
        &self,
        linker: &Linker,
        name: &str,
        version: &str,
        links: &[Link],
        previous: Option<&Path>,
    ) -> Result<usize> {
        let mut commit = Commit {
            staging: self.env.staging_path(name, version),
            keg: self.env.keg_path(name, version),
            backup: self.env.backup_path(name, version),
            previous,
            unlinked: false,
            moved_aside: false,
            renamed: false,
        };
        match commit.apply(linker, links) {
            Ok(linked) => {
                if commit.moved_aside {
                    remove_dir_if_exists(&commit.backup)?;
                }
                Ok(linked)
            }
            Err(err) => {
                self.logger
                    .warn(format!("Commit of {} failed, restoring previous state", name));
                for failure in commit.rollback(&self.env, linker) {
                    self.logger.warn(format!("Rollback: {}", failure));
                }
                self.discard_staging(name, &commit.staging);
                Err(err)
            }
        }
    }

    fn discard_staging(&self, name: &str, staging: &Path) {
        if let Err(err) = remove_dir_if_exists(staging) {
            self.logger
                .warn(format!("Failed to remove {}: {}", staging.display(), err));
        }
        // Only succeeds when nothing else is installed under the rack
        let _ = fs::remove_dir(self.env.rack(name));
    }

    fn stage(
        &self,
        formula: &Formula,
        formula_str: &str,
        formula_hash: &str,
        source_root: &Path,
        staging: &Path,
    ) -> Result<InstallReceipt> {
        let mut files = Vec::new();
        for step in &formula.install {
            files.extend(self.install_step(formula, step, source_root, staging)?);
        }
        Ok(Finalize::new(staging).update(formula, formula_str, formula_hash, &files)?)
    }

    fn install_step(
        &self,
        formula: &Formula,
        step: &InstallStep,
        source_root: &Path,
        staging: &Path,
    ) -> Result<Vec<InstalledFile>> {
        let dir_rel = step.dir.relative_path(&formula.name);
        let dest_dir = staging.join(&dir_rel);
        fs::create_dir_all(&dest_dir)?;

        let root = fs::canonicalize(source_root)?;
        let mut installed = Vec::new();
        for source in resolve_sources(source_root, step)? {
            let file_name = match step.target {
                Some(ref target) => target.clone(),
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::MissingSource {
                        path: step.source.clone(),
                    })?,
            };

            let dest = dest_dir.join(&file_name);
            for copied in copy_tree(&root, &source, &dest, step.dir.is_executable())? {
                let rel = dir_rel.join(copied.strip_prefix(&dest_dir).unwrap_or(&copied));
                installed.push(InstalledFile::new(step.dir, rel));
            }
            self.logger.info(format!(
                "{}.install {} -> {}",
                step.dir,
                step.source,
                dir_rel.join(&file_name).display()
            ));
        }
        Ok(installed)
    }

    async fn run_self_test(&self, formula: &Formula, keg: &Path) -> Result<TestOutcome> {
        let outcome = SelfTest::new(&self.logger, self.options.test_timeout)
            .run(formula, keg)
            .await;

        if outcome.passed() {
            self.logger
                .success(format!("{} passed its self-test", formula.name.bright_cyan()));
            self.db
                .record_test_result(&formula.name, TestStatus::Passed, None)?;
        } else {
            self.logger.warn(format!(
                "{} self-test failed: {}",
                formula.name, outcome
            ));
            self.db.record_test_result(
                &formula.name,
                TestStatus::Failed,
                Some(&outcome.to_string()),
            )?;
        }
        Ok(outcome)
    }

    /// Re-runs the self-test of an installed formula.
    pub async fn test(&self, name: &str) -> Result<Option<TestOutcome>> {
        let record = self
            .db
            .get_install(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let keg = PathBuf::from(&record.keg_path);

        let formula_path = kept_formula(&keg, &record.name);
        let formula_str = fs::read_to_string(&formula_path)?;
        let (formula, _) = Formula::parse_str(&formula_str)
            .map_err(|err| Error::InvalidFormula(format!("{}: {}", formula_path.display(), err)))?;

        if formula.test.is_empty() {
            self.logger.warn(format!("{} has no test block", name));
            self.db
                .record_test_result(&record.name, TestStatus::Skipped, None)?;
            return Ok(None);
        }
        Ok(Some(self.run_self_test(&formula, &keg).await?))
    }

    /// Unlinks and deletes an installed keg and drops it from the registry.
    pub fn uninstall(&self, name: &str) -> Result<InstallRecord> {
        let record = self
            .db
            .get_install(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let keg = PathBuf::from(&record.keg_path);

        if !self.env.is_keg_path(&record.name, &keg) {
            self.logger.warn(format!(
                "Registry path {} is not a keg of {}, leaving it in place",
                keg.display(),
                record.name
            ));
        } else if keg.is_dir() {
            let removed = Linker::new(&self.env, &self.logger).unlink_keg(&keg)?;
            debug!("removed {} link(s) for {}", removed, name);
            remove_dir_if_exists(&keg)?;
        } else {
            self.logger
                .warn(format!("Keg {} is already gone", keg.display()));
        }

        let rack = self.env.rack(&record.name);
        if fs::read_dir(&rack).is_ok_and(|mut entries| entries.next().is_none()) {
            fs::remove_dir(&rack)?;
        }

        let record = self.db.remove_install(&record.name)?;
        self.logger.success(format!(
            "Uninstalled {} {}",
            record.name.bright_cyan(),
            record.version
        ));
        Ok(record)
    }
}

/// Filesystem steps of a commit, tracked so a failure can be undone.
struct Commit<'a> {
    staging: PathBuf,
    keg: PathBuf,
    backup: PathBuf,
    previous: Option<&'a Path>,
    unlinked: bool,
    moved_aside: bool,
    renamed: bool,
}

impl Commit<'_> {
    fn apply(&mut self, linker: &Linker, links: &[Link]) -> Result<usize> {
        remove_dir_if_exists(&self.backup)?;
        if let Some(old) = self.previous {
            // Set first so a partial unlink is still relinked
            self.unlinked = true;
            linker.unlink_keg(old)?;
        }
        if self.keg.exists() {
            fs::rename(&self.keg, &self.backup)?;
            self.moved_aside = true;
        }
        fs::rename(&self.staging, &self.keg)?;
        self.renamed = true;
        linker.link(links)
    }

    /// Best effort; returns what could not be undone.
    fn rollback(&self, env: &KegEnv, linker: &Linker) -> Vec<String> {
        let mut failures = Vec::new();
        if self.renamed {
            if let Err(err) = linker.unlink_keg(&self.keg) {
                failures.push(format!("unlinking {}: {}", self.keg.display(), err));
            }
            if let Err(err) = remove_dir_if_exists(&self.keg) {
                failures.push(format!("removing {}: {}", self.keg.display(), err));
            }
        }
        if self.moved_aside {
            if let Err(err) = fs::rename(&self.backup, &self.keg) {
                failures.push(format!("restoring {}: {}", self.keg.display(), err));
            }
        }
        if let Some(old) = self.previous.filter(|_| self.unlinked) {
            let relinked = InstallReceipt::read(old)
                .and_then(|receipt| linker.link(&plan_links(env, old, &receipt.files)));
            if let Err(err) = relinked {
                failures.push(format!("relinking {}: {}", old.display(), err));
            }
        }
        failures
    }
}

fn resolve_sources(source_root: &Path, step: &InstallStep) -> Result<Vec<PathBuf>> {
    if step.has_glob() {
        let pattern = format!(
            "{}/{}",
            Pattern::escape(&source_root.to_string_lossy()),
            step.source
        );
        let matches = glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .collect::<Vec<_>>();
        if matches.is_empty() {
            return Err(Error::MissingSource {
                path: step.source.clone(),
            });
        }
        return Ok(matches);
    }

    let path = source_root.join(&step.source);
    if fs::symlink_metadata(&path).is_err() {
        return Err(Error::MissingSource {
            path: step.source.clone(),
        });
    }
    Ok(vec![path])
}

/// Copies a file or directory tree, returning the copied file paths.
/// Symlinks are followed only while they stay inside `root`, the
/// canonical extraction directory.
fn copy_tree(root: &Path, src: &Path, dest: &Path, executable: bool) -> Result<Vec<PathBuf>> {
    copy_entry(root, src, dest, executable, &mut Vec::new())
}

fn copy_entry(
    root: &Path,
    src: &Path,
    dest: &Path,
    executable: bool,
    ancestors: &mut Vec<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let outside = || Error::SourceOutsideArchive {
        path: src.display().to_string(),
    };
    let real = fs::canonicalize(src).map_err(|_| outside())?;
    // A directory reached again through a symlink would recurse forever
    if !real.starts_with(root) || ancestors.contains(&real) {
        return Err(outside());
    }

    if real.is_dir() {
        fs::create_dir_all(dest)?;
        ancestors.push(real.clone());
        let mut copied = Vec::new();
        for entry in fs::read_dir(&real)? {
            let name = entry?.file_name();
            copied.extend(copy_entry(
                root,
                &src.join(&name),
                &dest.join(&name),
                executable,
                ancestors,
            )?);
        }
        ancestors.pop();
        return Ok(copied);
    }

    fs::copy(&real, dest)?;
    if executable {
        let mut perms = fs::metadata(dest)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(dest, perms)?;
    }
    Ok(vec![dest.to_path_buf()])
}
