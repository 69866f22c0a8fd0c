use std::{
    fs::{self, File},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::mpsc,
    time::Duration,
};

use flate2::{write::GzEncoder, Compression};
use keg::{
    checksum::sha256sum, Error, InstallOptions, InstallOutcome, Installer, KegEnv, TestOutcome,
};
use keg_cache::{HistoryAction, TestStatus};
use keg_linter::logger::{LogManager, LogMessage};

const HELP_SCRIPT: &[u8] = b"#!/bin/sh\necho \"usage: mrgitclean [--help]\"\n";

struct Fixture {
    dir: tempfile::TempDir,
    env: KegEnv,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let env = KegEnv::new(dir.path().join("prefix"), None);
        Fixture { dir, env }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Builds `v<version>.tar.gz` the way GitHub archives look: one
    /// top-level directory holding `bin/mrgitclean`.
    fn tarball(&self, version: &str, script: &[u8]) -> PathBuf {
        let dir = self.path(&format!("dist-{}", version));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("v{}.tar.gz", version));

        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(script.len() as u64);
        // Executable bit is added by `bin.install`
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("mrgitclean-{}/bin/mrgitclean", version),
                script,
            )
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn formula(&self, tarball: &Path, sha256: &str, install_source: &str) -> PathBuf {
        let content = format!(
            r##"class Mrgitclean < Formula
  desc "Friendly tool to clean up merged Git branches"
  homepage "https://github.com/yourusername/mrgitclean"
  url "file://{}"
  sha256 "{}"
  license "MIT"

  def install
    bin.install "{}"
  end

  test do
    system "#{{bin}}/mrgitclean", "--help"
  end
end
"##,
            tarball.display(),
            sha256,
            install_source
        );
        let path = self.path(&format!("mrgitclean-{}.formula", sha256));
        fs::write(&path, content).unwrap();
        path
    }

    fn installer(&self, options: InstallOptions) -> (Installer, mpsc::Receiver<LogMessage>) {
        let (tx, rx) = mpsc::channel();
        let logger = LogManager::new(tx).create_logger(None);
        (Installer::new(logger, self.env.clone(), options).unwrap(), rx)
    }

    fn linked_bin(&self) -> PathBuf {
        self.env.prefix.join("bin/mrgitclean")
    }
}

#[tokio::test]
async fn test_install_places_executable_and_passes_self_test() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions::default());

    let outcome = installer.install(&formula).await.unwrap();
    let InstallOutcome::Installed {
        keg, action, test, ..
    } = outcome
    else {
        panic!("expected a fresh install");
    };
    assert_eq!(action, HistoryAction::Install);
    assert_eq!(test, Some(TestOutcome::Passed));
    assert_eq!(keg, fx.env.keg_path("mrgitclean", "1.0.0"));

    let installed = keg.join("bin/mrgitclean");
    assert_eq!(fs::read(&installed).unwrap(), HELP_SCRIPT);
    let mode = fs::metadata(&installed).unwrap().permissions().mode();
    assert_eq!(mode & 0o755, 0o755);

    assert_eq!(fs::read_link(fx.linked_bin()).unwrap(), installed);
    assert!(keg.join("INSTALL_RECEIPT.json").is_file());
    assert!(keg.join("CHECKSUM").is_file());

    let record = installer.db().get_install("mrgitclean").unwrap().unwrap();
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.test_status, TestStatus::Passed);
}

#[tokio::test]
async fn test_checksum_mismatch_installs_nothing() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &"ab".repeat(32), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions::default());

    let err = installer.install(&formula).await.unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { ref expected, .. } if *expected == "ab".repeat(32)));

    assert!(!fx.env.keg_path("mrgitclean", "1.0.0").exists());
    assert!(fs::symlink_metadata(fx.linked_bin()).is_err());
    assert!(!fx
        .env
        .download_path("mrgitclean", "1.0.0", "v1.0.0.tar.gz")
        .exists());
    assert!(installer.db().get_install("mrgitclean").unwrap().is_none());
}

#[tokio::test]
async fn test_missing_source_leaves_no_partial_keg() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/nope");
    let (installer, _rx) = fx.installer(InstallOptions::default());

    let err = installer.install(&formula).await.unwrap_err();
    assert!(matches!(err, Error::MissingSource { ref path } if path == "bin/nope"));
    assert!(err.to_string().contains("bin/nope"));

    assert!(!fx.env.keg_path("mrgitclean", "1.0.0").exists());
    assert!(!fx.env.staging_path("mrgitclean", "1.0.0").exists());
    assert!(fs::symlink_metadata(fx.linked_bin()).is_err());
    assert!(installer.db().get_install("mrgitclean").unwrap().is_none());
}

#[tokio::test]
async fn test_reinstall_is_noop_then_upgrade() {
    let fx = Fixture::new();
    let v1 = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula_v1 = fx.formula(&v1, &sha256sum(&v1).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions::default());

    installer.install(&formula_v1).await.unwrap();
    let again = installer.install(&formula_v1).await.unwrap();
    assert!(matches!(again, InstallOutcome::Unchanged { ref version, .. } if version == "1.0.0"));

    let v2 = fx.tarball("1.1.0", HELP_SCRIPT);
    let formula_v2 = fx.formula(&v2, &sha256sum(&v2).unwrap(), "bin/mrgitclean");
    let upgraded = installer.install(&formula_v2).await.unwrap();
    assert!(matches!(
        upgraded,
        InstallOutcome::Installed {
            action: HistoryAction::Upgrade,
            ..
        }
    ));

    let new_keg = fx.env.keg_path("mrgitclean", "1.1.0");
    assert!(!fx.env.keg_path("mrgitclean", "1.0.0").exists());
    assert_eq!(
        fs::read_link(fx.linked_bin()).unwrap(),
        new_keg.join("bin/mrgitclean")
    );

    let history = installer.db().history(Some("mrgitclean"), 10).unwrap();
    assert!(history.iter().any(|h| h.action == HistoryAction::Upgrade));
}

#[tokio::test]
async fn test_force_reinstalls_same_version() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");

    let (installer, _rx) = fx.installer(InstallOptions::default());
    installer.install(&formula).await.unwrap();
    drop(installer);

    let (forced, _rx) = fx.installer(InstallOptions {
        force: true,
        skip_test: true,
        ..Default::default()
    });
    let outcome = forced.install(&formula).await.unwrap();
    assert!(matches!(
        outcome,
        InstallOutcome::Installed {
            action: HistoryAction::Reinstall,
            test: None,
            ..
        }
    ));
    assert!(fx.linked_bin().exists());
    let record = forced.db().get_install("mrgitclean").unwrap().unwrap();
    assert_eq!(record.test_status, TestStatus::Skipped);
}

#[tokio::test]
async fn test_failing_self_test_keeps_package() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", b"#!/bin/sh\necho broken >&2\nexit 2\n");
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    let (installer, rx) = fx.installer(InstallOptions {
        test_timeout: Duration::from_secs(10),
        ..Default::default()
    });

    let outcome = installer.install(&formula).await.unwrap();
    let InstallOutcome::Installed { test, .. } = outcome else {
        panic!("expected an install");
    };
    assert!(matches!(test, Some(TestOutcome::Failed { status: Some(2), .. })));

    assert!(fx.linked_bin().exists());
    let record = installer.db().get_install("mrgitclean").unwrap().unwrap();
    assert_eq!(record.test_status, TestStatus::Failed);

    // Re-running the test reports the same failure
    let rerun = installer.test("mrgitclean").await.unwrap();
    assert!(matches!(rerun, Some(TestOutcome::Failed { .. })));

    drop(installer);
    let messages: Vec<LogMessage> = rx.try_iter().collect();
    assert!(messages
        .iter()
        .any(|m| matches!(m, LogMessage::CustomError(s) if s == "broken")));
    assert!(messages
        .iter()
        .any(|m| matches!(m, LogMessage::Warn(s) if s.contains("self-test failed"))));
}

#[tokio::test]
async fn test_link_conflict_aborts_before_commit() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    fs::create_dir_all(fx.env.prefix.join("bin")).unwrap();
    fs::write(fx.linked_bin(), b"not ours").unwrap();

    let (installer, _rx) = fx.installer(InstallOptions::default());
    let err = installer.install(&formula).await.unwrap_err();
    assert!(matches!(err, Error::LinkConflict { .. }));
    assert!(!fx.env.keg_path("mrgitclean", "1.0.0").exists());
    assert_eq!(fs::read(fx.linked_bin()).unwrap(), b"not ours");

    let (installer, _rx) = fx.installer(InstallOptions {
        overwrite: true,
        ..Default::default()
    });
    installer.install(&formula).await.unwrap();
    assert!(fs::symlink_metadata(fx.linked_bin())
        .unwrap()
        .file_type()
        .is_symlink());
}

#[tokio::test]
async fn test_uninstall_removes_links_and_keg() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions::default());
    installer.install(&formula).await.unwrap();

    let record = installer.uninstall("mrgitclean").unwrap();
    assert_eq!(record.version, "1.0.0");
    assert!(fs::symlink_metadata(fx.linked_bin()).is_err());
    assert!(!fx.env.rack("mrgitclean").exists());
    assert!(installer.db().get_install("mrgitclean").unwrap().is_none());

    assert!(matches!(
        installer.uninstall("mrgitclean"),
        Err(Error::NotInstalled(_))
    ));
}

#[tokio::test]
async fn test_version_outside_the_rack_is_refused() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula_path = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions::default());
    installer.install(&formula_path).await.unwrap();

    let formula_str = fs::read_to_string(&formula_path).unwrap();
    let (mut formula, _) = keg_linter::formula::Formula::parse_str(&formula_str).unwrap();
    for version in ["..", "."] {
        formula.version = version.to_string();
        let err = installer
            .install_formula(&formula, &formula_str)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormula(_)));
    }

    let keg = fx.env.keg_path("mrgitclean", "1.0.0");
    assert!(keg.join("bin/mrgitclean").is_file());
    assert_eq!(fs::read_link(fx.linked_bin()).unwrap(), keg.join("bin/mrgitclean"));
}

#[tokio::test]
async fn test_failed_commit_restores_previous_keg() {
    let fx = Fixture::new();
    let v1 = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula_v1 = fx.formula(&v1, &sha256sum(&v1).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions {
        skip_test: true,
        ..Default::default()
    });
    installer.install(&formula_v1).await.unwrap();

    // v2 also installs into sbin, and <prefix>/sbin is a dangling symlink:
    // the conflict check sees nothing there but linking cannot create it
    let v2 = fx.tarball("1.1.0", HELP_SCRIPT);
    let formula_v2 = fx.formula(&v2, &sha256sum(&v2).unwrap(), "bin/mrgitclean");
    let content = fs::read_to_string(&formula_v2).unwrap().replace(
        "    bin.install \"bin/mrgitclean\"\n",
        "    bin.install \"bin/mrgitclean\"\n    sbin.install \"bin/mrgitclean\" => \"mrgitclean-admin\"\n",
    );
    fs::write(&formula_v2, content).unwrap();
    std::os::unix::fs::symlink(fx.path("nowhere"), fx.env.prefix.join("sbin")).unwrap();

    assert!(installer.install(&formula_v2).await.is_err());

    let old_keg = fx.env.keg_path("mrgitclean", "1.0.0");
    assert!(old_keg.join("bin/mrgitclean").is_file());
    assert_eq!(
        fs::read_link(fx.linked_bin()).unwrap(),
        old_keg.join("bin/mrgitclean")
    );
    assert!(!fx.env.keg_path("mrgitclean", "1.1.0").exists());
    assert!(!fx.env.staging_path("mrgitclean", "1.1.0").exists());
    let record = installer.db().get_install("mrgitclean").unwrap().unwrap();
    assert_eq!(record.version, "1.0.0");
}

#[tokio::test]
async fn test_forced_reinstall_failure_keeps_existing_keg() {
    let fx = Fixture::new();
    let tarball = fx.tarball("1.0.0", HELP_SCRIPT);
    let formula = fx.formula(&tarball, &sha256sum(&tarball).unwrap(), "bin/mrgitclean");
    let (installer, _rx) = fx.installer(InstallOptions {
        skip_test: true,
        ..Default::default()
    });
    installer.install(&formula).await.unwrap();

    let content = fs::read_to_string(&formula).unwrap().replace(
        "    bin.install \"bin/mrgitclean\"\n",
        "    bin.install \"bin/mrgitclean\"\n    sbin.install \"bin/mrgitclean\" => \"mrgitclean-admin\"\n",
    );
    fs::write(&formula, content).unwrap();
    std::os::unix::fs::symlink(fx.path("nowhere"), fx.env.prefix.join("sbin")).unwrap();

    // The formula changed, so this replaces the keg of the same version
    assert!(installer.install(&formula).await.is_err());

    let keg = fx.env.keg_path("mrgitclean", "1.0.0");
    assert!(keg.join("bin/mrgitclean").is_file());
    assert!(!keg.join("sbin").exists());
    assert_eq!(fs::read_link(fx.linked_bin()).unwrap(), keg.join("bin/mrgitclean"));
    assert!(!fx.env.backup_path("mrgitclean", "1.0.0").exists());
}
