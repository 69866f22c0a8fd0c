//! Data models for the install registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the post-install self-test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Pending => "pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "skipped" => Some(TestStatus::Skipped),
            "pending" => Some(TestStatus::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Install,
    Upgrade,
    Reinstall,
    Uninstall,
    Test,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Install => "install",
            HistoryAction::Upgrade => "upgrade",
            HistoryAction::Reinstall => "reinstall",
            HistoryAction::Uninstall => "uninstall",
            HistoryAction::Test => "test",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "install" => Some(HistoryAction::Install),
            "upgrade" => Some(HistoryAction::Upgrade),
            "reinstall" => Some(HistoryAction::Reinstall),
            "uninstall" => Some(HistoryAction::Uninstall),
            "test" => Some(HistoryAction::Test),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An installed formula
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRecord {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub formula_hash: String,
    pub source_url: String,
    pub keg_path: String,
    pub test_status: TestStatus,

    // Timestamps
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallRecord {
    pub fn new(
        name: String,
        version: String,
        sha256: String,
        formula_hash: String,
        source_url: String,
        keg_path: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name,
            version,
            sha256,
            formula_hash,
            source_url,
            keg_path,
            test_status: TestStatus::Pending,
            installed_at: now,
            updated_at: now,
        }
    }
}

/// Install history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub action: HistoryAction,
    pub action_date: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Why an install goes ahead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason")]
pub enum InstallReason {
    /// Never installed before
    NewPackage,
    /// User forced a reinstall
    Forced,
    /// A different version is installed
    Upgrade { from: String, to: String },
    /// Same version but the archive checksum changed
    ChecksumChanged,
    /// Same version but the formula itself changed
    FormulaChanged { old_hash: String, new_hash: String },
    /// The registry knows the package but its keg is gone
    KegMissing,
}

/// Decision about whether to (re)install a formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDecision {
    pub should_install: bool,
    pub reason: Option<InstallReason>,
}

impl InstallDecision {
    pub fn skip() -> Self {
        Self {
            should_install: false,
            reason: None,
        }
    }

    pub fn install(reason: InstallReason) -> Self {
        Self {
            should_install: true,
            reason: Some(reason),
        }
    }

    /// Decides what to do for a formula given its current registry entry.
    pub fn evaluate(
        existing: Option<&InstallRecord>,
        version: &str,
        sha256: &str,
        formula_hash: &str,
        keg_present: bool,
        force: bool,
    ) -> Self {
        let Some(existing) = existing else {
            return Self::install(InstallReason::NewPackage);
        };

        if existing.version != version {
            return Self::install(InstallReason::Upgrade {
                from: existing.version.clone(),
                to: version.to_string(),
            });
        }
        if force {
            return Self::install(InstallReason::Forced);
        }
        if !keg_present {
            return Self::install(InstallReason::KegMissing);
        }
        if !existing.sha256.eq_ignore_ascii_case(sha256) {
            return Self::install(InstallReason::ChecksumChanged);
        }
        if existing.formula_hash != formula_hash {
            return Self::install(InstallReason::FormulaChanged {
                old_hash: existing.formula_hash.clone(),
                new_hash: formula_hash.to_string(),
            });
        }
        Self::skip()
    }

    /// History action to log for this decision.
    pub fn action(&self) -> HistoryAction {
        match self.reason {
            Some(InstallReason::NewPackage) | None => HistoryAction::Install,
            Some(InstallReason::Upgrade { .. }) => HistoryAction::Upgrade,
            Some(_) => HistoryAction::Reinstall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InstallRecord {
        InstallRecord::new(
            "mrgitclean".into(),
            "1.0.0".into(),
            "aa".repeat(32),
            "hash-1".into(),
            "https://example.com/v1.0.0.tar.gz".into(),
            "/opt/keg/Cellar/mrgitclean/1.0.0".into(),
        )
    }

    #[test]
    fn test_decision_new_package() {
        let decision = InstallDecision::evaluate(None, "1.0.0", "x", "h", false, false);
        assert_eq!(decision.reason, Some(InstallReason::NewPackage));
        assert_eq!(decision.action(), HistoryAction::Install);
    }

    #[test]
    fn test_decision_noop_when_unchanged() {
        let existing = record();
        let decision = InstallDecision::evaluate(
            Some(&existing),
            "1.0.0",
            &"AA".repeat(32),
            "hash-1",
            true,
            false,
        );
        assert!(!decision.should_install);
    }

    #[test]
    fn test_decision_upgrade_and_reinstall() {
        let existing = record();
        let upgrade = InstallDecision::evaluate(
            Some(&existing),
            "1.1.0",
            &"aa".repeat(32),
            "hash-1",
            true,
            false,
        );
        assert_eq!(upgrade.action(), HistoryAction::Upgrade);

        let forced = InstallDecision::evaluate(
            Some(&existing),
            "1.0.0",
            &"aa".repeat(32),
            "hash-1",
            true,
            true,
        );
        assert_eq!(forced.reason, Some(InstallReason::Forced));
        assert_eq!(forced.action(), HistoryAction::Reinstall);

        let missing = InstallDecision::evaluate(
            Some(&existing),
            "1.0.0",
            &"aa".repeat(32),
            "hash-1",
            false,
            false,
        );
        assert_eq!(missing.reason, Some(InstallReason::KegMissing));

        let changed = InstallDecision::evaluate(
            Some(&existing),
            "1.0.0",
            &"aa".repeat(32),
            "hash-2",
            true,
            false,
        );
        assert!(matches!(
            changed.reason,
            Some(InstallReason::FormulaChanged { .. })
        ));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::Skipped,
            TestStatus::Pending,
        ] {
            assert_eq!(TestStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TestStatus::from_str("bogus"), None);
    }
}
