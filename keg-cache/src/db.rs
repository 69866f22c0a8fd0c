//! Database operations for the install registry

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::*;
use crate::schema::{CREATE_SCHEMA, SCHEMA_VERSION};

const INSTALL_COLUMNS: &str = "id, name, version, sha256, formula_hash, source_url, keg_path,
                               test_status, installed_at, updated_at";

/// SQLite install registry
pub struct KegDatabase {
    conn: Connection,
}

impl KegDatabase {
    /// Open or create a registry database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        let needs_init: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_info'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count == 0)?;

        if needs_init {
            debug!("Creating install registry schema v{}", SCHEMA_VERSION);
            self.conn.execute_batch(CREATE_SCHEMA)?;
            self.conn.execute(
                "INSERT INTO schema_info (version, description) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, "Initial schema"],
            )?;
        }

        Ok(())
    }

    /// Insert or replace the record of an installed formula and log the action
    pub fn record_install(&self, record: &InstallRecord, action: HistoryAction) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO installs (name, version, sha256, formula_hash, source_url, keg_path,
                                   test_status, installed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(name) DO UPDATE SET
                version = ?2,
                sha256 = ?3,
                formula_hash = ?4,
                source_url = ?5,
                keg_path = ?6,
                test_status = ?7,
                updated_at = ?8",
            params![
                record.name,
                record.version,
                record.sha256,
                record.formula_hash,
                record.source_url,
                record.keg_path,
                record.test_status.as_str(),
                now
            ],
        )?;

        self.add_history(&record.name, &record.version, action, None)
    }

    /// Store the outcome of a self-test
    pub fn record_test_result(
        &self,
        name: &str,
        status: TestStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let record = self
            .get_install(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE installs SET test_status = ?1, updated_at = ?2 WHERE name = ?3",
            params![status.as_str(), now, name],
        )?;

        let detail = match detail {
            Some(detail) => format!("{}: {}", status, detail),
            None => status.to_string(),
        };
        self.add_history(&record.name, &record.version, HistoryAction::Test, Some(&detail))
    }

    /// Get an installed formula by name
    pub fn get_install(&self, name: &str) -> Result<Option<InstallRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM installs WHERE name = ?1", INSTALL_COLUMNS),
                params![name],
                Self::row_to_install_record,
            )
            .optional()?;

        Ok(result)
    }

    /// List all installed formulae
    pub fn list_installs(&self) -> Result<Vec<InstallRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM installs ORDER BY name",
            INSTALL_COLUMNS
        ))?;

        let rows = stmt.query_map([], Self::row_to_install_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Sqlite)
    }

    /// Remove an installed formula, keeping its history
    pub fn remove_install(&self, name: &str) -> Result<InstallRecord> {
        let record = self
            .get_install(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        self.conn
            .execute("DELETE FROM installs WHERE name = ?1", params![name])?;
        self.add_history(&record.name, &record.version, HistoryAction::Uninstall, None)?;
        Ok(record)
    }

    /// Recent history, newest first, optionally for one formula
    pub fn history(&self, name: Option<&str>, limit: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, version, action, action_date, detail
             FROM install_history
             WHERE ?1 IS NULL OR name = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![name, limit], |row| {
            Ok(HistoryEntry {
                id: Some(row.get(0)?),
                name: row.get(1)?,
                version: row.get(2)?,
                action: row
                    .get::<_, String>(3)
                    .ok()
                    .and_then(|s| HistoryAction::from_str(&s))
                    .unwrap_or(HistoryAction::Install),
                action_date: parse_date(row.get::<_, String>(4).ok()),
                detail: row.get(5)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Sqlite)
    }

    fn add_history(
        &self,
        name: &str,
        version: &str,
        action: HistoryAction,
        detail: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO install_history (name, version, action, action_date, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, version, action.as_str(), Utc::now().to_rfc3339(), detail],
        )?;
        Ok(())
    }

    /// Helper to convert row to InstallRecord
    fn row_to_install_record(row: &rusqlite::Row) -> rusqlite::Result<InstallRecord> {
        Ok(InstallRecord {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: row.get(2)?,
            sha256: row.get(3)?,
            formula_hash: row.get(4)?,
            source_url: row.get(5)?,
            keg_path: row.get(6)?,
            test_status: row
                .get::<_, String>(7)
                .ok()
                .and_then(|s| TestStatus::from_str(&s))
                .unwrap_or(TestStatus::Pending),
            installed_at: parse_date(row.get::<_, String>(8).ok()),
            updated_at: parse_date(row.get::<_, String>(9).ok()),
        })
    }
}

fn parse_date(value: Option<String>) -> DateTime<Utc> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
