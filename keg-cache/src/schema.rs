//! SQLite schema definitions

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create the database schema
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    version INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    description TEXT
);

-- One row per installed formula
CREATE TABLE IF NOT EXISTS installs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE,
    version TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    formula_hash TEXT NOT NULL,
    source_url TEXT NOT NULL,
    keg_path TEXT NOT NULL,
    test_status TEXT NOT NULL DEFAULT 'pending'
        CHECK(test_status IN ('passed', 'failed', 'skipped', 'pending')),

    -- Timestamps
    installed_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(name)
);

-- Append-only log, kept after uninstall
CREATE TABLE IF NOT EXISTS install_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE,
    version TEXT NOT NULL,
    action TEXT NOT NULL
        CHECK(action IN ('install', 'upgrade', 'reinstall', 'uninstall', 'test')),
    action_date TEXT NOT NULL,
    detail TEXT
);

-- Indexes for common queries
CREATE INDEX IF NOT EXISTS idx_install_history_name ON install_history(name);
CREATE INDEX IF NOT EXISTS idx_install_history_date ON install_history(action_date);
"#;
