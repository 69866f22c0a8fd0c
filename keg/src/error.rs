use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Cache(#[from] keg_cache::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Invalid formula: {0}")]
    InvalidFormula(String),

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        expected: String,
        actual: String,
        path: PathBuf,
    },

    #[error("Source file not found in archive: {path}")]
    MissingSource { path: String },

    #[error("Source {path} resolves outside the extracted archive or loops back on itself")]
    SourceOutsideArchive { path: String },

    #[error("Cannot link {}: file exists and is not managed by keg (use --overwrite)", path.display())]
    LinkConflict { path: PathBuf },

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("Package not installed: {0}")]
    NotInstalled(String),

    #[error("Unsupported source URL: {0}")]
    UnsupportedUrl(String),
}

pub type Result<T> = std::result::Result<T, Error>;
