use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Package not installed: {0}")]
    NotInstalled(String),
}

pub type Result<T> = std::result::Result<T, Error>;
