//! keg: installs packages described by formula files
//!
//! - Fetching and SHA-256 verification of source archives
//! - Archive extraction
//! - Running install steps into a versioned keg
//! - Linking kegs into the prefix
//! - Post-install self-tests

pub mod checksum;
pub mod cleanup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod installer;
pub mod link;
pub mod smoke;
pub mod types;

pub use error::{Error, Result};
pub use installer::{InstallOptions, InstallOutcome, Installer};
pub use smoke::TestOutcome;
pub use types::KegEnv;
