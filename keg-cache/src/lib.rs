//! keg-cache: install registry for keg
//!
//! This crate provides:
//! - SQLite-based tracking of installed formulae
//! - Install/upgrade/uninstall history
//! - Reinstall decision support

pub mod db;
pub mod error;
pub mod models;
pub mod schema;

pub use db::KegDatabase;
pub use error::{Error, Result};
pub use models::*;
