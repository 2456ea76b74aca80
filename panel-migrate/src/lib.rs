//! Panel host migration library
//!
//! Backs up a panel-managed server (sites, database files, PHP runtimes, web
//! server and cron configuration) into one sealed archive, fetches it onto a
//! replacement host over SSH, and reconciles that host before restoring.

pub mod action;
pub mod archive;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod inspect;
pub mod integrity;
pub mod reconcile;
pub mod restore;
pub mod transfer;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use self::config::Config;
pub use utils::errors::{FailureClass, MigrateError};
pub type Result<T> = std::result::Result<T, MigrateError>;
