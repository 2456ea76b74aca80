//! Utility modules shared by every pipeline stage.

pub mod command;
pub mod errors;
pub mod logger;
pub mod prompt;

pub use errors::{FailureClass, IntegrityKind, MigrateError, Result};
