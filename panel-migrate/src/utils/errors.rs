//! Error types for the migration pipeline.
//!
//! Every variant belongs to exactly one [`FailureClass`]. Lower layers return
//! these instead of booleans so the caller can tell a corrupted download from a
//! host that simply lacks `rsync`.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure taxonomy printed on every fatal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Precondition,
    Integrity,
    EnvironmentConflict,
    Transport,
    Internal,
}

impl FailureClass {
    /// Process exit code for this class.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureClass::Precondition => 2,
            FailureClass::Integrity => 3,
            FailureClass::EnvironmentConflict => 4,
            FailureClass::Transport => 5,
            FailureClass::Internal => 1,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Precondition => "precondition",
            FailureClass::Integrity => "integrity",
            FailureClass::EnvironmentConflict => "environment-conflict",
            FailureClass::Transport => "transport",
            FailureClass::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Which integrity check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityKind {
    /// Recomputed digest differs from the sidecar.
    DigestMismatch { expected: String, actual: String },
    /// No sidecar next to the archive and regeneration is not allowed.
    MissingDigest,
    /// The archive cannot be enumerated end to end.
    Unreadable(String),
    /// Required root prefixes are absent from the archive listing.
    MissingContent(Vec<String>),
    /// The archive carries no manifest, or it does not parse.
    BadManifest(String),
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityKind::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch (expected {}, got {})", expected, actual)
            }
            IntegrityKind::MissingDigest => f.write_str("digest sidecar missing"),
            IntegrityKind::Unreadable(e) => write!(f, "archive unreadable: {}", e),
            IntegrityKind::MissingContent(prefixes) => {
                write!(f, "required content missing: {}", prefixes.join(", "))
            }
            IntegrityKind::BadManifest(e) => write!(f, "manifest invalid: {}", e),
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("{0}")]
    Precondition(String),

    #[error("{archive}: {kind}")]
    Integrity { archive: PathBuf, kind: IntegrityKind },

    #[error("{0}")]
    EnvironmentConflict(String),

    #[error("{0}")]
    Transport(String),

    #[error("{action} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        action: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Operation aborted by operator: {0}")]
    Aborted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
}

impl MigrateError {
    pub fn integrity(archive: impl Into<PathBuf>, kind: IntegrityKind) -> Self {
        MigrateError::Integrity {
            archive: archive.into(),
            kind,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            MigrateError::Precondition(_) | MigrateError::Config(_) => FailureClass::Precondition,
            MigrateError::Integrity { .. } => FailureClass::Integrity,
            MigrateError::EnvironmentConflict(_) => FailureClass::EnvironmentConflict,
            MigrateError::Transport(_) | MigrateError::Ssh(_) => FailureClass::Transport,
            MigrateError::CommandFailed { .. }
            | MigrateError::Aborted(_)
            | MigrateError::Io(_)
            | MigrateError::Serialization(_) => {
                FailureClass::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_kinds_share_class_but_not_message() {
        let mismatch = MigrateError::integrity(
            "/tmp/a.tar.gz",
            IntegrityKind::DigestMismatch {
                expected: "aa".into(),
                actual: "bb".into(),
            },
        );
        let missing = MigrateError::integrity(
            "/tmp/a.tar.gz",
            IntegrityKind::MissingContent(vec!["www/wwwroot".into()]),
        );

        assert_eq!(mismatch.class(), FailureClass::Integrity);
        assert_eq!(missing.class(), FailureClass::Integrity);
        assert!(mismatch.to_string().contains("digest mismatch"));
        assert!(missing.to_string().contains("www/wwwroot"));
    }

    #[test]
    fn test_exit_codes_are_non_zero_and_distinct() {
        let classes = [
            FailureClass::Precondition,
            FailureClass::Integrity,
            FailureClass::EnvironmentConflict,
            FailureClass::Transport,
            FailureClass::Internal,
        ];
        let mut codes: Vec<i32> = classes.iter().map(|c| c.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), classes.len());
    }
}
