//! One function per CLI subcommand.
//!
//! Each runs synchronously to completion; `main` decides about locking and
//! runs the mutating ones on a blocking thread.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::{digest_path, list_archives, Archive, Archiver, Manifest};
use crate::config::Config;
use crate::inspect::{EnvironmentSnapshot, Inspector, PhpModuleCatalog};
use crate::integrity::{Provenance, Verifier};
use crate::restore::{Orchestrator, RestoreOptions, RestoreSummary};
use crate::transfer::{DigestStatus, FetchOutcome, Negotiator, RemoteTarget, SshSession};
use crate::utils::command::CommandRunner;
use crate::utils::errors::{MigrateError, Result};
use crate::utils::prompt::Prompter;

/// Capture the local environment.
pub fn inspect(config: &Config, runner: &dyn CommandRunner) -> EnvironmentSnapshot {
    let catalog = PhpModuleCatalog::new(&config.environment.runtime_dir, runner);
    Inspector::new(&config.environment, runner, &catalog).capture()
}

/// Inspect, archive, seal, and verify the fresh pair.
pub fn backup(config: &Config, runner: &dyn CommandRunner) -> Result<Archive> {
    let snapshot = inspect(config, runner);
    let manifest = Manifest::new(snapshot, Utc::now());

    let archive = Archiver::new(&config.backup).create(&config.backup.roots, &manifest)?;
    for root in &archive.skipped_roots {
        warn!("Not in archive (absent on this host): {}", root.display());
    }

    crate::integrity::seal(&archive.path)?;
    Verifier::new(&config.backup.required_prefixes).ensure(&archive.path, Provenance::LocalThisRun)?;

    info!(archive = %archive.path.display(), "Backup complete");
    Ok(archive)
}

/// `archive`, or the newest archive in the backup directory.
pub fn resolve_archive(config: &Config, archive: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = archive {
        return Ok(path.to_path_buf());
    }
    list_archives(&config.backup.dir, &config.backup.prefix)?
        .into_iter()
        .next()
        .map(|(path, _)| path)
        .ok_or_else(|| {
            MigrateError::Precondition(format!(
                "no {}_*.tar.gz archive in {}",
                config.backup.prefix,
                config.backup.dir.display()
            ))
        })
}

/// Full verification against the sidecar; a missing sidecar is a failure.
pub fn verify(config: &Config, archive: Option<&Path>) -> Result<PathBuf> {
    let archive = resolve_archive(config, archive)?;
    Verifier::new(&config.backup.required_prefixes)
        .verify(&archive, &digest_path(&archive))?
        .into_result(&archive)?;
    info!(archive = %archive.display(), "OK");
    Ok(archive)
}

/// Fetch the newest remote archive over one SSH session.
pub fn download(
    config: &Config,
    target: RemoteTarget,
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
) -> Result<FetchOutcome> {
    let session = SshSession::connect(target, &config.transfer)?;
    let outcome = Negotiator::new(config, runner, prompter).fetch(&session)?;
    if outcome.status == DigestStatus::Unverifiable {
        warn!(
            archive = %outcome.archive.display(),
            "Downloaded WITHOUT a digest; restore will refuse it until a sealed copy is fetched"
        );
    }
    Ok(outcome)
}

pub fn restore(
    config: &Config,
    archive: Option<&Path>,
    dry_run: bool,
    replace_database: bool,
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
) -> Result<RestoreSummary> {
    let options = RestoreOptions {
        archive: resolve_archive(config, archive)?,
        dry_run,
        replace_database,
    };
    let catalog = PhpModuleCatalog::new(&config.environment.runtime_dir, runner);
    Orchestrator::new(config, runner, &catalog, prompter).run(&options)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedArchive {
    pub path: PathBuf,
    pub created: String,
    pub size_bytes: u64,
    pub sealed: bool,
}

/// Archives in the backup directory, newest first.
pub fn list(config: &Config) -> Result<Vec<ListedArchive>> {
    list_archives(&config.backup.dir, &config.backup.prefix)?
        .into_iter()
        .map(|(path, name)| -> Result<ListedArchive> {
            Ok(ListedArchive {
                size_bytes: std::fs::metadata(&path)?.len(),
                sealed: digest_path(&path).is_file(),
                created: name.created.format("%Y-%m-%d %H:%M:%S").to_string(),
                path,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixtureHost;
    use crate::utils::command::fake::ScriptedRunner;
    use crate::utils::errors::{FailureClass, IntegrityKind};

    #[test]
    fn test_backup_seals_and_lists() {
        let host = FixtureHost::new();
        let runner = ScriptedRunner::new();

        let archive = backup(&host.config, &runner).unwrap();
        assert!(digest_path(&archive.path).is_file());
        assert_eq!(archive.manifest.environment.database.engine, "NONE");
        assert!(!archive.skipped_roots.is_empty());

        let listed = list(&host.config).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].sealed);
        assert_eq!(listed[0].path, archive.path);

        assert_eq!(verify(&host.config, None).unwrap(), archive.path);
    }

    #[test]
    fn test_verify_without_digest_fails() {
        let host = FixtureHost::new();
        let archive = host.archive();

        let err = verify(&host.config, Some(archive.as_path())).unwrap_err();
        assert_eq!(err.class(), FailureClass::Integrity);
        assert!(matches!(
            err,
            MigrateError::Integrity {
                kind: IntegrityKind::MissingDigest,
                ..
            }
        ));
        assert!(!list(&host.config).unwrap()[0].sealed);
    }

    #[test]
    fn test_resolve_archive_on_empty_dir() {
        let host = FixtureHost::new();
        let err = resolve_archive(&host.config, None).unwrap_err();
        assert_eq!(err.class(), FailureClass::Precondition);
    }

    #[test]
    fn test_backup_without_any_root_is_precondition() {
        let mut host = FixtureHost::new();
        host.config.backup.roots = vec![host.path("/nonexistent/a"), host.path("/nonexistent/b")];

        let err = backup(&host.config, &ScriptedRunner::new()).unwrap_err();
        assert_eq!(err.class(), FailureClass::Precondition);
    }
}
