//! Archive sealing and verification.
//!
//! The seal is a SHA-256 sidecar (`<archive>.sha256`) holding one
//! `sha256sum`-style line. Verification always recomputes the hash over the
//! archive bytes, then enumerates the whole archive and checks that the
//! required roots are present. Each failure has its own [`Verdict`].

use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::{digest_path, entry_name};
use crate::utils::errors::{IntegrityKind, MigrateError, Result};

/// Where an archive/digest pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Archived by this process during the current run
    LocalThisRun,
    /// Anything else: downloaded, copied, or left by an earlier run
    External,
}

/// Parsed digest sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub hex: String,
    pub file_name: String,
}

impl Digest {
    /// `<hex>  <file name>`
    pub fn to_line(&self) -> String {
        format!("{}  {}\n", self.hex, self.file_name)
    }

    /// Accepts text (`  `) and binary (` *`) mode separators.
    pub fn parse(content: &str) -> Option<Self> {
        let line = content.lines().next()?.trim_end();
        let (hex, rest) = line.split_once(' ')?;
        let file_name = rest.trim_start_matches(' ').trim_start_matches('*');
        if hex.is_empty() || file_name.is_empty() {
            return None;
        }
        Some(Self {
            hex: hex.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

/// Outcome of verifying one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Mismatch { expected: String, actual: String },
    MissingDigest,
    Unreadable(String),
    MissingContent(Vec<String>),
}

impl Verdict {
    pub fn into_result(self, archive: &Path) -> Result<()> {
        let kind = match self {
            Verdict::Ok => return Ok(()),
            Verdict::Mismatch { expected, actual } => IntegrityKind::DigestMismatch { expected, actual },
            Verdict::MissingDigest => IntegrityKind::MissingDigest,
            Verdict::Unreadable(e) => IntegrityKind::Unreadable(e),
            Verdict::MissingContent(prefixes) => IntegrityKind::MissingContent(prefixes),
        };
        Err(MigrateError::integrity(archive, kind))
    }
}

fn file_name_of(archive: &Path) -> String {
    archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// SHA-256 of the archive's exact bytes, lowercase hex.
pub fn compute_digest(archive: &Path) -> io::Result<String> {
    let mut file = BufReader::new(File::open(archive)?);
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest and write the sidecar next to the archive.
pub fn seal(archive: &Path) -> Result<Digest> {
    let digest = Digest {
        hex: compute_digest(archive)?,
        file_name: file_name_of(archive),
    };
    let sidecar = digest_path(archive);
    std::fs::write(&sidecar, digest.to_line())?;
    info!(archive = %archive.display(), "Sealed with sha256 {}", digest.hex);
    Ok(digest)
}

pub struct Verifier<'a> {
    required_prefixes: &'a [PathBuf],
}

impl<'a> Verifier<'a> {
    pub fn new(required_prefixes: &'a [PathBuf]) -> Self {
        Self { required_prefixes }
    }

    /// Verify `archive` against the sidecar at `digest`.
    ///
    /// Errors only when the archive itself cannot be opened; every integrity
    /// finding is a [`Verdict`].
    pub fn verify(&self, archive: &Path, digest: &Path) -> Result<Verdict> {
        if !archive.is_file() {
            return Err(MigrateError::Precondition(format!(
                "archive {} not found",
                archive.display()
            )));
        }

        let recorded = match std::fs::read_to_string(digest) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Verdict::MissingDigest),
            Err(e) => return Err(e.into()),
        };

        let actual = Digest {
            hex: compute_digest(archive)?,
            file_name: file_name_of(archive),
        };

        match Digest::parse(&recorded) {
            Some(expected) if expected == actual => {}
            Some(expected) => {
                return Ok(Verdict::Mismatch {
                    expected: format!("{} {}", expected.hex, expected.file_name),
                    actual: format!("{} {}", actual.hex, actual.file_name),
                })
            }
            None => {
                return Ok(Verdict::Mismatch {
                    expected: recorded.trim().to_string(),
                    actual: actual.hex,
                })
            }
        }

        let entries = match list_entries(archive) {
            Ok(entries) => entries,
            Err(e) => return Ok(Verdict::Unreadable(e.to_string())),
        };

        let missing = self.missing_prefixes(&entries);
        if !missing.is_empty() {
            return Ok(Verdict::MissingContent(missing));
        }

        info!(archive = %archive.display(), "Verified: digest matches, {} entries", entries.len());
        Ok(Verdict::Ok)
    }

    /// Verify the archive against its own sidecar and fail on anything but OK.
    ///
    /// A missing sidecar is regenerated only for archives created in this run.
    pub fn ensure(&self, archive: &Path, provenance: Provenance) -> Result<()> {
        let sidecar = digest_path(archive);
        let verdict = self.verify(archive, &sidecar)?;

        if verdict == Verdict::MissingDigest && provenance == Provenance::LocalThisRun {
            warn!(archive = %archive.display(), "Digest missing for a local archive, resealing");
            seal(archive)?;
            return self.verify(archive, &sidecar)?.into_result(archive);
        }

        verdict.into_result(archive)
    }

    /// Required prefixes with no entry at or below them.
    pub fn missing_prefixes(&self, entries: &[PathBuf]) -> Vec<String> {
        self.required_prefixes
            .iter()
            .map(|p| entry_name(p))
            .filter(|prefix| !entries.iter().any(|entry| entry.starts_with(prefix)))
            .map(|prefix| prefix.display().to_string())
            .collect()
    }

    /// Structural check only, for archives whose digest could not be fetched.
    pub fn check_structure(&self, archive: &Path) -> Result<()> {
        let entries = list_entries(archive).map_err(|e| {
            MigrateError::integrity(archive, IntegrityKind::Unreadable(e.to_string()))
        })?;
        let missing = self.missing_prefixes(&entries);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::integrity(archive, IntegrityKind::MissingContent(missing)))
        }
    }
}

/// Enumerate every entry, reading all data so truncation surfaces as an error.
pub fn list_entries(archive: &Path) -> io::Result<Vec<PathBuf>> {
    let file = BufReader::new(File::open(archive)?);
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));

    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        io::copy(&mut entry, &mut io::sink())?;
        entries.push(path);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixtureHost;

    #[test]
    fn test_digest_line_round_trip() {
        let digest = Digest {
            hex: "ab".repeat(32),
            file_name: "panel_migrate_20240309-140509.tar.gz".into(),
        };
        assert_eq!(Digest::parse(&digest.to_line()), Some(digest.clone()));

        let binary_mode = format!("{} *{}\n", digest.hex, digest.file_name);
        assert_eq!(Digest::parse(&binary_mode), Some(digest));
        assert!(Digest::parse("").is_none());
        assert!(Digest::parse("justonetoken").is_none());
    }

    #[test]
    fn test_seal_then_verify_is_ok() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);

        seal(&archive).unwrap();
        let verdict = verifier.verify(&archive, &digest_path(&archive)).unwrap();
        assert_eq!(verdict, Verdict::Ok);
    }

    #[test]
    fn test_sidecar_matches_sha256sum_format() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let digest = seal(&archive).unwrap();

        let line = std::fs::read_to_string(digest_path(&archive)).unwrap();
        assert_eq!(line, format!("{}  {}\n", digest.hex, file_name_of(&archive)));
        assert_eq!(digest.hex.len(), 64);
    }

    #[test]
    fn test_single_byte_mutation_is_mismatch() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);
        seal(&archive).unwrap();

        let mut bytes = std::fs::read(&archive).unwrap();
        for idx in [0, bytes.len() / 2, bytes.len() - 1] {
            let original = bytes[idx];
            bytes[idx] = original ^ 0x01;
            std::fs::write(&archive, &bytes).unwrap();

            let verdict = verifier.verify(&archive, &digest_path(&archive)).unwrap();
            assert!(matches!(verdict, Verdict::Mismatch { .. }), "byte {} not detected", idx);

            bytes[idx] = original;
        }
    }

    #[test]
    fn test_missing_prefix_is_distinct_from_mismatch() {
        let host = FixtureHost::new();
        std::fs::remove_dir_all(host.path("/www/server/data")).unwrap();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);
        seal(&archive).unwrap();

        let verdict = verifier.verify(&archive, &digest_path(&archive)).unwrap();
        match verdict {
            Verdict::MissingContent(missing) => {
                assert_eq!(missing.len(), 1);
                assert!(missing[0].ends_with("www/server/data"));
            }
            other => panic!("expected MissingContent, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_archive_with_matching_digest_is_unreadable() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);

        let bytes = std::fs::read(&archive).unwrap();
        std::fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();
        // sealed after truncation: the digest is honest, the content is not
        seal(&archive).unwrap();

        let verdict = verifier.verify(&archive, &digest_path(&archive)).unwrap();
        assert!(matches!(verdict, Verdict::Unreadable(_)), "got {:?}", verdict);
    }

    #[test]
    fn test_missing_digest_reported() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);

        let verdict = verifier.verify(&archive, &digest_path(&archive)).unwrap();
        assert_eq!(verdict, Verdict::MissingDigest);
    }

    #[test]
    fn test_ensure_reseals_only_local_archives() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);

        let err = verifier.ensure(&archive, Provenance::External).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Integrity {
                kind: IntegrityKind::MissingDigest,
                ..
            }
        ));
        assert!(!digest_path(&archive).exists());

        verifier.ensure(&archive, Provenance::LocalThisRun).unwrap();
        assert!(digest_path(&archive).exists());
    }

    #[test]
    fn test_renamed_archive_does_not_verify() {
        let host = FixtureHost::new();
        let archive = host.archive();
        let verifier = Verifier::new(&host.config.backup.required_prefixes);
        seal(&archive).unwrap();

        let renamed = archive.with_file_name("panel_migrate_20000101-000000.tar.gz");
        std::fs::rename(&archive, &renamed).unwrap();
        std::fs::rename(digest_path(&archive), digest_path(&renamed)).unwrap();

        let verdict = verifier.verify(&renamed, &digest_path(&renamed)).unwrap();
        assert!(matches!(verdict, Verdict::Mismatch { .. }));
    }
}
