//! Archive creation and extraction.
//!
//! One gzip-compressed tar per backup run: the manifest first, then every
//! configured root in configured order, each walked with sorted directory
//! listings so an unchanged filesystem produces the same entry sequence.
//! Entry names are the absolute source paths without the leading `/`.

pub mod manifest;
pub mod naming;

use chrono::Local;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive as TarArchive, Builder as TarBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::BackupConfig;
use crate::utils::errors::{IntegrityKind, MigrateError, Result};
pub use manifest::{Manifest, MANIFEST_FILENAME};
pub use naming::{digest_path, list_archives, ArchiveName};

/// A finished archive on disk.
#[derive(Debug, Clone)]
pub struct Archive {
    pub path: PathBuf,
    pub name: ArchiveName,
    pub manifest: Manifest,

    /// Configured roots that did not exist and were left out
    pub skipped_roots: Vec<PathBuf>,

    /// Number of tar entries, manifest included
    pub entries: usize,

    pub size_bytes: u64,
}

pub struct Archiver<'a> {
    config: &'a BackupConfig,
}

impl<'a> Archiver<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        Self { config }
    }

    /// Pack `roots` plus `manifest` into `<backup dir>/<prefix>_<timestamp>.tar.gz`.
    ///
    /// Missing roots are skipped with a warning. Fails when none of them exist
    /// or the backup directory cannot be written.
    pub fn create(&self, roots: &[PathBuf], manifest: &Manifest) -> Result<Archive> {
        let (present, skipped): (Vec<&PathBuf>, Vec<&PathBuf>) =
            roots.iter().partition(|root| root.symlink_metadata().is_ok());

        for root in &skipped {
            warn!("Backup root {} does not exist, skipping", root.display());
        }
        if present.is_empty() {
            return Err(MigrateError::Precondition(format!(
                "none of the {} configured backup roots exist",
                roots.len()
            )));
        }

        let backup_dir = &self.config.dir;
        std::fs::create_dir_all(backup_dir).map_err(|e| not_writable(backup_dir, e))?;

        let manifest_path = manifest.write_to(backup_dir).map_err(|e| match e {
            MigrateError::Io(io) => not_writable(backup_dir, io),
            other => other,
        })?;
        debug!("Wrote manifest to {}", manifest_path.display());

        let name = ArchiveName::new(&self.config.prefix, Local::now().naive_local());
        let path = backup_dir.join(name.file_name());
        if path.exists() {
            return Err(MigrateError::Precondition(format!(
                "archive {} already exists",
                path.display()
            )));
        }
        let partial = backup_dir.join(format!("{}.partial", name.file_name()));

        info!(archive = %path.display(), "Creating archive from {} roots", present.len());

        let file = File::create(&partial).map_err(|e| not_writable(backup_dir, e))?;
        let encoder = GzEncoder::new(
            BufWriter::new(file),
            Compression::new(self.config.compression_level),
        );
        let mut tar = TarBuilder::new(encoder);
        tar.follow_symlinks(false);

        tar.append_path_with_name(&manifest_path, MANIFEST_FILENAME)?;
        let mut entries = 1;

        for root in &present {
            let added = append_root(&mut tar, root)?;
            info!("Archived {} ({} entries)", root.display(), added);
            entries += added;
        }

        let encoder = tar.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| MigrateError::Io(e.into_error()))?
            .sync_all()?;

        std::fs::rename(&partial, &path)?;
        let size_bytes = std::fs::metadata(&path)?.len();

        info!(
            archive = %path.display(),
            "Archive complete: {} entries, {} bytes",
            entries,
            size_bytes
        );

        Ok(Archive {
            path,
            name,
            manifest: manifest.clone(),
            skipped_roots: skipped.into_iter().cloned().collect(),
            entries,
            size_bytes,
        })
    }
}

fn not_writable(dir: &Path, e: std::io::Error) -> MigrateError {
    MigrateError::Precondition(format!(
        "backup directory {} is not writable: {}",
        dir.display(),
        e
    ))
}

/// Archive-internal name for an absolute path: the path without its root.
pub fn entry_name(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

/// Walk one root in sorted order and append every entry. Unreadable entries
/// are skipped with a warning; write errors on the archive are fatal.
fn append_root<W: Write>(tar: &mut TarBuilder<W>, root: &Path) -> Result<usize> {
    let mut added = 0;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let path = entry.path();
        let name = entry_name(path);
        if name.as_os_str().is_empty() {
            continue;
        }
        let file_type = entry.file_type();

        if file_type.is_dir() {
            tar.append_dir(&name, path)?;
        } else if file_type.is_file() {
            let mut file = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            tar.append_file(&name, &mut file)?;
        } else if file_type.is_symlink() {
            tar.append_path_with_name(path, &name)?;
        } else {
            debug!("Skipping special file {}", path.display());
            continue;
        }
        added += 1;
    }

    Ok(added)
}

fn open_archive(path: &Path) -> Result<TarArchive<GzDecoder<BufReader<File>>>> {
    let file = File::open(path)?;
    Ok(TarArchive::new(GzDecoder::new(BufReader::new(file))))
}

/// Read the manifest bundled in an archive without extracting anything else.
pub fn read_manifest(archive: &Path) -> Result<Manifest> {
    let unreadable =
        |e: std::io::Error| MigrateError::integrity(archive, IntegrityKind::Unreadable(e.to_string()));

    let mut tar = open_archive(archive)?;
    for entry in tar.entries().map_err(unreadable)? {
        let mut entry = entry.map_err(unreadable)?;
        let is_manifest = entry.path().map_err(unreadable)? == Path::new(MANIFEST_FILENAME);
        if !is_manifest {
            continue;
        }
        let mut content = String::new();
        entry.read_to_string(&mut content).map_err(unreadable)?;
        return Manifest::from_json(&content).map_err(|e| {
            MigrateError::integrity(archive, IntegrityKind::BadManifest(e.to_string()))
        });
    }

    Err(MigrateError::integrity(
        archive,
        IntegrityKind::BadManifest(format!("no {} entry", MANIFEST_FILENAME)),
    ))
}

/// Extract the bundled manifest alone into `dir`, returning it and its path.
pub fn extract_manifest(archive: &Path, dir: &Path) -> Result<(Manifest, PathBuf)> {
    let manifest = read_manifest(archive)?;
    std::fs::create_dir_all(dir)?;
    let path = manifest.write_to(dir)?;
    Ok((manifest, path))
}

/// Unpack every entry except the manifest under `root`, overwriting what is
/// there. Entries that would land outside `root` are refused.
pub fn extract(archive: &Path, root: &Path) -> Result<usize> {
    let mut tar = open_archive(archive)?;
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let mut unpacked = 0;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        if name == Path::new(MANIFEST_FILENAME) {
            continue;
        }
        if entry.unpack_in(root)? {
            unpacked += 1;
        } else {
            warn!("Refusing to extract {} outside {}", name.display(), root.display());
        }
    }

    info!("Extracted {} entries under {}", unpacked, root.display());
    Ok(unpacked)
}
