//! Advisory run lock on the backup directory.
//!
//! Only one migration operation may touch a backup directory at a time. The
//! lock is an exclusive `flock` on `<backup dir>/.panel-migrate.lock`, held for
//! the life of a [`RunLock`]; the kernel drops it if the process dies.

use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::errors::{MigrateError, Result};

pub const LOCK_FILENAME: &str = ".panel-migrate.lock";

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock without waiting; a held lock is a precondition failure.
    pub fn acquire(backup_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(backup_dir).map_err(|e| {
            MigrateError::Precondition(format!(
                "backup directory {} is not writable: {}",
                backup_dir.display(),
                e
            ))
        })?;

        let path = backup_dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            let holder = std::fs::read_to_string(&path).unwrap_or_default();
            MigrateError::Precondition(format!(
                "another migration holds {} (pid {}): {}",
                path.display(),
                holder.trim(),
                errno
            ))
        })?;

        let mut handle: &File = &lock;
        handle.set_len(0)?;
        writeln!(handle, "{}", std::process::id())?;

        debug!("Acquired run lock {}", path.display());
        Ok(Self { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        debug!("Released run lock {}", self.path.display());
    }
}
