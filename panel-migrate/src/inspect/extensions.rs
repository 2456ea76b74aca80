//! PHP extension enumeration.
//!
//! Only dynamically loaded extensions count: a module compiled into the
//! runtime (`Core`, `date`, `pcre`, ...) comes with every install and is never
//! something to reinstall.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::RuntimeVersion;
use crate::utils::command::CommandRunner;

/// Lists the dynamically loaded extensions of a runtime version.
pub trait ExtensionCatalog {
    /// Unknown or uninstalled versions yield an empty set.
    fn list_extensions(&self, version: &RuntimeVersion) -> BTreeSet<String>;
}

/// `*.so` modules in a version's extension directory that its `php -m` reports as loaded.
pub struct PhpModuleCatalog<'a> {
    runtime_dir: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> PhpModuleCatalog<'a> {
    pub fn new(runtime_dir: impl Into<PathBuf>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            runner,
        }
    }

    fn install_dir(&self, version: &RuntimeVersion) -> Option<PathBuf> {
        // the panel names version directories either `php74` or `74`
        [version.id(), version.digits()]
            .iter()
            .map(|dir| self.runtime_dir.join(dir))
            .find(|dir| dir.join("bin").join("php").exists())
    }

    fn loaded_modules(&self, binary: &Path) -> Option<BTreeSet<String>> {
        match self.runner.run(&binary.to_string_lossy(), &["-m"]) {
            Ok(out) if out.success() => Some(parse_module_list(&out.stdout)),
            Ok(out) => {
                tracing::warn!("{} -m exited with {}", binary.display(), out.exit_code);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", binary.display(), e);
                None
            }
        }
    }
}

impl ExtensionCatalog for PhpModuleCatalog<'_> {
    fn list_extensions(&self, version: &RuntimeVersion) -> BTreeSet<String> {
        let Some(dir) = self.install_dir(version) else {
            return BTreeSet::new();
        };

        let shared = shared_modules(&dir.join("lib").join("php").join("extensions"));
        match self.loaded_modules(&dir.join("bin").join("php")) {
            Some(loaded) => shared.intersection(&loaded).cloned().collect(),
            // cannot tell what is enabled; every installed module counts
            None => shared,
        }
    }
}

/// Stems of `*.so` files up to one directory below `extension_dir`
/// (`no-debug-non-zts-<api>/redis.so`).
pub fn shared_modules(extension_dir: &Path) -> BTreeSet<String> {
    WalkDir::new(extension_dir)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.path();
            if path.extension()? != "so" {
                return None;
            }
            let stem = path.file_stem()?.to_string_lossy().to_ascii_lowercase();
            is_extension_name(&stem).then_some(stem)
        })
        .collect()
}

/// Parse `php -m`: section headers are skipped and names normalised to their
/// shared-object stem (`Zend OPcache` is `opcache`).
pub fn parse_module_list(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('['))
        .map(module_stem)
        .filter(|name| is_extension_name(name))
        .collect()
}

fn module_stem(module: &str) -> String {
    let lower = module.to_ascii_lowercase();
    lower.strip_prefix("zend ").unwrap_or(&lower).replace(' ', "_")
}

/// `[a-z0-9_]+`; anything else never reaches an install command.
pub fn is_extension_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
