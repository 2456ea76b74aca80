//! Shared fixtures for unit tests: a fake panel host laid out under a temp dir.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::archive::{Archiver, Manifest};
use crate::config::Config;
use crate::inspect::{DatabaseInfo, EnvironmentSnapshot, RuntimeInfo, RuntimeVersion};

pub struct FixtureHost {
    pub source: TempDir,
    pub destination: TempDir,
    pub config: Config,
}

impl FixtureHost {
    /// Web root, data dir, panel dir, `php74` + `php81`, and a crontab.
    pub fn new() -> Self {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        let base = source.path();

        let mut config = Config::default();
        let rebase = |p: &PathBuf| base.join(p.strip_prefix("/").unwrap_or(p));
        config.backup.roots = config.backup.roots.iter().map(rebase).collect();
        config.backup.required_prefixes = config.backup.required_prefixes.iter().map(rebase).collect();
        config.backup.dir = base.join("backup");
        config.environment.os_release = base.join("etc/os-release");
        config.environment.runtime_dir = base.join("www/server/php");
        config.restore.root = destination.path().to_path_buf();
        config.restore.require_root = false;
        config.restore.web_root = base.join("www/wwwroot");

        let host = Self {
            source,
            destination,
            config,
        };

        for dir in [
            "/www/wwwroot/example.com",
            "/www/server/data/shop",
            "/www/server/panel/data",
            "/www/server/php/php74/bin",
            "/www/server/php/php81/bin",
        ] {
            std::fs::create_dir_all(host.path(dir)).unwrap();
        }
        std::fs::write(host.path("/www/wwwroot/example.com/index.php"), "<?php echo 'hi';").unwrap();
        std::fs::write(host.path("/www/server/data/shop/orders.ibd"), vec![7u8; 4096]).unwrap();
        std::fs::write(host.path("/www/server/panel/data/port.pl"), "8888").unwrap();
        std::fs::create_dir_all(host.path("/etc")).unwrap();
        std::fs::write(host.path("/etc/crontab"), "30 2 * * * root /www/server/cron/job\n").unwrap();
        std::fs::write(
            host.path("/etc/os-release"),
            "ID=debian\nVERSION_ID=\"12\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n",
        )
        .unwrap();

        host
    }

    /// Absolute host path `p` relocated under the fixture's source dir.
    pub fn path(&self, p: &str) -> PathBuf {
        self.source.path().join(p.trim_start_matches('/'))
    }

    /// Where `p` from the source host lands after extraction.
    pub fn restored(&self, p: &str) -> PathBuf {
        let absolute = self.path(p);
        self.destination
            .path()
            .join(crate::archive::entry_name(&absolute))
    }

    pub fn manifest(&self, versions: &[&str], database: Option<(&str, &str)>) -> Manifest {
        let database = match database {
            Some((engine, version)) => DatabaseInfo {
                engine: engine.into(),
                version: version.into(),
            },
            None => DatabaseInfo::none(),
        };
        Manifest::new(
            EnvironmentSnapshot {
                os: "Debian GNU/Linux 12 (bookworm)".into(),
                database,
                php: RuntimeInfo {
                    versions: versions.iter().filter_map(|v| RuntimeVersion::parse(v)).collect(),
                    extensions: Default::default(),
                },
                captured_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    /// Archive the configured roots with a default manifest; unsealed.
    pub fn archive(&self) -> PathBuf {
        let manifest = self.manifest(&["php74", "php81"], Some(("mysql", "5.7.40")));
        self.archive_with(&manifest)
    }

    pub fn archive_with(&self, manifest: &Manifest) -> PathBuf {
        Archiver::new(&self.config.backup)
            .create(&self.config.backup.roots, manifest)
            .unwrap()
            .path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup.dir
    }
}
