//! Configuration management for the migration tool.
//!
//! Built-in defaults, then an optional TOML file, then `PANEL_MIGRATE__*`
//! environment variables. The resulting [`Config`] is constructed once in
//! `main` and passed by reference to every stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{MigrateError, Result};

/// Environment variable prefix; nesting uses `__`, e.g. `PANEL_MIGRATE__BACKUP__DIR`.
pub const ENV_PREFIX: &str = "PANEL_MIGRATE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    pub environment: EnvironmentConfig,
    pub restore: RestoreConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding archive + digest pairs and the run lock
    pub dir: PathBuf,

    /// Archive filename prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Filesystem roots to archive, in archive order
    pub roots: Vec<PathBuf>,

    /// Roots that must appear in a valid archive
    pub required_prefixes: Vec<PathBuf>,

    /// Gzip level (1-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// os-release file used for the OS identifier
    pub os_release: PathBuf,

    /// Directory containing one sub-directory per installed PHP version
    pub runtime_dir: PathBuf,

    /// Database client binary queried for the engine version
    #[serde(default = "default_database_client")]
    pub database_client: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Filesystem root archive entries are extracted under
    pub root: PathBuf,

    /// Refuse to restore unless running as root
    #[serde(default = "default_true")]
    pub require_root: bool,

    pub web_server_service: String,
    pub database_service: String,
    pub panel_service: String,

    /// FastCGI manager service name, `{digits}` is e.g. `74`
    pub runtime_service: String,

    /// `{service}` placeholder
    pub restart_command: String,

    /// `{service}` placeholder, exit code 0 means running
    pub status_command: String,

    /// `{engine}`, `{version}` (e.g. `5.7.40`) and `{series}` (e.g. `5.7`) placeholders
    pub database_install_command: String,

    /// `{version}` (e.g. `7.4`), `{id}` (e.g. `php74`) and `{digits}` placeholders
    pub runtime_install_command: String,

    /// Runtime placeholders plus `{extension}`
    pub extension_install_command: String,

    /// Directory whose presence the health check reports
    pub web_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Private key for SSH authentication; the ssh agent is tried otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    /// Password authentication, used when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Resumable, progress-capable transfer tool
    #[serde(default = "default_resumable_tool")]
    pub resumable_tool: String,

    /// `{tool}` placeholder, run locally or remotely to install the resumable tool
    pub install_command: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_prefix() -> String {
    "panel_migrate".to_string()
}

fn default_compression_level() -> u32 {
    6
}

fn default_database_client() -> String {
    "mysql".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    22
}

fn default_resumable_tool() -> String {
    "rsync".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        let web_root = PathBuf::from("/www/wwwroot");
        let data_dir = PathBuf::from("/www/server/data");
        let panel_dir = PathBuf::from("/www/server/panel");

        Config {
            backup: BackupConfig {
                dir: PathBuf::from("/www/backup/migration"),
                prefix: default_prefix(),
                roots: vec![
                    web_root.clone(),
                    data_dir.clone(),
                    panel_dir.clone(),
                    PathBuf::from("/www/server/php"),
                    PathBuf::from("/www/server/nginx"),
                    PathBuf::from("/www/server/panel/vhost"),
                    PathBuf::from("/etc/supervisor"),
                    PathBuf::from("/etc/crontab"),
                    PathBuf::from("/var/spool/cron"),
                ],
                required_prefixes: vec![web_root.clone(), panel_dir, data_dir],
                compression_level: default_compression_level(),
            },
            environment: EnvironmentConfig {
                os_release: PathBuf::from("/etc/os-release"),
                runtime_dir: PathBuf::from("/www/server/php"),
                database_client: default_database_client(),
            },
            restore: RestoreConfig {
                root: PathBuf::from("/"),
                require_root: true,
                web_server_service: "nginx".to_string(),
                database_service: "mysqld".to_string(),
                panel_service: "bt".to_string(),
                runtime_service: "php-fpm-{digits}".to_string(),
                restart_command: "/etc/init.d/{service} restart".to_string(),
                status_command: "/etc/init.d/{service} status".to_string(),
                database_install_command:
                    "bash /www/server/panel/install/install_soft.sh 0 install {engine} {series}"
                        .to_string(),
                runtime_install_command:
                    "bash /www/server/panel/install/install_soft.sh 0 install php {version}"
                        .to_string(),
                extension_install_command:
                    "bash /www/server/panel/install/install_soft.sh 0 install {extension} {version}"
                        .to_string(),
                web_root,
            },
            transfer: TransferConfig {
                ssh_port: default_ssh_port(),
                identity_file: None,
                password: None,
                resumable_tool: default_resumable_tool(),
                install_command:
                    "(command -v apt-get >/dev/null 2>&1 && apt-get install -y {tool}) || yum install -y {tool}"
                        .to_string(),
                connect_timeout_secs: default_connect_timeout(),
            },
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| MigrateError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(MigrateError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MigrateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a complete configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MigrateError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.backup.roots.is_empty() {
            return Err(MigrateError::Config("backup.roots must not be empty".into()));
        }
        if !(1..=9).contains(&self.backup.compression_level) {
            return Err(MigrateError::Config(format!(
                "backup.compression_level must be 1-9, got {}",
                self.backup.compression_level
            )));
        }
        if self.backup.prefix.is_empty() || self.backup.prefix.contains('/') {
            return Err(MigrateError::Config(format!(
                "backup.prefix is not a valid file name prefix: {:?}",
                self.backup.prefix
            )));
        }
        Ok(())
    }
}
