//! Environment inspection.
//!
//! Captures what the local host runs (OS, database engine, PHP versions and
//! their loaded extensions) as an immutable [`EnvironmentSnapshot`]. Capture
//! never fails: anything unreadable degrades to a sentinel so a manifest can
//! always be written.

pub mod extensions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::utils::command::CommandRunner;
pub use extensions::{ExtensionCatalog, PhpModuleCatalog};

/// Sentinel for an absent or unreadable value.
pub const NONE_SENTINEL: &str = "NONE";

/// A PHP major/minor release as named by the panel, e.g. `php74`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion(String);

impl RuntimeVersion {
    /// Accepts `php74` or the bare `74` directory naming.
    pub fn parse(name: &str) -> Option<Self> {
        let digits = name.strip_prefix("php").unwrap_or(name);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(RuntimeVersion(format!("php{}", digits)))
    }

    /// `php74`
    pub fn id(&self) -> &str {
        &self.0
    }

    /// `74`
    pub fn digits(&self) -> &str {
        &self.0[3..]
    }

    /// `7.4`
    pub fn dotted(&self) -> String {
        let digits = self.digits();
        if digits.len() < 2 {
            return digits.to_string();
        }
        format!("{}.{}", &digits[..1], &digits[1..])
    }

    /// Orders `php56 < php74 < php8 < php81`.
    pub fn sort_key(&self) -> (u32, u32) {
        let digits = self.digits();
        let major = digits[..1].parse().unwrap_or(0);
        let minor = digits[1..].parse().unwrap_or(0);
        (major, minor)
    }

    /// Template variables for install/service command lines.
    pub fn template_vars(&self) -> [(&'static str, String); 3] {
        [
            ("version", self.dotted()),
            ("id", self.id().to_string()),
            ("digits", self.digits().to_string()),
        ]
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RuntimeVersion::parse(&value).ok_or_else(|| format!("invalid runtime version: {}", value))
    }
}

impl From<RuntimeVersion> for String {
    fn from(value: RuntimeVersion) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// `mysql`, `mariadb`, or [`NONE_SENTINEL`]
    pub engine: String,
    pub version: String,
}

impl DatabaseInfo {
    pub fn none() -> Self {
        Self {
            engine: NONE_SENTINEL.to_string(),
            version: NONE_SENTINEL.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.engine == NONE_SENTINEL
    }

    /// Major.minor release line, e.g. `5.7` for `5.7.40`.
    pub fn series(&self) -> String {
        self.version.split('.').take(2).collect::<Vec<_>>().join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Installed versions, ascending
    pub versions: Vec<RuntimeVersion>,

    /// Loaded extensions per version, when captured
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<RuntimeVersion, Vec<String>>,
}

/// What the host looked like at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub os: String,
    pub database: DatabaseInfo,
    pub php: RuntimeInfo,
    pub captured_at: DateTime<Utc>,
}

/// Reads the local host.
pub struct Inspector<'a> {
    config: &'a EnvironmentConfig,
    runner: &'a dyn CommandRunner,
    catalog: &'a dyn ExtensionCatalog,
}

impl<'a> Inspector<'a> {
    pub fn new(
        config: &'a EnvironmentConfig,
        runner: &'a dyn CommandRunner,
        catalog: &'a dyn ExtensionCatalog,
    ) -> Self {
        Self {
            config,
            runner,
            catalog,
        }
    }

    pub fn capture(&self) -> EnvironmentSnapshot {
        let os = read_os_identifier(&self.config.os_release);
        let database = self.database_info();
        let versions = list_runtime_versions(&self.config.runtime_dir);

        let extensions = versions
            .iter()
            .map(|v| (v.clone(), self.catalog.list_extensions(v).into_iter().collect()))
            .collect();

        info!(
            "Captured environment: os={:?}, database={} {}, php={:?}",
            os,
            database.engine,
            database.version,
            versions.iter().map(|v| v.id()).collect::<Vec<_>>()
        );

        EnvironmentSnapshot {
            os,
            database,
            php: RuntimeInfo {
                versions,
                extensions,
            },
            captured_at: Utc::now(),
        }
    }

    /// Installed database engine, or the `NONE` sentinel.
    pub fn database_info(&self) -> DatabaseInfo {
        let client = self.config.database_client.as_str();
        if !self.runner.has_tool(client) {
            debug!("Database client {} not found", client);
            return DatabaseInfo::none();
        }

        match self.runner.run(client, &["-V"]) {
            Ok(out) if out.success() => {
                parse_database_version(&out.stdout).unwrap_or_else(DatabaseInfo::none)
            }
            Ok(out) => {
                warn!("{} -V exited with {}", client, out.exit_code);
                DatabaseInfo::none()
            }
            Err(e) => {
                warn!("Failed to query {}: {}", client, e);
                DatabaseInfo::none()
            }
        }
    }

    /// Installed runtime versions only, skipping extension enumeration.
    pub fn runtime_versions(&self) -> Vec<RuntimeVersion> {
        list_runtime_versions(&self.config.runtime_dir)
    }
}

/// `PRETTY_NAME`, else `ID VERSION_ID`, else `unknown`.
fn read_os_identifier(path: &Path) -> String {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return "unknown".to_string();
        }
    };

    let fields: BTreeMap<&str, String> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').to_string()))
        .collect();

    if let Some(pretty) = fields.get("PRETTY_NAME").filter(|v| !v.is_empty()) {
        return pretty.clone();
    }
    match (fields.get("ID"), fields.get("VERSION_ID")) {
        (Some(id), Some(ver)) => format!("{} {}", id, ver),
        (Some(id), None) => id.clone(),
        _ => "unknown".to_string(),
    }
}

/// Parse `mysql -V` output.
///
/// ```text
/// mysql  Ver 14.14 Distrib 5.7.40, for Linux (x86_64) using  EditLine wrapper
/// mysql  Ver 8.0.30 for Linux on x86_64 (Source distribution)
/// mysql  Ver 15.1 Distrib 10.6.12-MariaDB, for debian-linux-gnu (x86_64)
/// ```
pub fn parse_database_version(output: &str) -> Option<DatabaseInfo> {
    let line = output.lines().next()?.trim();

    let raw = if let Some((_, rest)) = line.split_once("Distrib ") {
        rest.split(|c: char| c == ',' || c.is_whitespace()).next()?
    } else {
        let (_, rest) = line.split_once("Ver ")?;
        rest.split_whitespace().next()?
    };

    let (engine, version) = match raw.split_once("-MariaDB") {
        Some((ver, _)) => ("mariadb", ver),
        None if line.contains("MariaDB") => ("mariadb", raw),
        None => ("mysql", raw),
    };

    if version.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    Some(DatabaseInfo {
        engine: engine.to_string(),
        version: version.to_string(),
    })
}

/// Version directories under `runtime_dir`, ascending; empty when absent.
pub fn list_runtime_versions(runtime_dir: &Path) -> Vec<RuntimeVersion> {
    let entries = match std::fs::read_dir(runtime_dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!("Runtime directory {} not present", runtime_dir.display());
            return Vec::new();
        }
    };

    let mut versions: Vec<RuntimeVersion> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| RuntimeVersion::parse(&entry.file_name().to_string_lossy()))
        .collect();

    versions.sort_by_key(|v| v.sort_key());
    versions.dedup();
    versions
}
