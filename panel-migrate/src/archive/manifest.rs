//! Manifest describing the environment that produced an archive.
//!
//! Serialized as `manifest.json`, written to the backup directory before
//! archiving and bundled as the first entry of the archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::inspect::EnvironmentSnapshot;
use crate::utils::errors::Result;

/// Well-known name of the manifest, both in the backup directory and in the archive.
pub const MANIFEST_FILENAME: &str = "manifest.json";

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub app_name: String,
    pub version: String,

    /// `os`, `database`, `php` and `captured_at`, embedded verbatim
    #[serde(flatten)]
    pub environment: EnvironmentSnapshot,

    pub backup_date: DateTime<Utc>,
}

impl Manifest {
    pub fn new(environment: EnvironmentSnapshot, backup_date: DateTime<Utc>) -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            backup_date,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write to `<dir>/manifest.json`, replacing any previous manifest.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILENAME);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{DatabaseInfo, RuntimeInfo, RuntimeVersion};

    fn sample() -> Manifest {
        let environment = EnvironmentSnapshot {
            os: "Ubuntu 22.04.3 LTS".into(),
            database: DatabaseInfo {
                engine: "mysql".into(),
                version: "5.7.40".into(),
            },
            php: RuntimeInfo {
                versions: vec![
                    RuntimeVersion::parse("php74").unwrap(),
                    RuntimeVersion::parse("php81").unwrap(),
                ],
                extensions: Default::default(),
            },
            captured_at: Utc::now(),
        };
        Manifest::new(environment, Utc::now())
    }

    #[test]
    fn test_manifest_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();

        assert_eq!(json["app_name"], "panel-migrate");
        assert!(json["version"].is_string());
        assert_eq!(json["os"], "Ubuntu 22.04.3 LTS");
        assert_eq!(json["database"]["engine"], "mysql");
        assert_eq!(json["database"]["version"], "5.7.40");
        assert_eq!(json["php"]["versions"], serde_json::json!(["php74", "php81"]));
        assert!(json["backup_date"].is_string());
    }

    #[test]
    fn test_manifest_rejects_bad_runtime_version() {
        let mut json: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        json["php"]["versions"] = serde_json::json!(["not-a-version"]);
        assert!(Manifest::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest = sample();
        let path = manifest.write_to(dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), MANIFEST_FILENAME);
        let loaded = Manifest::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, manifest);
    }
}
