//! Reconciliation planning.
//!
//! Compares the environment recorded in a manifest with what the destination
//! host has installed. Pure: nothing here touches the system, the caller
//! supplies the installed state and an extension catalog.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

use crate::archive::Manifest;
use crate::inspect::extensions::is_extension_name;
use crate::inspect::{DatabaseInfo, ExtensionCatalog, Inspector, RuntimeInfo, RuntimeVersion};

/// What the destination has installed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledState {
    pub database: DatabaseInfo,
    pub versions: Vec<RuntimeVersion>,
}

impl InstalledState {
    pub fn capture(inspector: &Inspector<'_>) -> Self {
        Self {
            database: inspector.database_info(),
            versions: inspector.runtime_versions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DatabaseStep {
    /// Installed version matches, or the source had no database
    NoOp,
    /// Nothing installed locally
    Install(DatabaseInfo),
    /// Installed engine/version differs; the operator must choose
    Conflict {
        installed: DatabaseInfo,
        recorded: DatabaseInfo,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "version", rename_all = "snake_case")]
pub enum RuntimeStep {
    NoOp(RuntimeVersion),
    Install(RuntimeVersion),
}

impl RuntimeStep {
    pub fn version(&self) -> &RuntimeVersion {
        match self {
            RuntimeStep::NoOp(v) | RuntimeStep::Install(v) => v,
        }
    }
}

/// Recorded extensions a version lacks on this host; installed only on confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionProposal {
    pub version: RuntimeVersion,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub database: DatabaseStep,
    pub runtimes: Vec<RuntimeStep>,
    /// For versions installed before the restore; the restore appends the
    /// proposals for freshly installed versions once they exist
    pub extensions: Vec<ExtensionProposal>,
}

impl ReconciliationPlan {
    pub fn requires_decision(&self) -> bool {
        matches!(self.database, DatabaseStep::Conflict { .. })
    }

    pub fn runtime_installs(&self) -> impl Iterator<Item = &RuntimeVersion> {
        self.runtimes.iter().filter_map(|step| match step {
            RuntimeStep::Install(v) => Some(v),
            RuntimeStep::NoOp(_) => None,
        })
    }

    /// Every version that is or will be installed after reconciliation.
    pub fn target_versions(&self) -> impl Iterator<Item = &RuntimeVersion> {
        self.runtimes.iter().map(RuntimeStep::version)
    }

    pub fn log(&self) {
        info!("Reconciliation plan:");
        info!("  database: {}", self.database);
        for step in &self.runtimes {
            info!("  runtime:  {}", step);
        }
        if self.runtime_installs().next().is_some() {
            info!("  extensions for new runtimes are compared after they are installed");
        }
        for proposal in &self.extensions {
            info!(
                "  extensions for {} (needs confirmation): {}",
                proposal.version,
                proposal.extensions.join(", ")
            );
        }
    }
}

impl fmt::Display for DatabaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseStep::NoOp => f.write_str("no-op"),
            DatabaseStep::Install(db) => write!(f, "install {} {}", db.engine, db.version),
            DatabaseStep::Conflict { installed, recorded } => write!(
                f,
                "conflict: installed {} {}, archive recorded {} {}",
                installed.engine, installed.version, recorded.engine, recorded.version
            ),
        }
    }
}

impl fmt::Display for RuntimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStep::NoOp(v) => write!(f, "{} no-op", v),
            RuntimeStep::Install(v) => write!(f, "{} install", v),
        }
    }
}

/// Plan the changes needed before `manifest`'s data can be replayed here.
pub fn plan(
    manifest: &Manifest,
    installed: &InstalledState,
    catalog: &dyn ExtensionCatalog,
) -> ReconciliationPlan {
    let recorded = &manifest.environment;

    let database = plan_database(&installed.database, &recorded.database);

    let runtimes: Vec<RuntimeStep> = recorded
        .php
        .versions
        .iter()
        .map(|v| {
            if installed.versions.contains(v) {
                RuntimeStep::NoOp(v.clone())
            } else {
                RuntimeStep::Install(v.clone())
            }
        })
        .collect();

    let present = runtimes.iter().filter_map(|step| match step {
        RuntimeStep::NoOp(v) => Some(v),
        RuntimeStep::Install(_) => None,
    });
    let extensions = propose_extensions(&recorded.php, present, catalog);

    ReconciliationPlan {
        database,
        runtimes,
        extensions,
    }
}

/// Recorded extensions each of `versions` lacks according to `catalog`.
///
/// Names that are not plain extension identifiers are dropped: a manifest
/// arrives inside an archive from another host and its values end up in
/// install commands.
pub fn propose_extensions<'v>(
    recorded: &RuntimeInfo,
    versions: impl IntoIterator<Item = &'v RuntimeVersion>,
    catalog: &dyn ExtensionCatalog,
) -> Vec<ExtensionProposal> {
    versions
        .into_iter()
        .filter_map(|version| {
            let wanted = recorded.extensions.get(version)?;
            let present = catalog.list_extensions(version);
            let missing: BTreeSet<String> = wanted
                .iter()
                .filter(|ext| {
                    let valid = is_extension_name(ext);
                    if !valid {
                        warn!("Ignoring recorded extension {:?} for {}: not an extension name", ext, version);
                    }
                    valid && !present.contains(ext.as_str())
                })
                .cloned()
                .collect();
            (!missing.is_empty()).then(|| ExtensionProposal {
                version: version.clone(),
                extensions: missing.into_iter().collect(),
            })
        })
        .collect()
}

/// Exact match on engine and version string; anything else is a conflict.
fn plan_database(installed: &DatabaseInfo, recorded: &DatabaseInfo) -> DatabaseStep {
    if recorded.is_none() {
        DatabaseStep::NoOp
    } else if installed.is_none() {
        DatabaseStep::Install(recorded.clone())
    } else if installed == recorded {
        DatabaseStep::NoOp
    } else {
        DatabaseStep::Conflict {
            installed: installed.clone(),
            recorded: recorded.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{EnvironmentSnapshot, RuntimeInfo};
    use chrono::Utc;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct StaticCatalog(HashMap<String, BTreeSet<String>>);

    impl StaticCatalog {
        fn with(mut self, version: &str, extensions: &[&str]) -> Self {
            self.0.insert(
                version.to_string(),
                extensions.iter().map(|e| e.to_string()).collect(),
            );
            self
        }
    }

    impl ExtensionCatalog for StaticCatalog {
        fn list_extensions(&self, version: &RuntimeVersion) -> BTreeSet<String> {
            self.0.get(version.id()).cloned().unwrap_or_default()
        }
    }

    fn v(name: &str) -> RuntimeVersion {
        RuntimeVersion::parse(name).unwrap()
    }

    fn db(engine: &str, version: &str) -> DatabaseInfo {
        DatabaseInfo {
            engine: engine.into(),
            version: version.into(),
        }
    }

    fn manifest(versions: &[&str], database: DatabaseInfo, extensions: &[(&str, &[&str])]) -> Manifest {
        let extensions: BTreeMap<RuntimeVersion, Vec<String>> = extensions
            .iter()
            .map(|(ver, exts)| (v(ver), exts.iter().map(|e| e.to_string()).collect()))
            .collect();
        Manifest::new(
            EnvironmentSnapshot {
                os: "CentOS Linux 7 (Core)".into(),
                database,
                php: RuntimeInfo {
                    versions: versions.iter().map(|s| v(s)).collect(),
                    extensions,
                },
                captured_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    fn installed(database: DatabaseInfo, versions: &[&str]) -> InstalledState {
        InstalledState {
            database,
            versions: versions.iter().map(|s| v(s)).collect(),
        }
    }

    #[test]
    fn test_installs_only_missing_runtime() {
        let manifest = manifest(&["php74", "php81"], db("mysql", "5.7.40"), &[]);
        let plan = plan(
            &manifest,
            &installed(db("mysql", "5.7.40"), &["php81"]),
            &StaticCatalog::default(),
        );

        assert_eq!(
            plan.runtimes,
            vec![RuntimeStep::Install(v("php74")), RuntimeStep::NoOp(v("php81"))]
        );
        assert_eq!(plan.runtime_installs().count(), 1);
        assert_eq!(plan.database, DatabaseStep::NoOp);
        assert!(!plan.requires_decision());
        assert!(plan.extensions.is_empty());
    }

    #[test]
    fn test_database_version_difference_requires_decision() {
        let manifest = manifest(&[], db("mysql", "5.7.40"), &[]);
        let plan = plan(
            &manifest,
            &installed(db("mysql", "8.0.30"), &[]),
            &StaticCatalog::default(),
        );

        assert!(plan.requires_decision());
        assert_eq!(
            plan.database,
            DatabaseStep::Conflict {
                installed: db("mysql", "8.0.30"),
                recorded: db("mysql", "5.7.40"),
            }
        );
    }

    #[test]
    fn test_patch_level_difference_is_still_a_conflict() {
        let manifest = manifest(&[], db("mysql", "5.7.40"), &[]);
        let plan = plan(
            &manifest,
            &installed(db("mysql", "5.7.41"), &[]),
            &StaticCatalog::default(),
        );
        assert!(plan.requires_decision());
    }

    #[test]
    fn test_database_install_and_none() {
        let manifest_with_db = manifest(&[], db("mariadb", "10.6.12"), &[]);
        let plan_install = plan(
            &manifest_with_db,
            &installed(DatabaseInfo::none(), &[]),
            &StaticCatalog::default(),
        );
        assert_eq!(plan_install.database, DatabaseStep::Install(db("mariadb", "10.6.12")));

        let manifest_without_db = manifest(&[], DatabaseInfo::none(), &[]);
        let plan_none = plan(
            &manifest_without_db,
            &installed(db("mysql", "8.0.30"), &[]),
            &StaticCatalog::default(),
        );
        assert_eq!(plan_none.database, DatabaseStep::NoOp);
    }

    #[test]
    fn test_extension_proposals_wait_for_runtime_install() {
        let manifest = manifest(
            &["php74", "php81"],
            DatabaseInfo::none(),
            &[("php74", &["redis", "fileinfo"]), ("php81", &["redis", "opcache"])],
        );
        let catalog = StaticCatalog::default().with("php81", &["opcache", "mbstring"]);
        let plan = plan(&manifest, &installed(DatabaseInfo::none(), &["php81"]), &catalog);

        // php74 is not installed yet, so nothing can be compared for it
        assert_eq!(
            plan.extensions,
            vec![ExtensionProposal {
                version: v("php81"),
                extensions: vec!["redis".into()],
            }]
        );

        // after the install the fresh runtime ships fileinfo
        let catalog = catalog.with("php74", &["fileinfo"]);
        let later = propose_extensions(&manifest.environment.php, plan.runtime_installs(), &catalog);
        assert_eq!(
            later,
            vec![ExtensionProposal {
                version: v("php74"),
                extensions: vec!["redis".into()],
            }]
        );
    }

    #[test]
    fn test_unsafe_recorded_extension_names_are_dropped() {
        let manifest = manifest(
            &["php81"],
            DatabaseInfo::none(),
            &[("php81", &["zend opcache", "redis;reboot", "$(id)", "swoole"])],
        );
        let plan = plan(
            &manifest,
            &installed(DatabaseInfo::none(), &["php81"]),
            &StaticCatalog::default(),
        );
        assert_eq!(plan.extensions[0].extensions, vec!["swoole".to_string()]);
    }

    #[test]
    fn test_plan_serializes_with_step_tags() {
        let manifest = manifest(&["php74"], db("mysql", "5.7.40"), &[]);
        let plan = plan(
            &manifest,
            &installed(DatabaseInfo::none(), &[]),
            &StaticCatalog::default(),
        );
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["database"]["step"], "install");
        assert_eq!(json["runtimes"][0]["step"], "install");
        assert_eq!(json["runtimes"][0]["version"], "php74");
    }
}
