//! Restore orchestration.
//!
//! `PRECHECK -> DB_RECONCILE -> RUNTIME_RECONCILE -> EXTRACT -> SERVICE_RESTART
//! -> HEALTH_CHECK -> DONE`, aborting from any stage on a fatal error. Every
//! mutating step is an [`Action`] handed to an [`Interpreter`]; in dry-run mode
//! that interpreter only describes. Service restarts and extension installs
//! are best-effort: failures are collected into the [`RestoreSummary`].

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::action::{Action, DryRunInterpreter, Interpreter, LiveInterpreter};
use crate::archive::{self, Manifest};
use crate::config::Config;
use crate::inspect::{ExtensionCatalog, Inspector, RuntimeVersion};
use crate::integrity::{Provenance, Verifier};
use crate::reconcile::{self, DatabaseStep, InstalledState, ReconciliationPlan};
use crate::utils::command::{render_template, CommandRunner};
use crate::utils::errors::{MigrateError, Result};
use crate::utils::prompt::Prompter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Precheck,
    DbReconcile,
    RuntimeReconcile,
    Extract,
    ServiceRestart,
    HealthCheck,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Precheck => "PRECHECK",
            Stage::DbReconcile => "DB_RECONCILE",
            Stage::RuntimeReconcile => "RUNTIME_RECONCILE",
            Stage::Extract => "EXTRACT",
            Stage::ServiceRestart => "SERVICE_RESTART",
            Stage::HealthCheck => "HEALTH_CHECK",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub archive: PathBuf,
    pub dry_run: bool,
    /// Resolve a database version conflict by replacing the installed engine
    pub replace_database: bool,
}

/// Labels offered when the installed database differs from the archive's.
pub const REPLACE_DATABASE: &str = "replace";
pub const ABORT_RESTORE: &str = "abort";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestEffortFailure {
    pub action: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub services: Vec<ServiceHealth>,
    pub web_root: PathBuf,
    pub web_root_present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub archive: PathBuf,
    pub dry_run: bool,
    pub plan: ReconciliationPlan,
    /// Executed, or in dry-run mode described, in order
    pub actions: Vec<Action>,
    /// Dry run only: a database conflict nobody has decided yet
    pub pending_decision: Option<String>,
    pub failures: Vec<BestEffortFailure>,
    pub health: HealthReport,
}

impl RestoreSummary {
    pub fn log(&self) {
        let verb = if self.dry_run { "would run" } else { "ran" };
        info!("Restore summary for {}", self.archive.display());
        info!("  {} {} action(s)", verb, self.actions.len());
        for action in &self.actions {
            info!("    - {}", action);
        }
        if let Some(pending) = &self.pending_decision {
            warn!("  decision still required: {}", pending);
        }
        for failure in &self.failures {
            warn!("  best-effort failure: {}: {}", failure.action, failure.error);
        }
        for service in &self.health.services {
            info!("  {:<12} {}", service.service, if service.up { "up" } else { "DOWN" });
        }
        info!(
            "  web root {} {}",
            self.health.web_root.display(),
            if self.health.web_root_present { "present" } else { "MISSING" }
        );
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    catalog: &'a dyn ExtensionCatalog,
    prompter: &'a dyn Prompter,
}

/// Mutable state threaded through the stages of one run.
struct Run<'i> {
    interpreter: &'i mut dyn Interpreter,
    actions: Vec<Action>,
    failures: Vec<BestEffortFailure>,
}

impl Run<'_> {
    /// Fatal failures propagate; best-effort ones are recorded and the run goes on.
    fn apply(&mut self, action: Action) -> Result<()> {
        match self.interpreter.apply(&action) {
            Ok(()) => {
                self.actions.push(action);
                Ok(())
            }
            Err(e) if action.is_best_effort() => {
                warn!("{} failed, continuing: {}", action, e);
                self.failures.push(BestEffortFailure {
                    action: action.to_string(),
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        catalog: &'a dyn ExtensionCatalog,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            config,
            runner,
            catalog,
            prompter,
        }
    }

    pub fn run(&self, options: &RestoreOptions) -> Result<RestoreSummary> {
        if options.dry_run {
            info!("DRY RUN: no changes will be made");
            let mut interpreter = DryRunInterpreter::new(&self.config.restore);
            self.run_with(options, &mut interpreter)
        } else {
            let mut interpreter = LiveInterpreter::new(&self.config.restore, self.runner);
            self.run_with(options, &mut interpreter)
        }
    }

    fn run_with(&self, options: &RestoreOptions, interpreter: &mut dyn Interpreter) -> Result<RestoreSummary> {
        let mut stage = Stage::Precheck;
        let result = self.stages(options, interpreter, &mut stage);
        if let Err(e) = &result {
            error!("Restore aborted during {}: {}", stage, e);
        }
        result
    }

    fn enter(stage: &mut Stage, next: Stage) {
        *stage = next;
        info!("== {} ==", next);
    }

    fn stages(
        &self,
        options: &RestoreOptions,
        interpreter: &mut dyn Interpreter,
        stage: &mut Stage,
    ) -> Result<RestoreSummary> {
        let dry_run = interpreter.is_dry_run();
        let mut run = Run {
            interpreter,
            actions: Vec::new(),
            failures: Vec::new(),
        };

        Self::enter(stage, Stage::Precheck);
        let manifest = self.precheck(&options.archive)?;
        let inspector = Inspector::new(&self.config.environment, self.runner, self.catalog);
        let installed = InstalledState::capture(&inspector);
        let mut plan = reconcile::plan(&manifest, &installed, self.catalog);
        plan.log();

        Self::enter(stage, Stage::DbReconcile);
        let pending_decision = self.reconcile_database(&plan, options, dry_run, &mut run)?;

        Self::enter(stage, Stage::RuntimeReconcile);
        for version in plan.runtime_installs() {
            run.apply(Action::InstallRuntime {
                version: version.clone(),
            })?;
        }
        let fresh: Vec<RuntimeVersion> = plan.runtime_installs().cloned().collect();
        plan.extensions
            .extend(reconcile::propose_extensions(&manifest.environment.php, &fresh, self.catalog));
        self.reconcile_extensions(&plan, dry_run, &mut run)?;

        Self::enter(stage, Stage::Extract);
        run.apply(Action::Extract {
            archive: options.archive.clone(),
            root: self.config.restore.root.clone(),
        })?;

        Self::enter(stage, Stage::ServiceRestart);
        let services = self.services(&manifest, &plan);
        for service in &services {
            run.apply(Action::RestartService {
                service: service.clone(),
            })?;
        }

        Self::enter(stage, Stage::HealthCheck);
        let health = self.health_check(&services);

        Self::enter(stage, Stage::Done);
        let summary = RestoreSummary {
            archive: options.archive.clone(),
            dry_run,
            plan,
            actions: run.actions,
            pending_decision,
            failures: run.failures,
            health,
        };
        summary.log();
        Ok(summary)
    }

    /// Privilege, archive integrity, then the bundled manifest.
    fn precheck(&self, archive_path: &Path) -> Result<Manifest> {
        if self.config.restore.require_root && !nix::unistd::geteuid().is_root() {
            return Err(MigrateError::Precondition("restore must run as root".into()));
        }

        Verifier::new(&self.config.backup.required_prefixes).ensure(archive_path, Provenance::External)?;

        let (manifest, path) = archive::extract_manifest(archive_path, &self.config.backup.dir)?;
        info!(
            "Manifest {}: {} {} from {} (backup {})",
            path.display(),
            manifest.app_name,
            manifest.version,
            manifest.environment.os,
            manifest.backup_date.to_rfc3339()
        );
        Ok(manifest)
    }

    /// Returns the undecided conflict in dry-run mode.
    fn reconcile_database(
        &self,
        plan: &ReconciliationPlan,
        options: &RestoreOptions,
        dry_run: bool,
        run: &mut Run<'_>,
    ) -> Result<Option<String>> {
        match &plan.database {
            DatabaseStep::NoOp => Ok(None),
            DatabaseStep::Install(database) => {
                run.apply(Action::InstallDatabase {
                    database: database.clone(),
                })?;
                Ok(None)
            }
            DatabaseStep::Conflict { installed, recorded } => {
                let conflict = plan.database.to_string();
                let replace = if options.replace_database {
                    true
                } else if dry_run {
                    warn!("{} (a real run will ask: {} or {})", conflict, REPLACE_DATABASE, ABORT_RESTORE);
                    return Ok(Some(conflict));
                } else {
                    let choices = [REPLACE_DATABASE.to_string(), ABORT_RESTORE.to_string()];
                    let idx = self.prompter.choose(&format!("Database {}", conflict), &choices)?;
                    choices.get(idx).map(String::as_str) == Some(REPLACE_DATABASE)
                };

                if !replace {
                    return Err(MigrateError::EnvironmentConflict(format!(
                        "installed database {} {} differs from recorded {} {}",
                        installed.engine, installed.version, recorded.engine, recorded.version
                    )));
                }
                run.apply(Action::ReplaceDatabase {
                    installed: installed.clone(),
                    database: recorded.clone(),
                })?;
                Ok(None)
            }
        }
    }

    /// Recorded extensions missing here; opt-in as one batch.
    fn reconcile_extensions(&self, plan: &ReconciliationPlan, dry_run: bool, run: &mut Run<'_>) -> Result<()> {
        let actions: Vec<Action> = plan
            .extensions
            .iter()
            .flat_map(|proposal| {
                proposal.extensions.iter().map(|extension| Action::InstallExtension {
                    version: proposal.version.clone(),
                    extension: extension.clone(),
                })
            })
            .collect();
        if actions.is_empty() {
            return Ok(());
        }

        if !dry_run {
            let question = format!("Install {} previously loaded PHP extension(s)?", actions.len());
            if !self.prompter.confirm(&question, false)? {
                info!("Skipping {} extension install(s)", actions.len());
                return Ok(());
            }
        }
        for action in actions {
            run.apply(action)?;
        }
        Ok(())
    }

    /// Web server, database, one FastCGI manager per runtime version, panel.
    fn services(&self, manifest: &Manifest, plan: &ReconciliationPlan) -> Vec<String> {
        let restore = &self.config.restore;
        let mut services = vec![restore.web_server_service.clone()];
        if !manifest.environment.database.is_none() {
            services.push(restore.database_service.clone());
        }
        services.extend(plan.target_versions().map(|version| {
            render_template(&restore.runtime_service, &[("digits", version.digits())])
        }));
        services.push(restore.panel_service.clone());
        services
    }

    /// Observational only; nothing here changes the outcome.
    fn health_check(&self, services: &[String]) -> HealthReport {
        let services = services
            .iter()
            .map(|service| {
                let line = render_template(&self.config.restore.status_command, &[("service", service.as_str())]);
                let up = match self.runner.run_shell(&line) {
                    Ok(out) => out.success(),
                    Err(e) => {
                        warn!("Status check for {} failed: {}", service, e);
                        false
                    }
                };
                ServiceHealth {
                    service: service.clone(),
                    up,
                }
            })
            .collect();

        let web_root = self
            .config
            .restore
            .root
            .join(archive::entry_name(&self.config.restore.web_root));
        HealthReport {
            services,
            web_root_present: web_root.is_dir(),
            web_root,
        }
    }
}
