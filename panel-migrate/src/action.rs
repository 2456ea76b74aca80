//! Mutating restore steps as data.
//!
//! The orchestrator builds one [`Action`] sequence and hands it to either a
//! [`LiveInterpreter`] or a [`DryRunInterpreter`], so a dry run considers
//! exactly the actions a real run would execute.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

use crate::archive;
use crate::config::RestoreConfig;
use crate::inspect::{DatabaseInfo, RuntimeVersion};
use crate::utils::command::{render_template, CommandRunner};
use crate::utils::errors::{MigrateError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    InstallDatabase {
        database: DatabaseInfo,
    },
    /// Replace the installed engine; only built after an explicit operator decision
    ReplaceDatabase {
        installed: DatabaseInfo,
        database: DatabaseInfo,
    },
    InstallRuntime {
        version: RuntimeVersion,
    },
    InstallExtension {
        version: RuntimeVersion,
        extension: String,
    },
    Extract {
        archive: PathBuf,
        root: PathBuf,
    },
    RestartService {
        service: String,
    },
}

impl Action {
    /// Failure of this action is logged and reported, never fatal.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Action::InstallExtension { .. } | Action::RestartService { .. })
    }

    /// The shell line a live run executes, `None` for in-process actions.
    pub fn command_line(&self, config: &RestoreConfig) -> Option<String> {
        match self {
            Action::InstallDatabase { database } | Action::ReplaceDatabase { database, .. } => {
                let series = database.series();
                Some(render_template(
                    &config.database_install_command,
                    &[
                        ("engine", database.engine.as_str()),
                        ("version", database.version.as_str()),
                        ("series", series.as_str()),
                    ],
                ))
            }
            Action::InstallRuntime { version } => Some(render_runtime(
                &config.runtime_install_command,
                version,
                &[],
            )),
            Action::InstallExtension { version, extension } => Some(render_runtime(
                &config.extension_install_command,
                version,
                &[("extension", extension.as_str())],
            )),
            Action::RestartService { service } => Some(render_template(
                &config.restart_command,
                &[("service", service.as_str())],
            )),
            Action::Extract { .. } => None,
        }
    }
}

fn render_runtime(template: &str, version: &RuntimeVersion, extra: &[(&str, &str)]) -> String {
    let vars = version.template_vars();
    let mut pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
    pairs.extend_from_slice(extra);
    render_template(template, &pairs)
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::InstallDatabase { database } => {
                write!(f, "install database {} {}", database.engine, database.version)
            }
            Action::ReplaceDatabase { installed, database } => write!(
                f,
                "replace database {} {} with {} {}",
                installed.engine, installed.version, database.engine, database.version
            ),
            Action::InstallRuntime { version } => {
                write!(f, "install PHP {} ({})", version.dotted(), version)
            }
            Action::InstallExtension { version, extension } => {
                write!(f, "install extension {} for PHP {}", extension, version.dotted())
            }
            Action::Extract { archive, root } => {
                write!(f, "extract {} over {}", archive.display(), root.display())
            }
            Action::RestartService { service } => write!(f, "restart service {}", service),
        }
    }
}

/// Consumes an action sequence one step at a time.
pub trait Interpreter {
    fn apply(&mut self, action: &Action) -> Result<()>;

    fn is_dry_run(&self) -> bool;
}

/// Executes actions against the host.
pub struct LiveInterpreter<'a> {
    config: &'a RestoreConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> LiveInterpreter<'a> {
    pub fn new(config: &'a RestoreConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }
}

impl Interpreter for LiveInterpreter<'_> {
    fn apply(&mut self, action: &Action) -> Result<()> {
        info!("Running: {}", action);

        if let Action::Extract { archive, root } = action {
            archive::extract(archive, root)?;
            return Ok(());
        }

        let Some(line) = action.command_line(self.config) else {
            return Ok(());
        };
        let out = self.runner.run_shell(&line)?;
        if !out.success() {
            return Err(MigrateError::CommandFailed {
                action: action.to_string(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Logs what would run; never touches the host.
pub struct DryRunInterpreter<'a> {
    config: &'a RestoreConfig,
}

impl<'a> DryRunInterpreter<'a> {
    pub fn new(config: &'a RestoreConfig) -> Self {
        Self { config }
    }
}

impl Interpreter for DryRunInterpreter<'_> {
    fn apply(&mut self, action: &Action) -> Result<()> {
        match action.command_line(self.config) {
            Some(line) => info!("[dry-run] would {}: {}", action, line),
            None => info!("[dry-run] would {}", action),
        }
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
