//! panel-migrate - main entry point
//!
//! Backs up, transfers, verifies and restores a panel-managed host.

use anyhow::Result;
use clap::{Parser, Subcommand};
use panel_migrate::daemon::{RunLock, ShutdownListener, INTERRUPTED_EXIT_CODE};
use panel_migrate::transfer::RemoteTarget;
use panel_migrate::utils::command::SystemRunner;
use panel_migrate::utils::prompt::PresetPrompter;
use panel_migrate::{commands, utils, Config, FailureClass, MigrateError};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Archive this host's roots with an environment manifest and seal the archive
    Backup,

    /// Reconcile this host against an archive and replay it
    Restore {
        /// Archive to restore (default: newest in the backup directory)
        #[arg(long, value_name = "PATH")]
        archive: Option<PathBuf>,

        /// Log every mutating action instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Install previously loaded PHP extensions without asking
        #[arg(short, long)]
        yes: bool,

        /// Replace an installed database engine whose version differs
        #[arg(long)]
        replace_database: bool,
    },

    /// Check an archive against its digest sidecar and required content
    Verify {
        /// Archive to verify (default: newest in the backup directory)
        archive: Option<PathBuf>,
    },

    /// Fetch the newest archive and its digest from a remote host
    Download {
        remote_user: String,
        remote_host: String,
        remote_dir: String,

        /// Answer for a missing transfer tool, instead of asking
        #[arg(long, value_parser = ["install-remote", "install-local", "plain-copy", "abort"])]
        on_missing_tool: Option<String>,
    },

    /// List archives in the backup directory
    List,

    /// Print this host's environment snapshot as JSON
    Inspect,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            let class = e
                .downcast_ref::<MigrateError>()
                .map(MigrateError::class)
                .unwrap_or(FailureClass::Internal);
            tracing::error!("{:#}", e);
            eprintln!("error[{}]: {:#}", class, e);
            class.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::debug!("panel-migrate v{} on {}", env!("CARGO_PKG_VERSION"), host);

    match args.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(0)
        }
        Command::Inspect => {
            let snapshot = commands::inspect(&config, &SystemRunner);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(0)
        }
        Command::List => {
            let archives = commands::list(&config)?;
            if archives.is_empty() {
                println!("No archives in {}", config.backup.dir.display());
            }
            for archive in archives {
                println!(
                    "{}  {:>12}  {}  {}",
                    archive.created,
                    archive.size_bytes,
                    if archive.sealed { "sealed" } else { "missing digest" },
                    archive.path.display()
                );
            }
            Ok(0)
        }
        command => run_locked(config, command).await,
    }
}

/// Run a mutating command on a blocking thread under the run lock, racing SIGINT/SIGTERM.
async fn run_locked(config: Config, command: Command) -> Result<i32> {
    let lock = RunLock::acquire(&config.backup.dir)?;
    let mut shutdown = ShutdownListener::install()?;

    let task = tokio::task::spawn_blocking(move || execute(&config, command));

    tokio::select! {
        joined = task => {
            drop(lock);
            joined??;
            Ok(0)
        }
        _ = shutdown.recv() => {
            drop(lock);
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}

fn execute(config: &Config, command: Command) -> panel_migrate::Result<()> {
    let runner = SystemRunner;
    match command {
        Command::Backup => {
            let archive = commands::backup(config, &runner)?;
            println!("{}", archive.path.display());
        }
        Command::Verify { archive } => {
            let archive = commands::verify(config, archive.as_deref())?;
            println!("OK  {}", archive.display());
        }
        Command::Download {
            remote_user,
            remote_host,
            remote_dir,
            on_missing_tool,
        } => {
            let prompter = PresetPrompter::new(on_missing_tool, false);
            let target = RemoteTarget::new(&remote_user, &remote_host, &remote_dir, config.transfer.ssh_port);
            let outcome = commands::download(config, target, &runner, &prompter)?;
            println!("{}", outcome.archive.display());
        }
        Command::Restore {
            archive,
            dry_run,
            yes,
            replace_database,
        } => {
            let prompter = PresetPrompter::new(None, yes);
            commands::restore(config, archive.as_deref(), dry_run, replace_database, &runner, &prompter)?;
        }
        Command::List | Command::Inspect | Command::Config => {}
    }
    Ok(())
}
