//! Fetching the newest archive + digest pair from a remote host.
//!
//! The remote side is reached through a [`RemoteExecutor`]; the local side
//! through a [`CommandRunner`]. Which bulk-transfer method is used is decided
//! by [`negotiate::negotiate`] plus an operator choice when the resumable
//! tool is missing on either end.

pub mod negotiate;
pub mod progress;
pub mod remote;

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::naming::{newest, DIGEST_EXTENSION};
use crate::archive::{digest_path, ArchiveName};
use crate::config::Config;
use crate::integrity::{Provenance, Verifier};
use crate::utils::command::{render_template, CommandRunner};
use crate::utils::errors::{MigrateError, Result};
use crate::utils::prompt::Prompter;

pub use negotiate::{negotiate, FallbackChoice, Negotiation, TransferMethod};
pub use remote::{RemoteExecutor, RemoteTarget, SshSession};

/// Whether the digest sidecar came along with the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStatus {
    /// Sidecar fetched and the pair verified
    Transferred,
    /// No sidecar on the remote; only the archive structure was checked
    Unverifiable,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub archive: PathBuf,
    pub digest: Option<PathBuf>,
    pub status: DigestStatus,
    pub method: TransferMethod,
}

pub struct Negotiator<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
}

impl<'a> Negotiator<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner, prompter: &'a dyn Prompter) -> Self {
        Self {
            config,
            runner,
            prompter,
        }
    }

    /// Fetch and verify the newest remote archive into the local backup dir.
    pub fn fetch(&self, remote: &dyn RemoteExecutor) -> Result<FetchOutcome> {
        let name = self.latest_remote(remote)?;
        info!("Newest remote backup: {}", name);

        let method = self.choose_method(remote)?;
        info!("Transfer method: {}", method);

        let local_dir = &self.config.backup.dir;
        std::fs::create_dir_all(local_dir)?;

        let file_name = name.file_name();
        let digest_name = format!("{}{}", file_name, DIGEST_EXTENSION);
        let local_archive = local_dir.join(&file_name);
        let local_digest = digest_path(&local_archive);

        let remote_digest = remote.target().path_of(&digest_name);
        let has_digest = remote
            .run(&format!("test -f {}", remote::shell_quote(&remote_digest)))?
            .success();

        let mut files = vec![(remote.target().path_of(&file_name), local_archive.clone())];
        if has_digest {
            files.push((remote_digest, local_digest.clone()));
        } else if local_digest.exists() {
            // a sidecar left by an earlier download must not vouch for this archive
            std::fs::remove_file(&local_digest)?;
        }
        self.transfer(method, remote, &files, local_dir)?;

        let verifier = Verifier::new(&self.config.backup.required_prefixes);
        if has_digest {
            verifier.ensure(&local_archive, Provenance::External)?;
            info!(archive = %local_archive.display(), "Downloaded and verified");
            Ok(FetchOutcome {
                archive: local_archive,
                digest: Some(local_digest),
                status: DigestStatus::Transferred,
                method,
            })
        } else {
            verifier.check_structure(&local_archive)?;
            warn!(
                archive = %local_archive.display(),
                "UNVERIFIABLE: remote has no digest sidecar; archive is structurally valid but its content cannot be trusted"
            );
            Ok(FetchOutcome {
                archive: local_archive,
                digest: None,
                status: DigestStatus::Unverifiable,
                method,
            })
        }
    }

    /// Newest archive on the remote by the timestamp in its name.
    pub fn latest_remote(&self, remote: &dyn RemoteExecutor) -> Result<ArchiveName> {
        let target = remote.target();
        let listing = remote.run(&format!("ls -1 {}", remote::shell_quote(&target.dir)))?;
        if !listing.success() {
            return Err(MigrateError::Transport(format!(
                "cannot list {}:{} (exit {})",
                target.login(),
                target.dir,
                listing.exit_code
            )));
        }

        newest(listing.stdout.lines(), &self.config.backup.prefix).ok_or_else(|| {
            MigrateError::Transport(format!(
                "no backup found in {}:{}",
                target.login(),
                target.dir
            ))
        })
    }

    /// Settle on a transfer method, asking the operator when the tool is missing.
    ///
    /// The resumable tool spawns its own non-interactive `ssh`, which cannot
    /// reuse a password login; password-only setups always copy over the
    /// session that is already authenticated.
    pub fn choose_method(&self, remote: &dyn RemoteExecutor) -> Result<TransferMethod> {
        let tool = &self.config.transfer.resumable_tool;
        let transfer = &self.config.transfer;
        if transfer.password.is_some() && transfer.identity_file.is_none() {
            info!("Password authentication: {} not used, copying over the SSH session", tool);
            return Ok(TransferMethod::PlainCopy);
        }
        loop {
            let negotiation = negotiate(self.runner.has_tool(tool), self.remote_has_tool(remote)?);
            let choices = match negotiation {
                Negotiation::Ready(method) => return Ok(method),
                other => other.choices(),
            };

            let options: Vec<String> = choices.iter().map(|c| c.label().to_string()).collect();
            let idx = self.prompter.choose(&negotiation.question(tool), &options)?;
            let choice = choices.get(idx).copied().ok_or_else(|| {
                MigrateError::Precondition(format!("invalid transfer choice #{}", idx))
            })?;
            info!("Transfer fallback: {}", choice);

            match choice {
                FallbackChoice::InstallRemote => self.install_remote(remote)?,
                FallbackChoice::InstallLocal => self.install_local()?,
                FallbackChoice::PlainCopy => return Ok(TransferMethod::PlainCopy),
                FallbackChoice::Abort => {
                    return Err(MigrateError::Aborted(format!("{} unavailable, transfer aborted", tool)))
                }
            }
        }
    }

    fn remote_has_tool(&self, remote: &dyn RemoteExecutor) -> Result<bool> {
        let tool = remote::shell_quote(&self.config.transfer.resumable_tool);
        Ok(remote.run(&format!("command -v {} >/dev/null 2>&1", tool))?.success())
    }

    fn install_command(&self) -> String {
        render_template(
            &self.config.transfer.install_command,
            &[("tool", self.config.transfer.resumable_tool.as_str())],
        )
    }

    fn install_remote(&self, remote: &dyn RemoteExecutor) -> Result<()> {
        let tool = &self.config.transfer.resumable_tool;
        info!("Installing {} on {}", tool, remote.target().host);
        let out = remote.run(&self.install_command())?;
        if !out.success() || !self.remote_has_tool(remote)? {
            return Err(MigrateError::Transport(format!(
                "{} is still missing on {} after install (exit {})",
                tool,
                remote.target().host,
                out.exit_code
            )));
        }
        Ok(())
    }

    fn install_local(&self) -> Result<()> {
        let tool = &self.config.transfer.resumable_tool;
        info!("Installing {} locally", tool);
        let out = self.runner.run_shell(&self.install_command())?;
        if !out.success() || !self.runner.has_tool(tool) {
            return Err(MigrateError::Transport(format!(
                "{} is still missing locally after install (exit {}): {}",
                tool,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Pull every `(remote path, local path)` pair into `local_dir`.
    fn transfer(
        &self,
        method: TransferMethod,
        remote: &dyn RemoteExecutor,
        files: &[(String, PathBuf)],
        local_dir: &Path,
    ) -> Result<()> {
        match method {
            TransferMethod::PlainCopy => {
                for (remote_path, local) in files {
                    let bytes = remote.copy_file(remote_path, local)?;
                    info!("Copied {} ({})", remote_path, progress::format_bytes(bytes));
                }
            }
            TransferMethod::Resumable => {
                // one invocation, so one ssh connection, for archive and sidecar
                let remote_paths: Vec<&str> = files.iter().map(|(r, _)| r.as_str()).collect();
                let args = resumable_args(&self.config, remote.target(), &remote_paths, local_dir);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                let tool = &self.config.transfer.resumable_tool;
                let code = self.runner.run_attached(tool, &args)?;
                if code != 0 {
                    return Err(MigrateError::Transport(format!(
                        "{} from {} failed (exit {})",
                        tool,
                        remote.target().host,
                        code
                    )));
                }
                info!("Pulled {} file(s) with {}", files.len(), tool);
            }
        }
        Ok(())
    }
}

/// Arguments for one resumable pull of `remote_paths` into `local_dir`.
pub fn resumable_args(
    config: &Config,
    target: &RemoteTarget,
    remote_paths: &[&str],
    local_dir: &Path,
) -> Vec<String> {
    let mut ssh = format!("ssh -p {} -o BatchMode=yes", target.port);
    if let Some(identity) = &config.transfer.identity_file {
        ssh.push_str(&format!(" -i {}", remote::shell_quote(&identity.to_string_lossy())));
    }

    let mut args = vec![
        "-a".to_string(),
        "--partial".to_string(),
        "--info=progress2".to_string(),
        "-e".to_string(),
        ssh,
    ];
    args.extend(remote_paths.iter().map(|path| format!("{}:{}", target.login(), path)));
    args.push(format!("{}/", local_dir.to_string_lossy().trim_end_matches('/')));
    args
}

#[cfg(test)]
pub mod fake {
    //! A remote host backed by a local directory.

    use super::remote::{RemoteExecutor, RemoteOutput, RemoteTarget};
    use crate::utils::errors::{MigrateError, Result};
    use std::path::Path;
    use std::sync::Mutex;

    pub struct FakeRemote {
        target: RemoteTarget,
        has_tool: Mutex<bool>,
        install_fixes_tool: bool,
        commands: Mutex<Vec<String>>,
        copies: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        /// `dir` plays the remote backup directory.
        pub fn new(dir: &Path, has_tool: bool) -> Self {
            Self {
                target: RemoteTarget::new("root", "source.example", &dir.to_string_lossy(), 22),
                has_tool: Mutex::new(has_tool),
                install_fixes_tool: true,
                commands: Mutex::new(Vec::new()),
                copies: Mutex::new(Vec::new()),
            }
        }

        pub fn with_broken_install(mut self) -> Self {
            self.install_fixes_tool = false;
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        pub fn copies(&self) -> Vec<String> {
            self.copies.lock().unwrap().clone()
        }
    }

    fn unquote(arg: &str) -> String {
        arg.trim().trim_matches('\'').to_string()
    }

    impl RemoteExecutor for FakeRemote {
        fn target(&self) -> &RemoteTarget {
            &self.target
        }

        fn run(&self, cmd: &str) -> Result<RemoteOutput> {
            self.commands.lock().unwrap().push(cmd.to_string());

            let ok = |stdout: String| RemoteOutput { stdout, exit_code: 0 };
            let code = |exit_code: i32| RemoteOutput {
                stdout: String::new(),
                exit_code,
            };

            if let Some(dir) = cmd.strip_prefix("ls -1 ") {
                return match std::fs::read_dir(unquote(dir)) {
                    Ok(entries) => Ok(ok(entries
                        .filter_map(|e| e.ok())
                        .map(|e| format!("{}\n", e.file_name().to_string_lossy()))
                        .collect())),
                    Err(_) => Ok(code(2)),
                };
            }
            if let Some(path) = cmd.strip_prefix("test -f ") {
                return Ok(code(if Path::new(&unquote(path)).is_file() { 0 } else { 1 }));
            }
            if cmd.starts_with("command -v ") {
                return Ok(code(if *self.has_tool.lock().unwrap() { 0 } else { 1 }));
            }
            if cmd.contains("install") {
                if self.install_fixes_tool {
                    *self.has_tool.lock().unwrap() = true;
                }
                return Ok(code(0));
            }
            Ok(code(127))
        }

        fn copy_file(&self, remote_path: &str, local: &Path) -> Result<u64> {
            self.copies.lock().unwrap().push(remote_path.to_string());
            std::fs::copy(remote_path, local)
                .map_err(|e| MigrateError::Transport(format!("copy of {} failed: {}", remote_path, e)))
        }
    }
}
