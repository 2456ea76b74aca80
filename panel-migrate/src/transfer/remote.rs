//! Remote command execution and plain-copy transfer over one SSH session.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::progress::ProgressReader;
use crate::config::TransferConfig;
use crate::utils::errors::{MigrateError, Result};

pub use crate::utils::command::shell_quote;

/// `user@host:dir` the archive is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub dir: String,
    pub port: u16,
}

impl RemoteTarget {
    pub fn new(user: &str, host: &str, dir: &str, port: u16) -> Self {
        Self {
            user: user.to_string(),
            host: host.to_string(),
            dir: dir.trim_end_matches('/').to_string(),
            port,
        }
    }

    /// Remote path of `file_name` inside the target directory.
    pub fn path_of(&self, file_name: &str) -> String {
        if self.dir.is_empty() {
            format!("/{}", file_name)
        } else {
            format!("{}/{}", self.dir, file_name)
        }
    }

    /// `user@host`
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Commands and file copies against the remote host.
pub trait RemoteExecutor {
    fn target(&self) -> &RemoteTarget;

    fn run(&self, cmd: &str) -> Result<RemoteOutput>;

    /// Plain copy of one remote file to `local`, via `<local>.partial`.
    fn copy_file(&self, remote_path: &str, local: &Path) -> Result<u64>;
}

/// An authenticated ssh2 session reused for every call.
pub struct SshSession {
    target: RemoteTarget,
    session: ssh2::Session,
}

impl SshSession {
    pub fn connect(target: RemoteTarget, config: &TransferConfig) -> Result<Self> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| MigrateError::Transport(format!("cannot resolve {}: {}", target.host, e)))?
            .next()
            .ok_or_else(|| MigrateError::Transport(format!("no address for {}", target.host)))?;

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            MigrateError::Transport(format!("{}:{} unreachable: {}", target.host, target.port, e))
        })?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| MigrateError::Transport(format!("SSH handshake with {} failed: {}", target.host, e)))?;

        let auth = if let Some(password) = &config.password {
            session.userauth_password(&target.user, password)
        } else if let Some(identity) = &config.identity_file {
            session.userauth_pubkey_file(&target.user, None, identity, None)
        } else {
            session.userauth_agent(&target.user)
        };
        auth.map_err(|e| MigrateError::Transport(format!("SSH authentication as {} failed: {}", target.login(), e)))?;

        if !session.authenticated() {
            return Err(MigrateError::Transport(format!(
                "SSH authentication as {} failed",
                target.login()
            )));
        }

        tracing::info!("Connected to {}:{}", target.login(), target.port);
        Ok(Self { target, session })
    }
}

impl RemoteExecutor for SshSession {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    fn run(&self, cmd: &str) -> Result<RemoteOutput> {
        tracing::debug!("remote exec on {}: {}", self.target.host, cmd);
        let mut channel = self.session.channel_session()?;
        channel.exec(cmd)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        channel.wait_close()?;

        Ok(RemoteOutput {
            stdout,
            exit_code: channel.exit_status()?,
        })
    }

    fn copy_file(&self, remote_path: &str, local: &Path) -> Result<u64> {
        let (mut channel, stat) = self
            .session
            .scp_recv(Path::new(remote_path))
            .map_err(|e| MigrateError::Transport(format!("scp of {} failed: {}", remote_path, e)))?;

        let partial = partial_path(local);
        let mut file = std::fs::File::create(&partial)?;
        let label = Path::new(remote_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| remote_path.to_string());

        let mut reader = ProgressReader::new(&mut channel, label, stat.size());
        io::copy(&mut reader, &mut file)?;
        let progress = reader.finish();
        file.flush()?;
        file.sync_all()?;

        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;

        if !progress.is_complete() {
            return Err(MigrateError::Transport(format!(
                "short copy of {}: {} of {} bytes",
                remote_path, progress.transferred_bytes, progress.total_bytes
            )));
        }

        std::fs::rename(&partial, local)?;
        Ok(progress.transferred_bytes)
    }
}

/// `<file>.partial` next to `local`.
pub fn partial_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}
