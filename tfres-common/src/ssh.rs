//! SSH identity staging for playbooks that clone private repositories.
//!
//! A private `ssh-agent` is started on a socket inside a fresh temporary
//! directory, the key is loaded through `ssh-add -`, and the git host's key is
//! appended to `known_hosts`. The agent is killed and the socket directory
//! removed when [`SshAgent`] drops, whichever way the put exits.
//!
//! Every step races the put's [`CancelSignal`]; a cancelled step kills its
//! child and returns [`SshError::Cancelled`].

use crate::config::Settings;
use crate::invoker::CancelSignal;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs::{DirBuilder, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const SOCKET_WAIT: Duration = Duration::from_secs(5);
const SOCKET_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to create agent socket directory: {0}")]
    SocketDir(#[source] io::Error),
    #[error("failed to start {bin}: {source}")]
    AgentSpawn {
        bin: String,
        #[source]
        source: io::Error,
    },
    #[error("ssh agent exited before creating its socket ({0})")]
    AgentExited(ExitStatus),
    #[error("ssh agent socket did not appear within {0:?}")]
    AgentSocketTimeout(Duration),
    #[error("failed to load private key: {0}")]
    KeyLoad(String),
    #[error("failed to scan host key for {host}: {detail}")]
    HostKey { host: String, detail: String },
    #[error("failed to update {path}: {source}")]
    KnownHosts {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credential staging was cancelled")]
    Cancelled,
}

/// Run `work` unless `cancel` fires first. Dropping `work` drops any child it
/// owns, and children here are spawned with `kill_on_drop`.
async fn until_cancelled<T>(
    cancel: &CancelSignal,
    work: impl Future<Output = T>,
) -> Result<T, SshError> {
    if cancel.is_cancelled() {
        return Err(SshError::Cancelled);
    }
    let mut cancel = cancel.clone();
    tokio::select! {
        result = work => Ok(result),
        () = cancel.cancelled() => Err(SshError::Cancelled),
    }
}

/// A running agent bound to a private socket.
#[derive(Debug)]
pub struct SshAgent {
    child: Child,
    socket: PathBuf,
    _dir: TempDir,
}

impl SshAgent {
    /// Spawn `<bin> -D -a <socket>` and wait for the socket to appear.
    pub async fn start(bin: &str, cancel: &CancelSignal) -> Result<Self, SshError> {
        let dir = tempfile::Builder::new()
            .prefix("tfres-ssh-")
            .tempdir()
            .map_err(SshError::SocketDir)?;
        let socket = dir.path().join("agent.sock");

        let child = Command::new(bin)
            .arg("-D")
            .arg("-a")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SshError::AgentSpawn {
                bin: bin.to_string(),
                source,
            })?;

        let mut agent = Self {
            child,
            socket,
            _dir: dir,
        };
        until_cancelled(cancel, agent.wait_for_socket()).await??;
        debug!(socket = %agent.socket.display(), pid = ?agent.child.id(), "SSH agent started");
        Ok(agent)
    }

    async fn wait_for_socket(&mut self) -> Result<(), SshError> {
        let deadline = Instant::now() + SOCKET_WAIT;
        while !self.socket.exists() {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(SshError::AgentExited(status));
            }
            if Instant::now() >= deadline {
                return Err(SshError::AgentSocketTimeout(SOCKET_WAIT));
            }
            sleep(SOCKET_POLL).await;
        }
        Ok(())
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Load `key` into the agent via `<add_bin> -`.
    pub async fn add_key(
        &self,
        add_bin: &str,
        key: &str,
        cancel: &CancelSignal,
    ) -> Result<(), SshError> {
        let mut child = Command::new(add_bin)
            .arg("-")
            .env("SSH_AUTH_SOCK", &self.socket)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SshError::KeyLoad(format!("failed to start {add_bin}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // ssh-add rejects keys without a trailing newline
            let mut payload = key.as_bytes().to_vec();
            if !key.ends_with('\n') {
                payload.push(b'\n');
            }
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("Failed to pass private key to {}: {}", add_bin, e);
            }
        }

        let output = until_cancelled(cancel, child.wait_with_output())
            .await?
            .map_err(|e| SshError::KeyLoad(format!("failed waiting for {add_bin}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SshError::KeyLoad(format!(
                "{add_bin} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        debug!("Private key loaded into agent");
        Ok(())
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("SSH agent already gone: {}", e);
        }
        debug!(socket = %self.socket.display(), "SSH agent stopped");
    }
}

/// Append `<keyscan_bin> -H <host>` output to `known_hosts`, creating the
/// file and its directory with owner-only permissions.
pub async fn prime_known_hosts(
    keyscan_bin: &str,
    host: &str,
    known_hosts: &Path,
    cancel: &CancelSignal,
) -> Result<(), SshError> {
    let mut scan = Command::new(keyscan_bin);
    scan.args(["-H", host])
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let output = until_cancelled(cancel, scan.output())
        .await?
        .map_err(|e| SshError::HostKey {
            host: host.to_string(),
            detail: format!("failed to start {keyscan_bin}: {e}"),
        })?;

    if !output.status.success() || output.stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(SshError::HostKey {
            host: host.to_string(),
            detail: format!(
                "{keyscan_bin} exited with {} and returned no keys: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let known_hosts_error = |source| SshError::KnownHosts {
        path: known_hosts.to_path_buf(),
        source,
    };
    if let Some(parent) = known_hosts.parent()
        && !parent.as_os_str().is_empty()
    {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .await
            .map_err(known_hosts_error)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(known_hosts)
        .await
        .map_err(known_hosts_error)?;
    let mut lines = output.stdout;
    if !lines.ends_with(b"\n") {
        lines.push(b'\n');
    }
    file.write_all(&lines).await.map_err(known_hosts_error)?;
    file.flush().await.map_err(known_hosts_error)?;

    debug!(host, path = %known_hosts.display(), "Primed known_hosts");
    Ok(())
}

/// Start an agent, load `key` and prime the git host key.
///
/// On failure or cancellation the partially started agent is dropped (and
/// killed) before the error is returned.
pub async fn stage_credentials(
    settings: &Settings,
    key: &str,
    cancel: &CancelSignal,
) -> Result<SshAgent, SshError> {
    if cancel.is_cancelled() {
        return Err(SshError::Cancelled);
    }
    let agent = SshAgent::start(&settings.ssh_agent_bin, cancel).await?;
    agent.add_key(&settings.ssh_add_bin, key, cancel).await?;
    prime_known_hosts(
        &settings.ssh_keyscan_bin,
        &settings.known_host,
        &settings.known_hosts_file,
        cancel,
    )
    .await?;
    info!(host = %settings.known_host, "Staged SSH credentials");
    Ok(agent)
}
