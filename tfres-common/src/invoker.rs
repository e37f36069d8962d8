//! Running the automation tool.
//!
//! [`playbook_command`] turns the request into a [`CommandSpec`]; a
//! [`CommandRunner`] executes it. [`SystemRunner`] spawns a real child process
//! and kills it when the deadline passes or the [`CancelSignal`] fires.

use crate::config::Settings;
use crate::types::VaultSource;
use crate::util::{mask_sensitive, render_command};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Formatting flags that keep ansible output readable in the build log.
const ANSIBLE_DISPLAY_ENV: [(&str, &str); 4] = [
    ("ANSIBLE_FORCE_COLOR", "True"),
    ("ANSIBLE_STDOUT_CALLBACK", "debug"),
    ("ANSIBLE_DISPLAY_SKIPPED_HOSTS", "False"),
    ("ANSIBLE_COLOR_OK", "white"),
];

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {}", describe_exit(.code))]
    Exit { program: String, code: Option<i32> },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

/// One external command: argv, environment overrides and working directory.
/// The child inherits the rest of the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Shell-escaped command line with secrets masked, for logs.
    pub fn display_masked(&self) -> String {
        let argv: Vec<String> = std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect();
        mask_sensitive(&render_command(&self.env, &argv))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Fires once when the invocation should stop.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Owner side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled; pends forever if the handle is gone first.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Executes [`CommandSpec`]s.
pub trait CommandRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelSignal,
    ) -> impl Future<Output = Result<CommandOutcome, InvokeError>> + Send;
}

/// Spawns real processes with tokio. The child's stdout is sent to our
/// stderr so stdout only ever carries the response document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

enum Interrupted {
    Timeout(Duration),
    Cancelled,
}

fn stdout_to_stderr() -> Stdio {
    match io::stderr().as_fd().try_clone_to_owned() {
        Ok(fd) => Stdio::from(fd),
        Err(e) => {
            warn!("Cannot route child stdout to stderr, discarding it: {}", e);
            Stdio::null()
        }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelSignal,
    ) -> Result<CommandOutcome, InvokeError> {
        let program = spec.program.clone();
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled { program });
        }

        let mut child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(stdout_to_stderr())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                program: program.clone(),
                source,
            })?;
        let started = Instant::now();
        debug!(program = %program, pid = ?child.id(), "Spawned child process");

        let mut cancel = cancel.clone();
        let deadline = async {
            match spec.timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        let finished = tokio::select! {
            status = child.wait() => Ok(status),
            timeout = deadline => Err(Interrupted::Timeout(timeout)),
            () = cancel.cancelled() => Err(Interrupted::Cancelled),
        };

        match finished {
            Ok(status) => {
                let status = status.map_err(|source| InvokeError::Wait {
                    program: program.clone(),
                    source,
                })?;
                Ok(CommandOutcome {
                    exit_code: status.code(),
                    duration: started.elapsed(),
                })
            }
            Err(interrupted) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                match interrupted {
                    Interrupted::Timeout(timeout) => Err(InvokeError::Timeout { program, timeout }),
                    Interrupted::Cancelled => Err(InvokeError::Cancelled { program }),
                }
            }
        }
    }
}

/// Inputs of the playbook command line.
pub struct PlaybookInvocation<'a> {
    pub settings: &'a Settings,
    pub vault: &'a VaultSource,
    /// Evaluated user environment (source envs overlaid by params envs).
    pub user_env: &'a BTreeMap<String, String>,
    /// `@<file>` reference to the extra-vars document.
    pub vars_arg: String,
    pub workdir: &'a Path,
    pub ssh_auth_sock: Option<&'a Path>,
}

/// `ansible-playbook -e @<vars> <playbook_dir>/out.yml` with the vault and
/// display environment. User envs override the fixed entries; a staged agent
/// socket overrides everything.
pub fn playbook_command(invocation: &PlaybookInvocation<'_>) -> CommandSpec {
    let settings = invocation.settings;
    let mut env: BTreeMap<String, String> = ANSIBLE_DISPLAY_ENV
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.insert("ANSIBLE_HASHI_VAULT_ADDR".into(), invocation.vault.addr.clone());
    env.insert("ANSIBLE_HASHI_VAULT_AUTH_METHOD".into(), "approle".into());
    env.insert("ANSIBLE_HASHI_VAULT_ROLE_ID".into(), invocation.vault.role_id.clone());
    env.insert(
        "ANSIBLE_HASHI_VAULT_SECRET_ID".into(),
        invocation.vault.secret_id.clone(),
    );
    env.extend(
        invocation
            .user_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    if let Some(sock) = invocation.ssh_auth_sock {
        env.insert("SSH_AUTH_SOCK".into(), sock.display().to_string());
    }

    CommandSpec {
        program: settings.playbook_bin.clone(),
        args: vec![
            "-e".to_string(),
            invocation.vars_arg.clone(),
            settings.out_playbook().display().to_string(),
        ],
        env,
        cwd: invocation.workdir.to_path_buf(),
        timeout: settings.timeout,
    }
}

/// Run `spec` and turn a non-zero exit into an error.
pub async fn invoke<R: CommandRunner>(
    runner: &R,
    spec: &CommandSpec,
    cancel: &CancelSignal,
) -> Result<CommandOutcome, InvokeError> {
    info!(command = %spec.display_masked(), "Running playbook");
    let outcome = runner.run(spec, cancel).await?;
    if !outcome.success() {
        return Err(InvokeError::Exit {
            program: spec.program.clone(),
            code: outcome.exit_code,
        });
    }
    info!(
        duration_ms = outcome.duration.as_millis() as u64,
        "Playbook finished"
    );
    Ok(outcome)
}
