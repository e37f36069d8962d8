//! tfres - Concourse resource
//!
//! Installed as `/opt/resource/{check,in,out}`; the executable name selects
//! the command. Requests arrive on stdin and responses leave on stdout.
//! Everything else, logs and playbook output included, goes to stderr.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tfres_common::{
    BuildEnvironment, CancelHandle, LogConfig, Operation, PutContext, ResourceError, Settings,
    SystemRunner, cancel_pair, init_logging, run_check, run_in, run_put,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "tfres")]
#[command(author, version, about = "Concourse resource running terraform through ansible-playbook")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo the version supplied on stdin
    Check {
        /// Ignored; accepted for symmetry with in/out
        dir: Option<PathBuf>,
    },

    /// Validate and echo the requested version
    In {
        /// Destination directory
        dir: PathBuf,
    },

    /// Run the out playbook and report the produced version
    Out {
        /// Build directory holding the put's inputs
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_from(resource_args(std::env::args_os()));

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config).context("failed to initialize logging")?;

    match run(cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            report(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `/opt/resource/out <dir>` becomes `tfres out <dir>`.
fn resource_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut args: Vec<OsString> = args.into_iter().collect();
    let operation = args
        .first()
        .and_then(|program| program.to_str())
        .and_then(Operation::from_program_name);
    if let Some(operation) = operation {
        args.insert(1, operation.name().into());
    }
    args
}

async fn run(command: Commands) -> Result<(), ResourceError> {
    match command {
        Commands::Check { .. } => {
            run_check(io::stdin(), io::stdout())?;
        }
        Commands::In { dir } => {
            let build = BuildEnvironment::from_env().map_err(ResourceError::Environment)?;
            debug!(build_id = %build.id, dir = %dir.display(), "Running in");
            run_in(io::stdin(), io::stdout())?;
        }
        Commands::Out { dir } => put(&dir).await?,
    }
    Ok(())
}

async fn put(dir: &Path) -> Result<(), ResourceError> {
    let build = BuildEnvironment::from_env().map_err(ResourceError::Environment)?;
    let settings = Settings::from_env().map_err(ResourceError::Environment)?;
    debug!(
        build_id = %build.id,
        playbook = %settings.out_playbook().display(),
        timeout = ?settings.timeout,
        "Resolved configuration"
    );

    let (handle, cancel) = cancel_pair();
    let signals = tokio::spawn(forward_signals(handle));
    let ctx = PutContext {
        build: &build,
        settings: &settings,
        runner: &SystemRunner,
        cancel: &cancel,
    };
    let result = run_put(io::stdin(), io::stdout(), dir, &ctx).await;
    signals.abort();
    result.map(|_| ())
}

/// Cancel the running playbook on SIGINT or SIGTERM.
async fn forward_signals(handle: CancelHandle) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, stopping playbook"),
        _ = terminate.recv() => info!("Received SIGTERM, stopping playbook"),
    }
    handle.cancel();
}

fn report(err: &ResourceError) {
    let entry = err.entry();
    error!(code = %entry.code, category = ?entry.category, "{}", err);
    for step in &entry.remediation {
        info!(code = %entry.code, "Remediation: {}", step);
    }
}
