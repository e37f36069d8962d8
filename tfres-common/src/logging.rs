//! Tracing subscriber setup.
//!
//! Logs always go to stderr (or a file): stdout carries the response document
//! the orchestrator parses.

use crate::config::EnvParser;
use std::io::IsTerminal;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "pretty" | "compact" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `tfres_common=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Problems found while reading the environment, reported once logging is up.
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter `{filter}`: {message}")]
    Filter { filter: String, message: String },
    #[error("log file {0} has no file name")]
    FilePath(PathBuf),
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Keeps the background log writer alive; drop it last.
#[must_use = "logs are lost once the guard is dropped"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

impl LogConfig {
    /// Read `TFRES_LOG_LEVEL`, `TFRES_LOG_FORMAT` and `TFRES_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).into_inner();
        let format_raw = parser.get_string("LOG_FORMAT", "text").into_inner();
        let file = parser
            .get_optional_string("LOG_FILE")
            .into_inner()
            .map(PathBuf::from);

        let mut warnings: Vec<String> = parser
            .take_errors()
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        let format = LogFormat::parse(&format_raw).unwrap_or_else(|| {
            warnings.push(format!(
                "TFRES_LOG_FORMAT={format_raw} is not `text` or `json`, using text"
            ));
            LogFormat::Text
        });

        Self {
            level,
            format,
            file,
            warnings,
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            warnings: Vec::new(),
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LoggingError::Filter {
        filter: config.level.clone(),
        message: e.to_string(),
    })?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| LoggingError::FilePath(path.clone()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let ansi = config.file.is_none() && std::io::stderr().is_terminal();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);
    let installed = match config.format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.with_ansi(ansi).try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))?;

    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    Ok(LoggingGuards {
        _guards: vec![guard],
    })
}
