//! Typed reads of `TFRES_*` and orchestrator variables.
//!
//! Every problem is recorded instead of returned, so a misconfigured
//! container reports all of its bad variables in one failure.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Required variable is unset or empty.
    #[error("required key {var} missing value")]
    Missing { var: String },

    #[error("{var} must be {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var} is {secs}s, above the {max_secs}s limit")]
    TimeoutTooLong { var: String, secs: u64, max_secs: u64 },

    #[error("{var} is not a log level: {value}")]
    InvalidLogLevel { var: String, value: String },
}

pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for the resource's own `TFRES_` variables.
    pub fn new() -> Self {
        Self {
            prefix: "TFRES_",
            errors: Vec::new(),
        }
    }

    /// Parser for variables owned by the orchestrator.
    pub fn unprefixed() -> Self {
        Self {
            prefix: "",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a required, non-empty string. Records [`EnvError::Missing`] otherwise.
    pub fn require_string(&mut self, name: &str) -> String {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if !value.is_empty() => value,
            _ => {
                self.errors.push(EnvError::Missing { var: var_name });
                String::new()
            }
        }
    }

    /// Non-empty value, else `default`.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if !value.is_empty() => Sourced::from_env(value, var_name),
            _ => Sourced::default_value(default.to_string()),
        }
    }

    /// Deadline in whole seconds; `0` or unset means no deadline.
    pub fn get_timeout(&mut self, name: &str, max_secs: u64) -> Sourced<Option<Duration>> {
        let var_name = self.var_name(name);
        let Ok(raw) = env::var(&var_name) else {
            return Sourced::default_value(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(0) => Sourced::from_env(None, var_name),
            Ok(secs) if secs <= max_secs => {
                Sourced::from_env(Some(Duration::from_secs(secs)), var_name)
            }
            Ok(secs) => {
                self.errors.push(EnvError::TimeoutTooLong {
                    var: var_name.clone(),
                    secs,
                    max_secs,
                });
                Sourced::from_env(None, var_name)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "a number of seconds",
                    value: raw,
                });
                Sourced::default_value(None)
            }
        }
    }

    /// Path with a leading `~/` expanded.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        let (value, source) = match env::var(&var_name) {
            Ok(v) if !v.is_empty() => (v, ConfigSource::Environment),
            _ => (default.to_string(), ConfigSource::Default),
        };

        let expanded = expand_home(&value);

        if source == ConfigSource::Environment {
            Sourced::from_env(expanded, var_name)
        } else {
            Sourced::default_value(expanded)
        }
    }

    /// One of the tracing levels (or `off`), lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::from_env(default.to_string(), var_name)
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// `None` when unset or empty.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~/` to the home directory.
pub(crate) fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
