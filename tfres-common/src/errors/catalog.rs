//! Error Catalog for tfres
//!
//! Every fatal failure of a resource command maps onto one entry of this
//! catalog. An entry carries:
//! - A unique code (TFRES-E001 through TFRES-E599)
//! - A human-readable message
//! - Remediation steps
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                              |
//! |------------|-------------|------------------------------------------|
//! | E001-E099  | Request     | Payload decoding and request validation  |
//! | E100-E199  | Evaluation  | Field and mapping expression failures    |
//! | E200-E299  | Credential  | SSH agent and host-key staging           |
//! | E300-E399  | Process     | Playbook invocation                      |
//! | E400-E499  | Config      | Build environment and tool settings      |
//! | E500-E599  | Internal    | Internal/unexpected errors               |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all tfres failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Request Errors (E001-E099)
    // =========================================================================
    /// Payload is not valid JSON or violates the request schema
    RequestDecodeFailed,
    /// Source configuration is incomplete
    RequestInvalidSource,
    /// Put parameters are incomplete
    RequestInvalidParams,
    /// Version is incomplete
    RequestInvalidVersion,

    // =========================================================================
    // Evaluation Errors (E100-E199)
    // =========================================================================
    /// A templated field could not be compiled or rendered
    EvalFieldFailed,
    /// A mapping script could not be compiled or executed
    EvalMappingFailed,

    // =========================================================================
    // Credential Errors (E200-E299)
    // =========================================================================
    /// The ssh-agent process could not be started
    CredentialAgentSpawnFailed,
    /// The private key could not be loaded into the agent
    CredentialKeyLoadFailed,
    /// The git host key could not be added to known_hosts
    CredentialHostKeyFailed,
    /// Credential staging was interrupted by a signal
    CredentialStagingCancelled,

    // =========================================================================
    // Process Errors (E300-E399)
    // =========================================================================
    /// The playbook process could not be spawned
    ProcessSpawnFailed,
    /// The playbook exited with a non-zero status
    ProcessExitFailure,
    /// The playbook exceeded its deadline
    ProcessTimedOut,
    /// The playbook was cancelled by a signal
    ProcessCancelled,
    /// The extra-vars file could not be written
    ProcessVarsFileFailed,

    // =========================================================================
    // Config Errors (E400-E499)
    // =========================================================================
    /// A required build environment variable is missing
    ConfigBuildEnvMissing,
    /// A tool setting has an invalid value
    ConfigInvalidSetting,
    /// The working directory argument is missing or unusable
    ConfigWorkdirInvalid,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Reading the request or writing the response failed
    InternalIoError,
    /// The response could not be serialized
    InternalSerdeError,
    /// Logging could not be initialized
    InternalLoggingError,
}

impl ErrorCode {
    /// Returns the numeric portion of the code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Request (1-99)
            Self::RequestDecodeFailed => 1,
            Self::RequestInvalidSource => 2,
            Self::RequestInvalidParams => 3,
            Self::RequestInvalidVersion => 4,

            // Evaluation (100-199)
            Self::EvalFieldFailed => 100,
            Self::EvalMappingFailed => 101,

            // Credential (200-299)
            Self::CredentialAgentSpawnFailed => 200,
            Self::CredentialKeyLoadFailed => 201,
            Self::CredentialHostKeyFailed => 202,
            Self::CredentialStagingCancelled => 203,

            // Process (300-399)
            Self::ProcessSpawnFailed => 300,
            Self::ProcessExitFailure => 301,
            Self::ProcessTimedOut => 302,
            Self::ProcessCancelled => 303,
            Self::ProcessVarsFileFailed => 304,

            // Config (400-499)
            Self::ConfigBuildEnvMissing => 400,
            Self::ConfigInvalidSetting => 401,
            Self::ConfigWorkdirInvalid => 402,

            // Internal (500-599)
            Self::InternalIoError => 500,
            Self::InternalSerdeError => 501,
            Self::InternalLoggingError => 502,
        }
    }

    /// Returns the formatted error code string (e.g., "TFRES-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("TFRES-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Request,
            100..=199 => ErrorCategory::Evaluation,
            200..=299 => ErrorCategory::Credential,
            300..=399 => ErrorCategory::Process,
            400..=499 => ErrorCategory::Config,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::RequestDecodeFailed => "Request payload is malformed or has unknown fields",
            Self::RequestInvalidSource => "Resource source configuration is incomplete",
            Self::RequestInvalidParams => "Put parameters are incomplete",
            Self::RequestInvalidVersion => "Version is missing key or version_id",

            Self::EvalFieldFailed => "Templated field could not be evaluated",
            Self::EvalMappingFailed => "Mapping script could not be evaluated",

            Self::CredentialAgentSpawnFailed => "Failed to start ssh-agent",
            Self::CredentialKeyLoadFailed => "Failed to load private key into ssh-agent",
            Self::CredentialHostKeyFailed => "Failed to add git host key to known_hosts",
            Self::CredentialStagingCancelled => "SSH credential staging was cancelled",

            Self::ProcessSpawnFailed => "Failed to start ansible-playbook",
            Self::ProcessExitFailure => "ansible-playbook exited with a failure status",
            Self::ProcessTimedOut => "ansible-playbook exceeded its deadline",
            Self::ProcessCancelled => "ansible-playbook was cancelled",
            Self::ProcessVarsFileFailed => "Failed to write the extra-vars file",

            Self::ConfigBuildEnvMissing => "Required Concourse build metadata is missing",
            Self::ConfigInvalidSetting => "A TFRES_ setting has an invalid value",
            Self::ConfigWorkdirInvalid => "Working directory argument is missing or unusable",

            Self::InternalIoError => "I/O error on request or response stream",
            Self::InternalSerdeError => "Failed to serialize the response",
            Self::InternalLoggingError => "Failed to initialize logging",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::RequestDecodeFailed => &[
                "Check the resource definition for misspelled keys",
                "Only source/params (out) or source/version (check, in) are accepted",
            ],
            Self::RequestInvalidSource => &[
                "Set storage.aws_access_key_id, aws_secret_access_key, bucket and region",
                "Set vault.addr, vault.role_id and vault.secret_id",
            ],
            Self::RequestInvalidParams => &["Set both params.context and params.dir on the put step"],
            Self::RequestInvalidVersion => &["Pass a version with both key and version_id"],
            Self::EvalFieldFailed => &[
                "Check ${! ... } interpolations for balanced braces and valid queries",
            ],
            Self::EvalMappingFailed => &[
                "Check that every mapping line has the form `target = query`",
                "Check that methods are applied to values of a supported type",
            ],
            Self::CredentialAgentSpawnFailed => &[
                "Ensure openssh-client is installed in the resource image",
                "Override the binary with TFRES_SSH_AGENT_BIN if it lives elsewhere",
            ],
            Self::CredentialKeyLoadFailed => &[
                "Ensure private_key is an unencrypted PEM/OpenSSH private key",
            ],
            Self::CredentialHostKeyFailed => &[
                "Check network access to the git host",
                "Override the host with TFRES_KNOWN_HOST",
            ],
            Self::ProcessSpawnFailed => &[
                "Ensure ansible-playbook is on PATH or set TFRES_PLAYBOOK_BIN",
            ],
            Self::ProcessExitFailure => &["Inspect the playbook output above for the failing task"],
            Self::ProcessTimedOut => &["Raise TFRES_TIMEOUT_SECS or set it to 0 to disable"],
            Self::CredentialStagingCancelled | Self::ProcessCancelled => {
                &["The build was aborted; re-run the job"]
            }
            Self::ProcessVarsFileFailed => &["Check free space and permissions of the temp directory"],
            Self::ConfigBuildEnvMissing => &[
                "Run the resource under Concourse, or export BUILD_ID, BUILD_NAME, BUILD_JOB_NAME, BUILD_PIPELINE_NAME, BUILD_TEAM_NAME and ATC_EXTERNAL_URL",
            ],
            Self::ConfigInvalidSetting => &["Fix or unset the reported TFRES_ variable"],
            Self::ConfigWorkdirInvalid => &["Pass the build directory as the first argument"],
            Self::InternalIoError | Self::InternalSerdeError | Self::InternalLoggingError => {
                &["Re-run with TFRES_LOG_LEVEL=debug and report the output"]
            }
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::RequestDecodeFailed,
            Self::RequestInvalidSource,
            Self::RequestInvalidParams,
            Self::RequestInvalidVersion,
            Self::EvalFieldFailed,
            Self::EvalMappingFailed,
            Self::CredentialAgentSpawnFailed,
            Self::CredentialKeyLoadFailed,
            Self::CredentialHostKeyFailed,
            Self::CredentialStagingCancelled,
            Self::ProcessSpawnFailed,
            Self::ProcessExitFailure,
            Self::ProcessTimedOut,
            Self::ProcessCancelled,
            Self::ProcessVarsFileFailed,
            Self::ConfigBuildEnvMissing,
            Self::ConfigInvalidSetting,
            Self::ConfigWorkdirInvalid,
            Self::InternalIoError,
            Self::InternalSerdeError,
            Self::InternalLoggingError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Payload decoding and validation (E001-E099)
    Request,
    /// Expression evaluation (E100-E199)
    Evaluation,
    /// SSH credential staging (E200-E299)
    Credential,
    /// Playbook invocation (E300-E399)
    Process,
    /// Environment and settings (E400-E499)
    Config,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Evaluation => "Evaluation",
            Self::Credential => "Credential",
            Self::Process => "Process",
            Self::Config => "Configuration",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "TFRES-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
