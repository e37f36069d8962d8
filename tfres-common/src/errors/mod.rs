//! Error catalog and the top-level error of a resource command.
//!
//! Component errors (`RequestError`, `EvaluationError`, `SshError`,
//! `InvokeError`, ...) stay close to their modules. [`ResourceError`] wraps
//! them once per command and maps each onto a stable [`ErrorCode`].

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::config::EnvError;
use crate::expr::{EvalKind, EvaluationError};
use crate::extra_vars::VarsFileError;
use crate::invoker::InvokeError;
use crate::ssh::SshError;
use crate::types::RequestError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to decode request: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to read request: {0}")]
    ReadRequest(#[source] io::Error),
    #[error("invalid request: {0}")]
    Validation(#[from] RequestError),
    #[error("invalid build environment: {}", join_env_errors(.0))]
    Environment(Vec<EnvError>),
    #[error("invalid working directory {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("error writing ansible extra vars: {0}")]
    VarsFile(#[from] VarsFileError),
    #[error("error staging ssh credentials: {0}")]
    Credential(#[from] SshError),
    #[error("error running playbook: {0}")]
    Process(#[from] InvokeError),
    #[error("failed to write response: {0}")]
    WriteResponse(#[source] io::Error),
    #[error("failed to serialize response: {0}")]
    Serialize(#[source] serde_json::Error),
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResourceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Decode(_) | Self::ReadRequest(_) => ErrorCode::RequestDecodeFailed,
            Self::Validation(RequestError::Source(_)) => ErrorCode::RequestInvalidSource,
            Self::Validation(RequestError::Params(_)) => ErrorCode::RequestInvalidParams,
            Self::Validation(RequestError::Version(_)) => ErrorCode::RequestInvalidVersion,
            Self::Environment(_) => ErrorCode::ConfigBuildEnvMissing,
            Self::Workdir { .. } => ErrorCode::ConfigWorkdirInvalid,
            Self::Evaluation(e) => match e.kind {
                EvalKind::Field => ErrorCode::EvalFieldFailed,
                EvalKind::Mapping => ErrorCode::EvalMappingFailed,
            },
            Self::VarsFile(_) => ErrorCode::ProcessVarsFileFailed,
            Self::Credential(SshError::KeyLoad(_)) => ErrorCode::CredentialKeyLoadFailed,
            Self::Credential(SshError::HostKey { .. } | SshError::KnownHosts { .. }) => {
                ErrorCode::CredentialHostKeyFailed
            }
            Self::Credential(SshError::Cancelled) => ErrorCode::CredentialStagingCancelled,
            Self::Credential(_) => ErrorCode::CredentialAgentSpawnFailed,
            Self::Process(InvokeError::Spawn { .. } | InvokeError::Wait { .. }) => {
                ErrorCode::ProcessSpawnFailed
            }
            Self::Process(InvokeError::Exit { .. }) => ErrorCode::ProcessExitFailure,
            Self::Process(InvokeError::Timeout { .. }) => ErrorCode::ProcessTimedOut,
            Self::Process(InvokeError::Cancelled { .. }) => ErrorCode::ProcessCancelled,
            Self::WriteResponse(_) => ErrorCode::InternalIoError,
            Self::Serialize(_) => ErrorCode::InternalSerdeError,
        }
    }

    /// Catalog entry of [`Self::code`].
    pub fn entry(&self) -> ErrorEntry {
        self.code().entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprError;
    use crate::types::{ParamsError, SourceError, VaultError};

    #[test]
    fn test_validation_codes_name_section() {
        let err = ResourceError::from(RequestError::from(SourceError::from(VaultError::MissingAddr)));
        assert_eq!(err.code(), ErrorCode::RequestInvalidSource);
        assert_eq!(
            err.to_string(),
            "invalid request: invalid source: invalid vault config: missing vault addr"
        );

        let err = ResourceError::from(RequestError::from(ParamsError::MissingDir));
        assert_eq!(err.code(), ErrorCode::RequestInvalidParams);
    }

    #[test]
    fn test_evaluation_codes_follow_kind() {
        let err = ResourceError::from(EvaluationError {
            what: "params.vars_mapping".into(),
            kind: EvalKind::Mapping,
            source: ExprError::Runtime("boom".into()),
        });
        assert_eq!(err.code(), ErrorCode::EvalMappingFailed);
        assert_eq!(err.to_string(), "failed to evaluate params.vars_mapping: boom");
    }

    #[test]
    fn test_environment_error_lists_all_missing() {
        let err = ResourceError::Environment(vec![
            EnvError::Missing {
                var: "BUILD_ID".into(),
            },
            EnvError::Missing {
                var: "BUILD_TEAM_NAME".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("BUILD_ID"));
        assert!(text.contains("BUILD_TEAM_NAME"));
        assert_eq!(err.code(), ErrorCode::ConfigBuildEnvMissing);
    }

    #[test]
    fn test_process_codes() {
        let err = ResourceError::from(InvokeError::Exit {
            program: "ansible-playbook".into(),
            code: Some(2),
        });
        assert_eq!(err.code(), ErrorCode::ProcessExitFailure);
        assert_eq!(err.entry().code, "TFRES-E301");
    }

    #[test]
    fn test_credential_codes() {
        let err = ResourceError::from(SshError::KeyLoad("bad".into()));
        assert_eq!(err.code(), ErrorCode::CredentialKeyLoadFailed);
        assert_eq!(err.code().category(), ErrorCategory::Credential);

        let err = ResourceError::from(SshError::Cancelled);
        assert_eq!(err.entry().code, "TFRES-E203");
    }
}
