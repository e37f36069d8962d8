//! tfres common library
//!
//! Request model, expression evaluation, extra-vars assembly, SSH staging
//! and playbook invocation shared by the `tfres` resource binary.

pub mod config;
pub mod errors;
pub mod expr;
pub mod extra_vars;
pub mod invoker;
pub mod logging;
pub mod resource;
pub mod ssh;
pub mod tree;
pub mod types;
pub mod util;
pub mod version;

#[cfg(test)]
mod testing;

pub use config::{BuildEnvironment, EnvError, Settings};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry, ResourceError};
pub use expr::{EvaluationError, Evaluator};
pub use extra_vars::{ExtraVars, VarsFile, build_extra_vars};
pub use invoker::{CancelHandle, CancelSignal, CommandRunner, SystemRunner, cancel_pair};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use resource::{Operation, PutContext, run_check, run_in, run_put};
pub use types::{
    CheckRequest, CheckResponse, InRequest, OutParams, OutRequest, Source, Version,
    VersionResponse,
};
