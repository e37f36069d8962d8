//! `out`: run the playbook for a put and report the produced version.
//!
//! validate → fallbacks → input mapping → templated fields → extra vars →
//! ssh staging → playbook → version. The vars file and the ssh agent are
//! guards: both are released on every return path.

use super::{read_request, write_response};
use crate::config::{BuildEnvironment, Settings};
use crate::errors::ResourceError;
use crate::expr::{EvaluationError, Evaluator};
use crate::extra_vars::{ExtraVarsInput, VarsFile, build_extra_vars};
use crate::invoker::{CancelSignal, CommandRunner, PlaybookInvocation, invoke, playbook_command};
use crate::ssh::stage_credentials;
use crate::types::{OutRequest, VersionResponse};
use crate::version::resolve_version;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Collaborators of a put, resolved once by the caller.
pub struct PutContext<'a, R> {
    pub build: &'a BuildEnvironment,
    pub settings: &'a Settings,
    pub runner: &'a R,
    pub cancel: &'a CancelSignal,
}

pub async fn run_put<I, O, R>(
    input: I,
    output: O,
    workdir: &Path,
    ctx: &PutContext<'_, R>,
) -> Result<VersionResponse, ResourceError>
where
    I: Read,
    O: Write,
    R: CommandRunner,
{
    let mut request: OutRequest = read_request(input)?;
    request.validate()?;
    request.source.assign_fallback_values(
        &ctx.build.team,
        &ctx.build.pipeline,
        &ctx.settings.resource_name,
    );
    let workdir = absolute_workdir(workdir)?;
    info!(
        component = %request.source.component,
        workdir = %workdir.display(),
        "Starting put"
    );

    let evaluator = input_evaluator(&request)?;
    let user_env = evaluate_envs(&request, &evaluator)?;
    let private_key = request
        .private_key()
        .map(|key| evaluator.field("private_key", key))
        .transpose()?;

    let vars = build_extra_vars(
        &ExtraVarsInput {
            build: ctx.build,
            source: &request.source,
            params: &request.params,
            workdir: &workdir,
        },
        &evaluator,
    )?;
    let vars_file = VarsFile::write(&vars)?;

    let agent = match private_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            Some(stage_credentials(ctx.settings, key, ctx.cancel).await?)
        }
        _ => None,
    };

    let spec = playbook_command(&PlaybookInvocation {
        settings: ctx.settings,
        vault: &request.source.vault,
        user_env: &user_env,
        vars_arg: vars_file.as_arg(),
        workdir: &workdir,
        ssh_auth_sock: agent.as_ref().map(|agent| agent.socket()),
    });
    invoke(ctx.runner, &spec, ctx.cancel).await?;
    drop(agent);
    drop(vars_file);

    let version = resolve_version(&workdir, &ctx.settings.version_file, &request.source.storage.key);
    info!(key = %version.key, version_id = %version.version_id, "Put complete");
    let response = VersionResponse::new(version);
    write_response(output, &response)?;
    Ok(response)
}

fn absolute_workdir(workdir: &Path) -> Result<PathBuf, ResourceError> {
    let workdir_error = |source| ResourceError::Workdir {
        path: workdir.to_path_buf(),
        source,
    };
    let absolute = std::path::absolute(workdir).map_err(workdir_error)?;
    if !absolute.is_dir() {
        return Err(workdir_error(io::Error::new(
            io::ErrorKind::NotFound,
            "not a directory",
        )));
    }
    Ok(absolute)
}

/// The input mapping, when configured, becomes the context of every other
/// evaluation. Otherwise the context is `{}`.
fn input_evaluator(request: &OutRequest) -> Result<Evaluator, EvaluationError> {
    let mapping = &request.params.input_mapping;
    if mapping.is_empty() {
        return Ok(Evaluator::default());
    }
    let context = Evaluator::default()
        .mapping("params.input_mapping", mapping)?
        .unwrap_or_else(|| Value::Object(Map::new()));
    debug!(context = %context, "Evaluated input mapping");
    Ok(Evaluator::new(context))
}

fn evaluate_envs(
    request: &OutRequest,
    evaluator: &Evaluator,
) -> Result<BTreeMap<String, String>, EvaluationError> {
    request
        .envs()
        .into_iter()
        .map(|(name, value)| {
            let value = evaluator.field(&format!("env ({name})"), &value)?;
            Ok::<_, EvaluationError>((name, value))
        })
        .collect()
}
