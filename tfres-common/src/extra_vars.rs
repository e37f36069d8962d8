//! The extra-vars document handed to `ansible-playbook -e @file`.
//!
//! Keys are fixed by the playbook contract:
//!
//! | Key                          | Value                                       |
//! |------------------------------|---------------------------------------------|
//! | `concourse_*`                | build metadata                              |
//! | `component`, `storage`       | post-fallback source                        |
//! | `workdir`                    | absolute working directory                  |
//! | `context`                    | evaluated `params.context`                  |
//! | `terraform_workspace`        | evaluated `params.workspace`, else context  |
//! | `release_version`            | re-evaluated `params.context`, when flagged |
//! | `terraform_vars`             | `params.vars_mapping` result                |
//! | `terraform_var_files`        | evaluated, absolute `params.var_files`      |
//! | `terraform_path`             | workdir joined with `params.dir`            |
//! | `plan_only`, `destroy`       | flags                                       |

use crate::config::BuildEnvironment;
use crate::expr::{EvaluationError, Evaluator};
use crate::tree::{get_path, set_path};
use crate::types::{OutParams, Source};
use crate::util::join_clean;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// A JSON object built by path writes; last write per path wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraVars {
    doc: Value,
}

impl Default for ExtraVars {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtraVars {
    pub fn new() -> Self {
        Self {
            doc: Value::Object(Map::new()),
        }
    }

    pub fn set<S: AsRef<str>>(&mut self, path: &[S], value: impl Into<Value>) {
        set_path(&mut self.doc, path, value.into());
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        get_path(&self.doc, path)
    }

    pub fn as_value(&self) -> &Value {
        &self.doc
    }

    /// Top-level keys, for logging without values.
    pub fn keys(&self) -> Vec<&str> {
        self.doc
            .as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Everything the builder reads. `source` must already carry its fallback values.
pub struct ExtraVarsInput<'a> {
    pub build: &'a BuildEnvironment,
    pub source: &'a Source,
    pub params: &'a OutParams,
    pub workdir: &'a Path,
}

/// Assemble the document in contract order.
pub fn build_extra_vars(
    input: &ExtraVarsInput<'_>,
    evaluator: &Evaluator,
) -> Result<ExtraVars, EvaluationError> {
    let ExtraVarsInput {
        build,
        source,
        params,
        workdir,
    } = input;
    let mut vars = ExtraVars::new();

    vars.set(&["concourse_atc_external_url"], build.atc_external_url.as_str());
    vars.set(&["concourse_build_id"], build.id.as_str());
    vars.set(&["concourse_build_job"], build.job.as_str());
    vars.set(&["concourse_build_name"], build.name.as_str());
    vars.set(&["concourse_build_pipeline"], build.pipeline.as_str());
    vars.set(&["concourse_build_team"], build.team.as_str());

    vars.set(&["component"], source.component.as_str());
    let storage = &source.storage;
    vars.set(&["storage", "aws_access_key_id"], storage.aws_access_key_id.as_str());
    vars.set(&["storage", "aws_secret_access_key"], storage.aws_secret_access_key.as_str());
    vars.set(&["storage", "bucket"], storage.bucket.as_str());
    vars.set(&["storage", "key"], storage.key.as_str());
    vars.set(&["storage", "region"], storage.region.as_str());
    vars.set(&["workdir"], workdir.to_string_lossy().into_owned());

    let context = evaluator.field("params.context", &params.context)?;
    vars.set(&["context"], context.as_str());

    let workspace = evaluator.field("params.workspace", &params.workspace)?;
    let workspace = if workspace.is_empty() { context } else { workspace };
    vars.set(&["terraform_workspace"], workspace);

    if !params.release_version.is_empty() {
        // Re-evaluates the context expression; there is no dedicated
        // release-version expression in the request.
        let release = evaluator.field("params.release_version", &params.context)?;
        vars.set(&["release_version"], release);
    }

    if !params.vars_mapping.is_empty()
        && let Some(tfvars) = evaluator.mapping("params.vars_mapping", &params.vars_mapping)?
    {
        vars.set(&["terraform_vars"], tfvars);
    }

    if !params.var_files.is_empty() {
        let var_files = params
            .var_files
            .iter()
            .enumerate()
            .map(|(i, file)| {
                let file = evaluator.field(&format!("params.var_files[{i}]"), file)?;
                Ok::<_, EvaluationError>(if file.starts_with('/') {
                    file
                } else {
                    join_clean(workdir, &file).to_string_lossy().into_owned()
                })
            })
            .collect::<Result<Vec<_>, EvaluationError>>()?;
        vars.set(&["terraform_var_files"], var_files);
    }

    vars.set(
        &["terraform_path"],
        join_clean(workdir, &params.dir).to_string_lossy().into_owned(),
    );
    vars.set(&["plan_only"], params.plan_only);
    vars.set(&["destroy"], params.destroy);

    debug!(keys = ?vars.keys(), "Built extra vars");
    Ok(vars)
}

#[derive(Debug, Error)]
pub enum VarsFileError {
    #[error("failed to create extra vars file: {0}")]
    Create(#[source] io::Error),
    #[error("failed to write extra vars file: {0}")]
    Write(#[source] io::Error),
    #[error("failed to serialize extra vars: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The serialized document on disk. The file is owner-only and is removed
/// when the guard drops.
#[derive(Debug)]
pub struct VarsFile {
    file: NamedTempFile,
}

impl VarsFile {
    pub fn write(vars: &ExtraVars) -> Result<Self, VarsFileError> {
        let mut file = tempfile::Builder::new()
            .prefix("tfres-extra-vars-")
            .suffix(".json")
            .tempfile()
            .map_err(VarsFileError::Create)?;
        let bytes = serde_json::to_vec(vars.as_value())?;
        file.write_all(&bytes).map_err(VarsFileError::Write)?;
        file.flush().map_err(VarsFileError::Write)?;
        debug!(path = %file.path().display(), bytes = bytes.len(), "Wrote extra vars file");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// `@<path>` argument form understood by `ansible-playbook -e`.
    pub fn as_arg(&self) -> String {
        format!("@{}", self.path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Storage, VaultSource};
    use serde_json::json;

    fn build_env() -> BuildEnvironment {
        BuildEnvironment {
            id: "2199".into(),
            name: "217".into(),
            job: "testing".into(),
            pipeline: "example-component".into(),
            team: "sre".into(),
            atc_external_url: "http://127.0.0.1:8080".into(),
        }
    }

    fn source() -> Source {
        let mut source = Source {
            storage: Storage {
                aws_access_key_id: "AKIA".into(),
                aws_secret_access_key: "secret".into(),
                bucket: "bucket".into(),
                region: "us-east-2".into(),
                ..Default::default()
            },
            vault: VaultSource {
                addr: "https://vault:8200".into(),
                role_id: "role".into(),
                secret_id: "secret".into(),
            },
            ..Default::default()
        };
        source.assign_fallback_values("sre", "example-component", "concourse-terraform-resource");
        source
    }

    fn params(context: &str, dir: &str) -> OutParams {
        OutParams {
            context: context.into(),
            dir: dir.into(),
            ..Default::default()
        }
    }

    fn build(params: &OutParams, evaluator: &Evaluator) -> ExtraVars {
        let env = build_env();
        let source = source();
        build_extra_vars(
            &ExtraVarsInput {
                build: &env,
                source: &source,
                params,
                workdir: Path::new("/tmp/build/put"),
            },
            evaluator,
        )
        .unwrap()
    }

    #[test]
    fn test_base_document() {
        let vars = build(&params("qa1-use2", "source/terraform"), &Evaluator::default());
        let doc = vars.as_value();

        assert_eq!(doc["concourse_atc_external_url"], json!("http://127.0.0.1:8080"));
        assert_eq!(doc["concourse_build_id"], json!("2199"));
        assert_eq!(doc["concourse_build_job"], json!("testing"));
        assert_eq!(doc["concourse_build_name"], json!("217"));
        assert_eq!(doc["concourse_build_pipeline"], json!("example-component"));
        assert_eq!(doc["concourse_build_team"], json!("sre"));
        assert_eq!(doc["component"], json!("example-component"));
        assert_eq!(
            doc["storage"]["key"],
            json!("sre/example-component/concourse-terraform-resource/version.tgz")
        );
        assert_eq!(doc["workdir"], json!("/tmp/build/put"));
        assert_eq!(doc["context"], json!("qa1-use2"));
        assert_eq!(doc["terraform_workspace"], json!("qa1-use2"));
        assert_eq!(doc["terraform_path"], json!("/tmp/build/put/source/terraform"));
        assert_eq!(doc["plan_only"], json!(false));
        assert_eq!(doc["destroy"], json!(false));
        assert!(vars.get(&["release_version"]).is_none());
        assert!(vars.get(&["terraform_vars"]).is_none());
        assert!(vars.get(&["terraform_var_files"]).is_none());
    }

    #[test]
    fn test_workspace_precedence() {
        let cases = [
            ("qa1-use2", "", "qa1-use2"),
            ("qa1-use2", "monitoring", "monitoring"),
            ("", "monitoring", "monitoring"),
            ("", "", ""),
        ];
        for (context, workspace, expected) in cases {
            let mut p = params(context, "tf");
            p.workspace = workspace.into();
            let vars = build(&p, &Evaluator::default());
            assert_eq!(
                vars.get(&["terraform_workspace"]),
                Some(&json!(expected)),
                "context={context:?} workspace={workspace:?}"
            );
        }
    }

    #[test]
    fn test_templated_fields_use_input_context() {
        let evaluator = Evaluator::new(json!({
            "context": "qa1-use2",
            "workspace": "qa1-use2-monitoring",
            "vars": {"region": "us-east-2", "list": [1, 2, 3]}
        }));
        let mut p = params(r#"${!json("context")}"#, "source/terraform");
        p.workspace = r#"${!json("workspace")}"#.into();
        p.release_version = "true".into();
        p.vars_mapping = "root = vars\nfoo = \"bar\"\ntest_bool = true".into();

        let vars = build(&p, &evaluator);
        assert_eq!(vars.get(&["context"]), Some(&json!("qa1-use2")));
        assert_eq!(vars.get(&["terraform_workspace"]), Some(&json!("qa1-use2-monitoring")));
        assert_eq!(vars.get(&["release_version"]), Some(&json!("qa1-use2")));
        assert_eq!(
            vars.get(&["terraform_vars"]),
            Some(&json!({
                "region": "us-east-2",
                "list": [1, 2, 3],
                "foo": "bar",
                "test_bool": true
            }))
        );
    }

    #[test]
    fn test_vars_mapping_without_root_assignment_keeps_context() {
        let mut p = params("ctx", "tf");
        p.vars_mapping = "let x = 1".into();
        let vars = build(&p, &Evaluator::new(json!({"region": "us"})));
        assert_eq!(vars.get(&["terraform_vars"]), Some(&json!({"region": "us"})));

        p.vars_mapping = "# only a comment".into();
        let vars = build(&p, &Evaluator::default());
        assert_eq!(vars.get(&["terraform_vars"]), Some(&json!({})));

        p.vars_mapping = "root = deleted()".into();
        let vars = build(&p, &Evaluator::new(json!({"region": "us"})));
        assert!(vars.get(&["terraform_vars"]).is_none());

        p.vars_mapping = "test_bool = true".into();
        let vars = build(&p, &Evaluator::default());
        assert_eq!(vars.get(&["terraform_vars"]), Some(&json!({"test_bool": true})));
    }

    #[test]
    fn test_var_files_resolve_against_workdir() {
        let mut p = params("qa1", "tf");
        p.var_files = vec![
            "vars/${!json(\"env\")}.tfvars".into(),
            "/etc/shared.tfvars".into(),
            "./a/../b.tfvars".into(),
        ];
        let vars = build(&p, &Evaluator::new(json!({"env": "qa1"})));
        assert_eq!(
            vars.get(&["terraform_var_files"]),
            Some(&json!([
                "/tmp/build/put/vars/qa1.tfvars",
                "/etc/shared.tfvars",
                "/tmp/build/put/b.tfvars"
            ]))
        );
    }

    #[test]
    fn test_terraform_path_variants() {
        for (dir, expected) in [
            ("terraform", "/tmp/build/put/terraform"),
            ("repo/infra/terraform", "/tmp/build/put/repo/infra/terraform"),
            ("", "/tmp/build/put"),
            ("/opt/tf", "/tmp/build/put/opt/tf"),
            ("../tf", "/tmp/build/tf"),
        ] {
            let vars = build(&params("ctx", dir), &Evaluator::default());
            assert_eq!(vars.get(&["terraform_path"]), Some(&json!(expected)));
        }
    }

    #[test]
    fn test_flags_pass_through() {
        let mut p = params("ctx", "tf");
        p.plan_only = true;
        p.destroy = true;
        let vars = build(&p, &Evaluator::default());
        assert_eq!(vars.get(&["plan_only"]), Some(&json!(true)));
        assert_eq!(vars.get(&["destroy"]), Some(&json!(true)));
    }

    #[test]
    fn test_evaluation_failure_names_field() {
        let mut p = params("ctx", "tf");
        p.workspace = "${!json(".into();
        let env = build_env();
        let source = source();
        let err = build_extra_vars(
            &ExtraVarsInput {
                build: &env,
                source: &source,
                params: &p,
                workdir: Path::new("/w"),
            },
            &Evaluator::default(),
        )
        .unwrap_err();
        assert_eq!(err.what, "params.workspace");
    }

    #[test]
    fn test_vars_file_round_trip_and_cleanup() {
        let mut vars = ExtraVars::new();
        vars.set(&["context"], "qa1");
        let file = VarsFile::write(&vars).unwrap();
        let path = file.path().to_path_buf();

        let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"context": "qa1"}));
        assert!(file.as_arg().starts_with('@'));

        drop(file);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_vars_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let file = VarsFile::write(&ExtraVars::new()).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
