mod common;

use common::{
    BUILD_ENV, BuildDir, assert_contains, assert_path_missing, init_test_logging, run_with_stdin,
};
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use std::process::Command;

const CAPTURING_PLAYBOOK: &str = r#"#!/bin/sh
vars="${2#@}"
cp "$vars" captured-vars.json
echo "$vars" > vars-path
env > captured-env
echo "$@" > captured-args
echo "PLAY [out] ********"
printf 'v-7\n' > version_id
"#;

fn put_request(params: Value) -> String {
    json!({
        "source": {
            "envs": {"TF_VAR_owner": "sre"},
            "storage": {
                "aws_access_key_id": "AKIA",
                "aws_secret_access_key": "secret",
                "bucket": "tf-state",
                "region": "us-east-2"
            },
            "vault": {"addr": "https://vault:8200", "role_id": "role", "secret_id": "sid"}
        },
        "params": params
    })
    .to_string()
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not a single JSON document ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_includes_description");

    let output = Command::new(env!("CARGO_BIN_EXE_tfres"))
        .arg("--help")
        .output()
        .expect("Failed to run tfres --help");

    assert!(output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stdout), "ansible-playbook");
    crate::test_log!("TEST PASS: test_help_includes_description");
}

#[test]
fn test_check_echoes_version() {
    init_test_logging();
    let build = BuildDir::new();

    let output = run_with_stdin(
        build.command(&["check"]),
        r#"{"source": {}, "version": {"key": "k", "version_id": "v1"}}"#,
    );

    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!([{"key": "k", "version_id": "v1"}]));
}

#[test]
fn test_check_without_version_is_empty() {
    init_test_logging();
    let build = BuildDir::new();

    let output = run_with_stdin(build.command(&["check"]), r#"{"source": {}}"#);

    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!([]));
}

#[test]
fn test_invalid_payload_fails_without_stdout() {
    init_test_logging();
    let build = BuildDir::new();

    let output = run_with_stdin(build.command(&["check"]), "not json");

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "TFRES-E001");
}

#[test]
fn test_in_echoes_version() {
    init_test_logging();
    let build = BuildDir::new();
    let dir = build.path().display().to_string();
    let request = json!({
        "source": {
            "storage": {"aws_access_key_id": "a", "aws_secret_access_key": "s", "bucket": "b", "region": "r"},
            "vault": {"addr": "x", "role_id": "r", "secret_id": "s"}
        },
        "version": {"key": "k", "version_id": "v9"}
    });

    let output = run_with_stdin(build.command(&["in", &dir]), &request.to_string());

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        stdout_json(&output),
        json!({"version": {"key": "k", "version_id": "v9"}, "metadata": []})
    );
}

#[test]
fn test_out_runs_playbook_and_reports_version() {
    init_test_logging();
    crate::test_log!("TEST START: test_out_runs_playbook_and_reports_version");
    let build = BuildDir::new();
    build.playbook(CAPTURING_PLAYBOOK);
    let dir = build.path().display().to_string();
    let request = put_request(json!({
        "context": "qa1-use2",
        "dir": "source/terraform",
        "vars_mapping": "region = \"us-east-2\"",
        "envs": {"TF_VAR_context": "${!\"ctx-\"}qa1"}
    }));

    let output = run_with_stdin(build.command(&["out", &dir]), &request);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    assert_eq!(
        stdout_json(&output),
        json!({
            "version": {
                "key": "sre/example-component/concourse-terraform-resource/version.tgz",
                "version_id": "v-7"
            },
            "metadata": []
        })
    );
    assert_contains(&stderr, "PLAY [out]");

    let vars: Value =
        serde_json::from_str(&fs::read_to_string(build.path().join("captured-vars.json")).unwrap())
            .unwrap();
    assert_eq!(vars["concourse_build_id"], json!("2199"));
    assert_eq!(vars["component"], json!("example-component"));
    assert_eq!(vars["terraform_workspace"], json!("qa1-use2"));
    assert_eq!(vars["terraform_vars"], json!({"region": "us-east-2"}));
    assert_eq!(vars["plan_only"], json!(false));

    let env = fs::read_to_string(build.path().join("captured-env")).unwrap();
    assert_contains(&env, "ANSIBLE_HASHI_VAULT_ADDR=https://vault:8200");
    assert_contains(&env, "ANSIBLE_HASHI_VAULT_AUTH_METHOD=approle");
    assert_contains(&env, "TF_VAR_owner=sre");
    assert_contains(&env, "TF_VAR_context=ctx-qa1");

    let args = fs::read_to_string(build.path().join("captured-args")).unwrap();
    assert_contains(&args, "-e @");
    assert_contains(&args, &format!("{}/out.yml", build.tools.path().display()));

    let vars_path = PathBuf::from(fs::read_to_string(build.path().join("vars-path")).unwrap().trim());
    assert_path_missing(&vars_path);
    crate::test_log!("TEST PASS: test_out_runs_playbook_and_reports_version");
}

#[test]
fn test_out_falls_back_to_timestamp_version() {
    init_test_logging();
    let build = BuildDir::new();
    build.playbook("#!/bin/sh\nexit 0\n");
    let dir = build.path().display().to_string();

    let output = run_with_stdin(
        build.command(&["out", &dir]),
        &put_request(json!({"context": "c", "dir": "d"})),
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let version_id = stdout_json(&output)["version"]["version_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(version_id.ends_with('Z'), "{version_id}");
    assert_contains(&version_id, "T");
}

#[test]
fn test_out_playbook_failure() {
    init_test_logging();
    let build = BuildDir::new();
    build.playbook("#!/bin/sh\necho \"$2\" > vars-path\nexit 3\n");
    let dir = build.path().display().to_string();

    let output = run_with_stdin(
        build.command(&["out", &dir]),
        &put_request(json!({"context": "c", "dir": "d"})),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "TFRES-E301");
    let vars_arg = fs::read_to_string(build.path().join("vars-path")).unwrap();
    assert_path_missing(&PathBuf::from(vars_arg.trim().trim_start_matches('@')));
}

#[test]
fn test_out_requires_build_metadata() {
    init_test_logging();
    let build = BuildDir::new();
    build.playbook(CAPTURING_PLAYBOOK);
    let dir = build.path().display().to_string();
    let mut cmd = build.command(&["out", &dir]);
    for (name, _) in BUILD_ENV {
        cmd.env_remove(name);
    }

    let output = run_with_stdin(cmd, &put_request(json!({"context": "c", "dir": "d"})));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "TFRES-E400");
    assert_contains(&stderr, "BUILD_TEAM_NAME");
    assert!(!build.path().join("captured-args").exists());
}

#[test]
fn test_out_rejects_invalid_request() {
    init_test_logging();
    let build = BuildDir::new();
    build.playbook(CAPTURING_PLAYBOOK);
    let dir = build.path().display().to_string();

    let output = run_with_stdin(build.command(&["out", &dir]), &put_request(json!({"dir": "d"})));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "missing required parameter (context)");
    assert!(!build.path().join("captured-args").exists());
}
