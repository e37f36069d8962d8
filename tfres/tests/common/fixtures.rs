use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Build metadata Concourse exports into the container.
pub const BUILD_ENV: [(&str, &str); 6] = [
    ("BUILD_ID", "2199"),
    ("BUILD_NAME", "217"),
    ("BUILD_JOB_NAME", "deploy"),
    ("BUILD_PIPELINE_NAME", "example-component"),
    ("BUILD_TEAM_NAME", "sre"),
    ("ATC_EXTERNAL_URL", "http://127.0.0.1:8080"),
];

/// A put's working directory plus a directory for fake tools.
pub struct BuildDir {
    pub work: TempDir,
    pub tools: TempDir,
}

impl BuildDir {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating build directory");
        Self {
            work: TempDir::new().expect("Failed to create work dir"),
            tools: TempDir::new().expect("Failed to create tools dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.work.path()
    }

    /// Install a fake `ansible-playbook` and return its path.
    pub fn playbook(&self, body: &str) -> PathBuf {
        let path = self.tools.path().join("ansible-playbook");
        fs::write(&path, body).expect("Failed to write fake playbook");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod fake playbook");
        path
    }

    /// `tfres <args>` with build metadata and the fake tools configured.
    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tfres"));
        cmd.args(args)
            .envs(BUILD_ENV)
            .env("TFRES_PLAYBOOK_BIN", self.tools.path().join("ansible-playbook"))
            .env("TFRES_PLAYBOOK_DIR", self.tools.path())
            .env_remove("TFRES_LOG_FORMAT")
            .env_remove("TFRES_LOG_FILE");
        cmd
    }
}

/// Run `cmd` with `stdin` as the request.
pub fn run_with_stdin(mut cmd: Command, stdin: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn tfres");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin.as_bytes())
        .expect("Failed to write request");
    child.wait_with_output().expect("Failed to wait for tfres")
}
