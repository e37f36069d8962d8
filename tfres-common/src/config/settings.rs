//! Build metadata and tool settings, each parsed once at start-up.

use super::env::{EnvError, EnvParser, expand_home};
use crate::types::DEFAULT_RESOURCE_NAME;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Upper bound for `TFRES_TIMEOUT_SECS`: one week.
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Metadata Concourse exports into every resource container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    /// `BUILD_ID`
    pub id: String,
    /// `BUILD_NAME`
    pub name: String,
    /// `BUILD_JOB_NAME`
    pub job: String,
    /// `BUILD_PIPELINE_NAME`
    pub pipeline: String,
    /// `BUILD_TEAM_NAME`
    pub team: String,
    /// `ATC_EXTERNAL_URL`
    pub atc_external_url: String,
}

impl BuildEnvironment {
    /// Read all six variables, reporting every missing one at once.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::unprefixed();
        let env = Self {
            id: parser.require_string("BUILD_ID"),
            name: parser.require_string("BUILD_NAME"),
            job: parser.require_string("BUILD_JOB_NAME"),
            pipeline: parser.require_string("BUILD_PIPELINE_NAME"),
            team: parser.require_string("BUILD_TEAM_NAME"),
            atc_external_url: parser.require_string("ATC_EXTERNAL_URL"),
        };
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(env)
    }
}

/// Knobs of the resource itself (`TFRES_*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Executable used to run playbooks.
    pub playbook_bin: String,
    /// Directory holding `out.yml`.
    pub playbook_dir: PathBuf,
    /// File the playbook writes the produced version into, relative to the workdir.
    pub version_file: String,
    /// Resource name segment of the default storage key.
    pub resource_name: String,
    /// Deadline for the playbook; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Git host whose key is primed into known_hosts.
    pub known_host: String,
    pub known_hosts_file: PathBuf,
    pub ssh_agent_bin: String,
    pub ssh_add_bin: String,
    pub ssh_keyscan_bin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            playbook_bin: "ansible-playbook".to_string(),
            playbook_dir: PathBuf::from("/opt/ansible"),
            version_file: "version_id".to_string(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            timeout: None,
            known_host: "github.com".to_string(),
            known_hosts_file: expand_home("~/.ssh/known_hosts"),
            ssh_agent_bin: "ssh-agent".to_string(),
            ssh_add_bin: "ssh-add".to_string(),
            ssh_keyscan_bin: "ssh-keyscan".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let defaults = Self::default();
        let mut parser = EnvParser::new();

        let timeout = parser.get_timeout("TIMEOUT_SECS", MAX_TIMEOUT_SECS);
        let playbook_dir = parser.get_path("PLAYBOOK_DIR", "/opt/ansible");
        debug!(
            dir = %playbook_dir.value.display(),
            source = %playbook_dir.source,
            "Resolved playbook directory"
        );

        let settings = Self {
            playbook_bin: parser
                .get_string("PLAYBOOK_BIN", &defaults.playbook_bin)
                .into_inner(),
            playbook_dir: playbook_dir.into_inner(),
            version_file: parser
                .get_string("VERSION_FILE", &defaults.version_file)
                .into_inner(),
            resource_name: parser
                .get_string("RESOURCE_NAME", &defaults.resource_name)
                .into_inner(),
            timeout: timeout.into_inner(),
            known_host: parser
                .get_string("KNOWN_HOST", &defaults.known_host)
                .into_inner(),
            known_hosts_file: parser
                .get_path("KNOWN_HOSTS_FILE", "~/.ssh/known_hosts")
                .into_inner(),
            ssh_agent_bin: parser
                .get_string("SSH_AGENT_BIN", &defaults.ssh_agent_bin)
                .into_inner(),
            ssh_add_bin: parser
                .get_string("SSH_ADD_BIN", &defaults.ssh_add_bin)
                .into_inner(),
            ssh_keyscan_bin: parser
                .get_string("SSH_KEYSCAN_BIN", &defaults.ssh_keyscan_bin)
                .into_inner(),
        };

        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }

    /// Absolute path of the out playbook.
    pub fn out_playbook(&self) -> PathBuf {
        self.playbook_dir.join("out.yml")
    }
}
