//! Request and response documents exchanged with Concourse.
//!
//! Decoding is strict: every struct rejects unknown fields, mirroring the
//! orchestrator contract where a typo in a resource definition must fail the
//! build instead of being silently ignored.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default resource name used when synthesizing the storage key.
pub const DEFAULT_RESOURCE_NAME: &str = "concourse-terraform-resource";

/// Missing storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("missing aws_access_key_id")]
    MissingAccessKeyId,
    #[error("missing aws_secret_access_key")]
    MissingSecretAccessKey,
    #[error("missing bucket")]
    MissingBucket,
    #[error("missing region")]
    MissingRegion,
}

/// Missing vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("missing vault addr")]
    MissingAddr,
    #[error("missing vault role_id")]
    MissingRoleId,
    #[error("missing vault secret_id")]
    MissingSecretId,
}

/// Invalid `source` block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("invalid vault config: {0}")]
    Vault(#[from] VaultError),
    #[error("invalid storage config: {0}")]
    Storage(#[from] StorageError),
}

/// Invalid `params` block of a put.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("missing required parameter (context)")]
    MissingContext,
    #[error("missing required parameter (dir)")]
    MissingDir,
}

/// Invalid version document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("missing key")]
    MissingKey,
    #[error("missing version_id")]
    MissingVersionId,
}

/// Validation failure of a whole request, naming the failing section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid source: {0}")]
    Source(#[from] SourceError),
    #[error("invalid params: {0}")]
    Params(#[from] ParamsError),
    #[error("invalid version: {0}")]
    Version(#[from] VersionError),
}

/// Object storage holding the terraform state bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Storage {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl Storage {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.aws_access_key_id.is_empty() {
            return Err(StorageError::MissingAccessKeyId);
        }
        if self.aws_secret_access_key.is_empty() {
            return Err(StorageError::MissingSecretAccessKey);
        }
        if self.bucket.is_empty() {
            return Err(StorageError::MissingBucket);
        }
        if self.region.is_empty() {
            return Err(StorageError::MissingRegion);
        }
        Ok(())
    }
}

/// Vault approle credentials handed to the playbook's hashi_vault lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultSource {
    pub addr: String,
    pub role_id: String,
    pub secret_id: String,
}

impl VaultSource {
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.addr.is_empty() {
            return Err(VaultError::MissingAddr);
        }
        if self.role_id.is_empty() {
            return Err(VaultError::MissingRoleId);
        }
        if self.secret_id.is_empty() {
            return Err(VaultError::MissingSecretId);
        }
        Ok(())
    }
}

/// Resource-level configuration (`source:` in the pipeline).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Source {
    /// Component name; falls back to the pipeline name.
    pub component: String,
    /// Extra environment for the playbook. Values are templated fields.
    pub envs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    pub storage: Storage,
    pub vault: VaultSource,
}

impl Source {
    pub fn validate(&self) -> Result<(), SourceError> {
        self.vault.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Fill in `component` and `storage.key` from the build metadata.
    ///
    /// Runs once per invocation, after validation and before any templating.
    pub fn assign_fallback_values(&mut self, team: &str, pipeline: &str, resource_name: &str) {
        if self.component.is_empty() {
            self.component = pipeline.to_string();
        }
        if self.storage.key.is_empty() {
            self.storage.key = format!("{}/{}/{}/version.tgz", team, self.component, resource_name);
        }
    }
}

/// Concourse version of this resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Version {
    pub key: String,
    pub version_id: String,
}

impl Version {
    pub fn new(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), VersionError> {
        if self.key.is_empty() {
            return Err(VersionError::MissingKey);
        }
        if self.version_id.is_empty() {
            return Err(VersionError::MissingVersionId);
        }
        Ok(())
    }
}

/// A single metadata entry shown in the Concourse UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
    pub value: String,
}

/// Input of `check`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Option<Version>,
}

/// Output of `check`.
pub type CheckResponse = Vec<Version>;

/// Input of `in`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InRequest {
    pub source: Source,
    pub version: Version,
}

impl InRequest {
    pub fn validate(&self) -> Result<(), RequestError> {
        self.version.validate()?;
        Ok(())
    }
}

/// Output of `in` and `out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: Version,
    pub metadata: Vec<Metadata>,
}

impl VersionResponse {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            metadata: Vec::new(),
        }
    }
}

/// Job-level configuration of a put (`params:` on the put step).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutParams {
    /// Templated deployment context, e.g. `qa1-use2`.
    pub context: String,
    /// Terraform root, relative to the working directory.
    pub dir: String,
    pub envs: BTreeMap<String, String>,
    /// Mapping script whose result becomes the evaluation context.
    pub input_mapping: String,
    pub plan_only: bool,
    pub destroy: bool,
    pub private_key: String,
    #[serde(deserialize_with = "string_or_bool")]
    pub release_version: String,
    /// Templated var-file paths, relative paths resolve against the workdir.
    pub var_files: Vec<String>,
    /// Mapping script producing `terraform_vars`.
    pub vars_mapping: String,
    /// Templated terraform workspace; defaults to the context.
    pub workspace: String,
}

impl OutParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.context.is_empty() {
            return Err(ParamsError::MissingContext);
        }
        if self.dir.is_empty() {
            return Err(ParamsError::MissingDir);
        }
        Ok(())
    }
}

/// Input of `out`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutRequest {
    pub source: Source,
    pub params: OutParams,
}

impl OutRequest {
    pub fn validate(&self) -> Result<(), RequestError> {
        self.source.validate()?;
        self.params.validate()?;
        Ok(())
    }

    /// Source envs overlaid with params envs.
    pub fn envs(&self) -> BTreeMap<String, String> {
        let mut envs = self.source.envs.clone();
        envs.extend(
            self.params
                .envs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        envs
    }

    /// Params-level key takes precedence over the source-level key.
    pub fn private_key(&self) -> Option<&str> {
        [&self.params.private_key, &self.source.private_key]
            .into_iter()
            .find(|key| !key.is_empty())
            .map(String::as_str)
    }
}

/// Accept `"..."`, `true` or `false` and coerce into a string flag.
///
/// `false` becomes the empty (unset) flag.
fn string_or_bool<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(true)) => "true".to_string(),
        Some(Flag::Bool(false)) | None => String::new(),
        Some(Flag::Text(text)) => text,
    })
}
