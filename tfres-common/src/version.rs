//! Version reported back after a put.

use crate::types::Version;
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Read the version the playbook wrote to `<workdir>/<version_file>`.
///
/// A missing, unreadable or blank file is not an error: the current UTC time
/// (RFC 3339, nanoseconds) is used instead.
pub fn resolve_version(workdir: &Path, version_file: &str, key: &str) -> Version {
    let path = workdir.join(version_file);
    let version_id = match fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => {
            debug!(path = %path.display(), "Read version from playbook output");
            contents.trim_end().to_string()
        }
        Ok(_) => {
            warn!(path = %path.display(), "Version file is empty, using timestamp");
            fallback_version_id()
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No version file, using timestamp");
            fallback_version_id()
        }
    };
    Version::new(key, version_id)
}

fn fallback_version_id() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
