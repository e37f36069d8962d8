//! `in`: validate the requested version and echo it back.

use super::{read_request, write_response};
use crate::errors::ResourceError;
use crate::types::{InRequest, VersionResponse};
use std::io::{Read, Write};
use tracing::info;

pub fn run_in<R: Read, W: Write>(input: R, output: W) -> Result<VersionResponse, ResourceError> {
    let request: InRequest = read_request(input)?;
    request.validate()?;
    info!(
        key = %request.version.key,
        version_id = %request.version.version_id,
        "Fetched version"
    );
    let response = VersionResponse::new(request.version);
    write_response(output, &response)?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    const SOURCE: &str = r#""source": {"storage": {"aws_access_key_id": "a", "aws_secret_access_key": "s", "bucket": "b", "region": "r"}, "vault": {"addr": "x", "role_id": "r", "secret_id": "s"}}"#;

    #[test]
    fn test_in_echoes_version() {
        let payload = format!(r#"{{{SOURCE}, "version": {{"key": "k", "version_id": "v"}}}}"#);
        let mut out = Vec::new();
        let response = run_in(payload.as_bytes(), &mut out).unwrap();
        assert_eq!(response.version.version_id, "v");
        assert!(response.metadata.is_empty());
        assert_eq!(
            String::from_utf8(out).unwrap().trim(),
            r#"{"version":{"key":"k","version_id":"v"},"metadata":[]}"#
        );
    }

    #[test]
    fn test_in_requires_complete_version() {
        let payload = format!(r#"{{{SOURCE}, "version": {{"key": "k"}}}}"#);
        let mut out = Vec::new();
        let err = run_in(payload.as_bytes(), &mut out).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestInvalidVersion);
        assert!(out.is_empty());
    }

    #[test]
    fn test_in_requires_version_field() {
        let payload = format!("{{{SOURCE}}}");
        let err = run_in(payload.as_bytes(), Vec::new()).unwrap_err();
        assert!(matches!(err, ResourceError::Decode(_)));
    }
}
