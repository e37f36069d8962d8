//! `check`: echo the supplied version, if any.

use super::{read_request, write_response};
use crate::errors::ResourceError;
use crate::types::{CheckRequest, CheckResponse};
use std::io::{Read, Write};
use tracing::debug;

pub fn run_check<R: Read, W: Write>(input: R, output: W) -> Result<CheckResponse, ResourceError> {
    let request: CheckRequest = read_request(input)?;
    let versions: CheckResponse = request.version.into_iter().collect();
    debug!(count = versions.len(), "Check complete");
    write_response(output, &versions)?;
    Ok(versions)
}
