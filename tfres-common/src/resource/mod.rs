//! The three resource commands.
//!
//! Each reads one JSON request from an input stream and writes one JSON
//! response to an output stream. Nothing is written on failure.

pub mod check;
pub mod fetch;
pub mod put;

pub use check::run_check;
pub use fetch::run_in;
pub use put::{PutContext, run_put};

use crate::errors::ResourceError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

/// Which command the process was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Check,
    In,
    Out,
}

impl Operation {
    /// Map an executable name (`/opt/resource/out`) onto a command.
    pub fn from_program_name(program: &str) -> Option<Self> {
        match Path::new(program).file_name()?.to_str()? {
            "check" => Some(Self::Check),
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strictly decode a request document.
pub fn read_request<T: DeserializeOwned, R: Read>(input: R) -> Result<T, ResourceError> {
    serde_json::from_reader(input).map_err(|e| {
        if e.is_io() {
            ResourceError::ReadRequest(e.into())
        } else {
            ResourceError::Decode(e)
        }
    })
}

/// Write a response document followed by a newline.
pub fn write_response<T: Serialize, W: Write>(mut output: W, response: &T) -> Result<(), ResourceError> {
    serde_json::to_writer(&mut output, response).map_err(|e| {
        if e.is_io() {
            ResourceError::WriteResponse(e.into())
        } else {
            ResourceError::Serialize(e)
        }
    })?;
    output
        .write_all(b"\n")
        .and_then(|()| output.flush())
        .map_err(ResourceError::WriteResponse)
}
