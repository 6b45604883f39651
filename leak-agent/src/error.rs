//! Error types for agent installation and attachment

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::options::USAGE;

/// Reasons the agent refuses to start
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unknown option: {0}\n{usage}", usage = USAGE)]
    UnknownOption(String),

    #[error("Invalid value for option {option}: {value:?}\n{usage}", usage = USAGE)]
    InvalidValue { option: String, value: String },

    #[error("{usage}", usage = USAGE)]
    Usage,

    #[error("Failed to open trace file {}: {source}", .path.display())]
    TraceFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures seen by the attaching side of the protocol
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("No attach listener for process {pid} at {}", .path.display())]
    NoListener { pid: u32, path: PathBuf },

    #[error("I/O error talking to attach listener: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed attach message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}
