//! Pipeline error types

use dirfleet_core::{FleetError, NodeId};
use dirfleet_remote::{RemoteError, TransportError};
use thiserror::Error;

/// Node store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Node store version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Node {0} is locked: {1}")]
    Locked(NodeId, String),

    #[error(transparent)]
    Topology(#[from] FleetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that end a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A node could not be reached
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The pipeline cannot start or continue
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A hard step returned an error not covered by its allow-list
    #[error("Command failed on {host} (exit {status}): {command}: {stderr}")]
    RemoteCommand {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// A postcondition re-check failed after a step ran
    #[error("Postcondition failed on {host}: {message}")]
    Postcondition { host: String, message: String },

    /// Topology invariant breach
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RemoteError> for PipelineError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(e) => Self::Transport(e),
            RemoteError::Command {
                host,
                command,
                status,
                stderr,
            } => Self::RemoteCommand {
                host,
                command,
                status,
                stderr,
            },
            RemoteError::Precondition(message) => Self::Precondition(message),
            RemoteError::Postcondition { host, message } => Self::Postcondition { host, message },
        }
    }
}

impl From<FleetError> for PipelineError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::InvariantViolation(message) => Self::InvariantViolation(message),
            FleetError::NodeNotFound(id) => Self::Precondition(format!("Node {} is not registered", id)),
            FleetError::NotInActiveSet(id) => {
                Self::Precondition(format!("Node {} is not in the active replication set", id))
            }
            other => Self::Precondition(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
