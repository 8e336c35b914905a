//! Remote execution error types

use thiserror::Error;

/// A node could not be reached or a transfer failed at the transport level
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("Transfer failed on {host} ({path}): {message}")]
    Transfer {
        host: String,
        path: String,
        message: String,
    },

    #[error("Command could not be executed on {host}: {message}")]
    Command { host: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Adapter errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Remote command failed on {host} (exit {status}): {command}\n{stderr}")]
    Command {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Postcondition failed on {host}: {message}")]
    Postcondition { host: String, message: String },
}

pub type Result<T> = std::result::Result<T, RemoteError>;
