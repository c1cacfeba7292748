//! Error types for the remote dispatch crate

use thiserror::Error;

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or driving a remote session
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to create or attach to a remote session
    #[error("Session setup failed: {0}")]
    SetupError(String),

    /// The remote endpoint URL could not be parsed
    #[error("Invalid remote endpoint: {0}")]
    EndpointError(String),

    /// The worker backing an async handle went away mid-command
    #[error("Session worker gone: {0}")]
    WorkerGone(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
