//! Client error types.

use checker_core::{ConfigError, ModelError};
use thiserror::Error;

/// Errors surfaced to the code that starts or controls the client.
///
/// Transport failures never appear here: they are handled by the supervisor's
/// retry loop.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The device identity is missing or empty, so no welcome frame can be sent.
    #[error("Device identity unavailable: {0}")]
    Identity(#[from] ModelError),

    /// The credential store could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The client task has already stopped.
    #[error("Telemetry client is not running")]
    Stopped,
}
