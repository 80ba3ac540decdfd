//! Error types for docksync-core.

use thiserror::Error;

/// Failures reported by a [`crate::ControlPlane`] implementation.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The referenced object does not exist (or no longer exists).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The endpoint is not an orchestrator manager, so services cannot be listed.
    #[error("endpoint is not a swarm manager; services are unavailable")]
    SwarmUnavailable,

    /// The control plane answered but refused the operation.
    #[error("{operation} failed: {message}")]
    Command { operation: String, message: String },

    /// The control plane could not be reached at all.
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The control plane answered with something we could not decode.
    #[error("could not decode {operation} output: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ControlPlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound { .. })
    }
}

/// Invalid user-supplied configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("destination must be in the form <container-or-service>:<path>, got '{0}'")]
    MalformedDestination(String),

    #[error("destination path must be absolute, got '{0}'")]
    RelativeDestination(String),
}
