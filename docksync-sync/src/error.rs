//! Error types for docksync-sync.

use std::path::PathBuf;

use thiserror::Error;

use docksync_core::ControlPlaneError;
use docksync_detector::ResolutionError;

/// Building or delivering an archive failed. The event is dropped and the
/// workload is left untouched.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("could not resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while reading a file or directory into the archive.
    #[error("could not archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("delivery to container {container} failed: {source}")]
    Transport {
        container: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("could not provision relay {resource}: {source}")]
    Relay {
        resource: &'static str,
        #[source]
        source: ControlPlaneError,
    },

    #[error("relay resources were already torn down")]
    RelayClosed,
}

/// The payload landed but the workload could not be restarted or rolled.
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("stopping container {id} failed: {source}")]
    Stop {
        id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("starting container {id} failed: {source}")]
    Start {
        id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("inspecting service {service} failed: {source}")]
    Inspect {
        service: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("updating service {service} failed: {source}")]
    Update {
        service: String,
        #[source]
        source: ControlPlaneError,
    },
}

/// Tearing down the relay resources failed.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("detaching relay volume from service {service} failed: {source}")]
    Detach {
        service: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("removing relay container {id} failed: {source}")]
    RemoveContainer {
        id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("removing relay volume {name} failed: {source}")]
    RemoveVolume {
        name: String,
        #[source]
        source: ControlPlaneError,
    },
}

/// Everything a single delivery can fail with.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("target lookup failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("restart failed: {0}")]
    Restart(#[from] RestartError),
}

/// Convenience constructor for [`TransferError::Archive`].
pub(crate) fn archive_err(path: impl Into<PathBuf>, source: std::io::Error) -> TransferError {
    TransferError::Archive {
        path: path.into(),
        source,
    }
}
