use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the watcher and the driver loop.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("target resolution failed: {0}")]
    Resolution(#[from] docksync_detector::ResolutionError),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cleanup failed: {0}")]
    Cleanup(#[from] docksync_sync::CleanupError),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("signal handler failed: {0}")]
    Signal(#[source] std::io::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
