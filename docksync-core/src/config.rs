//! Run configuration assembled by the binary and passed down unchanged.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::defaults::{DEBOUNCE_WINDOW, RELAY_IMAGE, STOP_TIMEOUT};
use crate::error::ConfigError;

/// `<container-or-service>:<path>` as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub target: String,
    pub path: String,
}

impl FromStr for Destination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, path) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedDestination(s.to_string()))?;
        if target.is_empty() || path.is_empty() {
            return Err(ConfigError::MalformedDestination(s.to_string()));
        }
        if !path.starts_with('/') {
            return Err(ConfigError::RelativeDestination(path.to_string()));
        }
        Ok(Self {
            target: target.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.path)
    }
}

/// Everything the engine needs for one run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Absolute local directory being watched.
    pub source: PathBuf,
    pub destination: Destination,
    /// Restart the container / roll the service after each delivery.
    pub restart: bool,
    pub debounce: Duration,
    pub stop_timeout: Duration,
    pub relay_image: String,
}

impl SyncConfig {
    pub fn new(source: impl Into<PathBuf>, destination: Destination, restart: bool) -> Self {
        Self {
            source: source.into(),
            destination,
            restart,
            debounce: DEBOUNCE_WINDOW,
            stop_timeout: STOP_TIMEOUT,
            relay_image: RELAY_IMAGE.to_string(),
        }
    }
}
