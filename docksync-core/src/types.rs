//! Domain types shared by the resolver, the transfer layer and the watcher.
//!
//! Local filesystem paths are `PathBuf`; paths inside a target container are
//! `String`s in POSIX form, whatever the host convention is.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Control-plane id of a container or a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl TargetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of workload a target turned out to be. Decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Container,
    Service,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Container => write!(f, "container"),
            TargetKind::Service => write!(f, "service"),
        }
    }
}

/// Kind of filesystem change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Write,
    Remove,
    Rename,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Create => write!(f, "create"),
            ChangeOp::Write => write!(f, "write"),
            ChangeOp::Remove => write!(f, "remove"),
            ChangeOp::Rename => write!(f, "rename"),
        }
    }
}

/// Mount flavours that can appear in a workload's mount list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Volume,
    Bind,
    Tmpfs,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::Volume => write!(f, "volume"),
            MountType::Bind => write!(f, "bind"),
            MountType::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The resolved workload receiving synced files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub id: TargetId,
    pub kind: TargetKind,
    /// Identifier as typed by the user, kept for messages.
    pub identifier: String,
    /// Absolute POSIX path inside the workload.
    pub destination: String,
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}):{}",
            self.kind, self.identifier, self.id, self.destination
        )
    }
}

/// One debounced filesystem change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Absolute local path.
    pub path: PathBuf,
    pub op: ChangeOp,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, op: ChangeOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// A single entry of a workload's mount list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub mount_type: MountType,
    pub source: String,
    pub target: String,
}

impl MountSpec {
    pub fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            mount_type: MountType::Volume,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// The relay container + volume pair staged for a service restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryResource {
    pub container_id: String,
    pub volume_name: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
