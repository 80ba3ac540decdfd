//! docksync core library: domain types, the control-plane capability, errors.
//!
//! - [`types`] — targets, change events, mounts, relay resources
//! - [`control_plane`] — the [`ControlPlane`] trait every engine component is handed
//! - [`config`] — [`SyncConfig`] and `<target>:<path>` destination parsing
//! - [`naming`] — relay names and the relay-mount recognition rule
//! - [`error`] — [`ControlPlaneError`], [`ConfigError`]

pub mod config;
pub mod control_plane;
pub mod defaults;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod naming;
pub mod types;

pub use config::{Destination, SyncConfig};
pub use control_plane::{
    ContainerCreate, ContainerSummary, ControlPlane, CopyOptions, ListFilter, Rollout,
    ServiceInspect, ServiceSpec, ServiceSummary, TaskFilter, TaskSummary, VolumeCreate,
};
pub use error::{ConfigError, ControlPlaneError};
pub use types::{
    ChangeEvent, ChangeOp, MountSpec, MountType, SyncTarget, TargetId, TargetKind,
    TemporaryResource,
};
