//! The container/orchestrator control plane as seen by the engine.
//!
//! Nothing in the engine constructs a client: a [`ControlPlane`] is built at
//! the binary edge and handed down as `Arc<dyn ControlPlane>`. All calls are
//! blocking; the driver loop runs them off the async executor.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ControlPlaneError;
use crate::types::MountSpec;

/// Selector for container and service listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
    /// Full id or id prefix.
    Id(String),
    /// Name (the control plane may match partially).
    Name(String),
}

impl ListFilter {
    pub fn needle(&self) -> &str {
        match self {
            ListFilter::Id(value) | ListFilter::Name(value) => value,
        }
    }
}

/// Selector for task listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub service: String,
    pub desired_state: String,
}

impl TaskFilter {
    pub fn running(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            desired_state: "running".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    /// Empty until the task has been scheduled onto a container.
    pub container_id: Option<String>,
}

/// The parts of a service's task template the engine reads and rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Bumping this forces a rolling replacement of every task.
    pub force_update: u64,
    pub mounts: Vec<MountSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInspect {
    pub id: String,
    /// Spec version the next update must be based on.
    pub version: u64,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCreate {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreate {
    pub name: String,
    pub image: String,
    pub mounts: Vec<MountSpec>,
    pub labels: BTreeMap<String, String>,
    pub auto_remove: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Let an archive entry replace a directory with a file and vice versa.
    pub allow_overwrite_dir_with_file: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            allow_overwrite_dir_with_file: true,
        }
    }
}

/// How long a service update blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollout {
    /// Return once the new spec is accepted.
    Detach,
    /// Return once every task runs the new spec and the replaced tasks are gone.
    Wait,
}

/// Operations the engine needs from the container/orchestrator endpoint.
pub trait ControlPlane: Send + Sync + Debug {
    /// List running containers matching `filter`.
    fn list_containers(&self, filter: &ListFilter)
        -> Result<Vec<ContainerSummary>, ControlPlaneError>;

    /// List services matching `filter`.
    fn list_services(&self, filter: &ListFilter) -> Result<Vec<ServiceSummary>, ControlPlaneError>;

    /// List the tasks of a service, in control-plane order.
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, ControlPlaneError>;

    /// Read a service's current spec and version.
    fn inspect_service(&self, id: &str) -> Result<ServiceInspect, ControlPlaneError>;

    /// Create a named volume; returns its name.
    fn create_volume(&self, spec: &VolumeCreate) -> Result<String, ControlPlaneError>;

    /// Create (but do not start) a container; returns its id.
    fn create_container(&self, spec: &ContainerCreate) -> Result<String, ControlPlaneError>;

    fn remove_container(&self, id: &str, force: bool) -> Result<(), ControlPlaneError>;

    fn remove_volume(&self, name: &str, force: bool) -> Result<(), ControlPlaneError>;

    fn start_container(&self, id: &str) -> Result<(), ControlPlaneError>;

    /// Stop gracefully, killing after `timeout`.
    fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ControlPlaneError>;

    /// Replace a service's spec. `version` comes from the inspect it was derived from.
    fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        rollout: Rollout,
    ) -> Result<(), ControlPlaneError>;

    /// Extract a tar stream into the container filesystem at `path`.
    fn copy_archive(
        &self,
        container: &str,
        path: &str,
        archive: &[u8],
        options: CopyOptions,
    ) -> Result<(), ControlPlaneError>;
}
