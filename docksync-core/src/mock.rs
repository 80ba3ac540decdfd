//! In-memory [`ControlPlane`] for tests.
//!
//! Records every call as `"operation:argument"`, keeps delivered archives and
//! service updates for inspection, and can be told to fail one operation.
//!
//! A volume stays in use while a service mounts it, and also while tasks of a
//! detached rollout that dropped it may still be running. Removing an in-use
//! volume fails the way the daemon refuses it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::control_plane::{
    ContainerCreate, ContainerSummary, ControlPlane, CopyOptions, ListFilter, Rollout,
    ServiceInspect, ServiceSpec, ServiceSummary, TaskFilter, TaskSummary, VolumeCreate,
};
use crate::error::ControlPlaneError;
use crate::types::{MountSpec, MountType};

/// One `copy_archive` call as received.
#[derive(Debug, Clone)]
pub struct DeliveredArchive {
    pub container: String,
    pub path: String,
    pub archive: Vec<u8>,
    pub options: CopyOptions,
}

#[derive(Debug, Clone)]
struct MockService {
    summary: ServiceSummary,
    version: u64,
    spec: ServiceSpec,
    tasks: Vec<TaskSummary>,
    /// Volumes dropped by a detached rollout that has not converged.
    draining: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: Vec<ContainerSummary>,
    created: BTreeMap<String, ContainerCreate>,
    stopped: Vec<String>,
    services: Vec<MockService>,
    volumes: BTreeMap<String, BTreeMap<String, String>>,
    archives: Vec<DeliveredArchive>,
    rollouts: Vec<(String, Rollout)>,
}

#[derive(Debug, Default)]
pub struct MockControlPlane {
    state: RwLock<MockState>,
    calls: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    swarm_unavailable: RwLock<bool>,
    next_id: AtomicU64,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container.
    pub fn add_container(&self, id: &str, name: &str) {
        self.state.write().unwrap().containers.push(ContainerSummary {
            id: id.to_string(),
            names: vec![format!("/{name}")],
        });
    }

    /// Register a service with the given mount list, at version 1.
    pub fn add_service(&self, id: &str, name: &str, mounts: Vec<MountSpec>) {
        self.state.write().unwrap().services.push(MockService {
            summary: ServiceSummary {
                id: id.to_string(),
                name: name.to_string(),
            },
            version: 1,
            spec: ServiceSpec {
                name: name.to_string(),
                force_update: 0,
                mounts,
            },
            tasks: Vec::new(),
            draining: Vec::new(),
        });
    }

    /// Attach a running task backed by `container_id` to a service.
    pub fn add_task(&self, service_id: &str, task_id: &str, container_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(service) = state
            .services
            .iter_mut()
            .find(|s| s.summary.id == service_id)
        {
            service.tasks.push(TaskSummary {
                id: task_id.to_string(),
                container_id: Some(container_id.to_string()),
            });
        }
        if !state.containers.iter().any(|c| c.id == container_id) {
            state.containers.push(ContainerSummary {
                id: container_id.to_string(),
                names: vec![format!("/{task_id}")],
            });
        }
    }

    /// Make every call of `operation` fail until cleared.
    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    /// Behave like an endpoint that is not a swarm manager.
    pub fn set_swarm_unavailable(&self, unavailable: bool) {
        *self.swarm_unavailable.write().unwrap() = unavailable;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Calls whose operation name is `operation`.
    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{operation}:");
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(&prefix))
            .collect()
    }

    pub fn archives(&self) -> Vec<DeliveredArchive> {
        self.state.read().unwrap().archives.clone()
    }

    pub fn service_spec(&self, id: &str) -> Option<ServiceSpec> {
        self.state
            .read()
            .unwrap()
            .services
            .iter()
            .find(|s| s.summary.id == id)
            .map(|s| s.spec.clone())
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.read().unwrap().volumes.keys().cloned().collect()
    }

    /// Service id and rollout mode of every accepted update, in order.
    pub fn rollouts(&self) -> Vec<(String, Rollout)> {
        self.state.read().unwrap().rollouts.clone()
    }

    pub fn volume_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.read().unwrap().volumes.get(name).cloned()
    }

    /// Containers created through the control plane and not yet removed.
    pub fn created_containers(&self) -> Vec<(String, ContainerCreate)> {
        self.state
            .read()
            .unwrap()
            .created
            .iter()
            .map(|(id, spec)| (id.clone(), spec.clone()))
            .collect()
    }

    /// Containers that were stopped and not started again.
    pub fn stopped_containers(&self) -> Vec<String> {
        self.state.read().unwrap().stopped.clone()
    }

    fn record(&self, operation: &str, argument: &str) {
        self.calls
            .write()
            .unwrap()
            .push(format!("{operation}:{argument}"));
    }

    fn check_fail(&self, operation: &str) -> Result<(), ControlPlaneError> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                return Err(ControlPlaneError::Command {
                    operation: operation.to_string(),
                    message: format!("mock failure on: {operation}"),
                });
            }
        }
        Ok(())
    }

    fn check_swarm(&self) -> Result<(), ControlPlaneError> {
        if *self.swarm_unavailable.read().unwrap() {
            return Err(ControlPlaneError::SwarmUnavailable);
        }
        Ok(())
    }

    fn container_known(state: &MockState, id: &str) -> bool {
        state.containers.iter().any(|c| c.id == id) || state.created.contains_key(id)
    }

    fn volume_in_use(state: &MockState, name: &str) -> bool {
        state.services.iter().any(|service| {
            service.draining.iter().any(|v| v == name)
                || volume_sources(&service.spec).any(|v| v == name)
        })
    }
}

fn volume_sources(spec: &ServiceSpec) -> impl Iterator<Item = &str> {
    spec.mounts
        .iter()
        .filter(|m| m.mount_type == MountType::Volume)
        .map(|m| m.source.as_str())
}

impl ControlPlane for MockControlPlane {
    fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerSummary>, ControlPlaneError> {
        self.record("list_containers", filter.needle());
        self.check_fail("list_containers")?;

        let state = self.state.read().unwrap();
        let found = state
            .containers
            .iter()
            .filter(|c| match filter {
                ListFilter::Id(needle) => c.id.starts_with(needle.as_str()),
                ListFilter::Name(needle) => c.names.iter().any(|n| n.contains(needle.as_str())),
            })
            .filter(|c| !state.stopped.contains(&c.id))
            .cloned()
            .collect();
        Ok(found)
    }

    fn list_services(&self, filter: &ListFilter) -> Result<Vec<ServiceSummary>, ControlPlaneError> {
        self.record("list_services", filter.needle());
        self.check_fail("list_services")?;
        self.check_swarm()?;

        let state = self.state.read().unwrap();
        let found = state
            .services
            .iter()
            .map(|s| &s.summary)
            .filter(|s| match filter {
                ListFilter::Id(needle) => s.id.starts_with(needle.as_str()),
                ListFilter::Name(needle) => s.name.contains(needle.as_str()),
            })
            .cloned()
            .collect();
        Ok(found)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, ControlPlaneError> {
        self.record("list_tasks", &filter.service);
        self.check_fail("list_tasks")?;
        self.check_swarm()?;

        let state = self.state.read().unwrap();
        Ok(state
            .services
            .iter()
            .find(|s| s.summary.id == filter.service || s.summary.name == filter.service)
            .map(|s| s.tasks.clone())
            .unwrap_or_default())
    }

    fn inspect_service(&self, id: &str) -> Result<ServiceInspect, ControlPlaneError> {
        self.record("inspect_service", id);
        self.check_fail("inspect_service")?;
        self.check_swarm()?;

        let state = self.state.read().unwrap();
        state
            .services
            .iter()
            .find(|s| s.summary.id == id)
            .map(|s| ServiceInspect {
                id: s.summary.id.clone(),
                version: s.version,
                spec: s.spec.clone(),
            })
            .ok_or_else(|| ControlPlaneError::NotFound {
                kind: "service",
                id: id.to_string(),
            })
    }

    fn create_volume(&self, spec: &VolumeCreate) -> Result<String, ControlPlaneError> {
        self.record("create_volume", &spec.name);
        self.check_fail("create_volume")?;

        self.state
            .write()
            .unwrap()
            .volumes
            .insert(spec.name.clone(), spec.labels.clone());
        Ok(spec.name.clone())
    }

    fn create_container(&self, spec: &ContainerCreate) -> Result<String, ControlPlaneError> {
        self.record("create_container", &spec.name);
        self.check_fail("create_container")?;

        let mut state = self.state.write().unwrap();
        for mount in &spec.mounts {
            if !state.volumes.contains_key(&mount.source) {
                return Err(ControlPlaneError::NotFound {
                    kind: "volume",
                    id: mount.source.clone(),
                });
            }
        }
        let id = format!("c{:011}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.created.insert(id.clone(), spec.clone());
        Ok(id)
    }

    fn remove_container(&self, id: &str, _force: bool) -> Result<(), ControlPlaneError> {
        self.record("remove_container", id);
        self.check_fail("remove_container")?;

        let mut state = self.state.write().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        let removed_running = state.containers.len() != before;
        let removed_created = state.created.remove(id).is_some();
        if removed_running || removed_created {
            Ok(())
        } else {
            Err(ControlPlaneError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
        }
    }

    fn remove_volume(&self, name: &str, _force: bool) -> Result<(), ControlPlaneError> {
        self.record("remove_volume", name);
        self.check_fail("remove_volume")?;

        let mut state = self.state.write().unwrap();
        if Self::volume_in_use(&state, name) {
            return Err(ControlPlaneError::Command {
                operation: "remove_volume".to_string(),
                message: format!("remove {name}: volume is in use"),
            });
        }
        match state.volumes.remove(name) {
            Some(_) => Ok(()),
            None => Err(ControlPlaneError::NotFound {
                kind: "volume",
                id: name.to_string(),
            }),
        }
    }

    fn start_container(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.record("start", id);
        self.check_fail("start")?;

        let mut state = self.state.write().unwrap();
        if !Self::container_known(&state, id) {
            return Err(ControlPlaneError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }
        state.stopped.retain(|s| s != id);
        Ok(())
    }

    fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), ControlPlaneError> {
        self.record("stop", id);
        self.check_fail("stop")?;

        let mut state = self.state.write().unwrap();
        if !Self::container_known(&state, id) {
            return Err(ControlPlaneError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }
        if !state.stopped.iter().any(|s| s == id) {
            state.stopped.push(id.to_string());
        }
        Ok(())
    }

    fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        rollout: Rollout,
    ) -> Result<(), ControlPlaneError> {
        self.record("update_service", id);
        self.check_fail("update_service")?;
        self.check_swarm()?;

        let mut state = self.state.write().unwrap();
        let service = state
            .services
            .iter_mut()
            .find(|s| s.summary.id == id)
            .ok_or_else(|| ControlPlaneError::NotFound {
                kind: "service",
                id: id.to_string(),
            })?;
        if service.version != version {
            return Err(ControlPlaneError::Command {
                operation: "update_service".to_string(),
                message: format!(
                    "update out of sequence: expected version {}, got {version}",
                    service.version
                ),
            });
        }
        match rollout {
            Rollout::Detach => {
                let dropped: Vec<String> = volume_sources(&service.spec)
                    .filter(|v| !volume_sources(spec).any(|kept| kept == *v))
                    .map(str::to_string)
                    .collect();
                service.draining.extend(dropped);
            }
            Rollout::Wait => service.draining.clear(),
        }
        service.spec = spec.clone();
        service.version += 1;
        state.rollouts.push((id.to_string(), rollout));
        Ok(())
    }

    fn copy_archive(
        &self,
        container: &str,
        path: &str,
        archive: &[u8],
        options: CopyOptions,
    ) -> Result<(), ControlPlaneError> {
        self.record("copy_archive", container);
        self.check_fail("copy_archive")?;

        let mut state = self.state.write().unwrap();
        if !Self::container_known(&state, container) {
            return Err(ControlPlaneError::NotFound {
                kind: "container",
                id: container.to_string(),
            });
        }
        state.archives.push(DeliveredArchive {
            container: container.to_string(),
            path: path.to_string(),
            archive: archive.to_vec(),
            options,
        });
        Ok(())
    }
}
