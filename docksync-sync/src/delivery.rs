//! The four ways a change reaches a workload.
//!
//! | target    | restart | strategy            |
//! |-----------|---------|---------------------|
//! | container | no      | [`ContainerDirect`] |
//! | container | yes     | [`ContainerRestart`]|
//! | service   | no      | [`ServiceDirect`]   |
//! | service   | yes     | [`ServiceRelay`]    |
//!
//! The strategy is picked once per run. A failed copy never reaches the
//! restart step.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docksync_core::defaults::RELAY_MOUNT_PATH;
use docksync_core::{ControlPlane, Rollout, SyncConfig, SyncTarget, TargetKind};
use docksync_detector::{container_for_service, live_container};

use crate::archive;
use crate::error::{CleanupError, RestartError, SyncError};
use crate::mounts::{attach_relay_mount, detach_relay_mounts};
use crate::relay::RelayManager;

/// What one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Container the archive was extracted into.
    pub container: String,
    pub entries: usize,
    pub restarted: bool,
}

/// Where a change comes from and where it goes, shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub plane: &'a dyn ControlPlane,
    pub target: &'a SyncTarget,
    pub source_root: &'a Path,
}

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Delivery {
    ContainerDirect(ContainerDirect),
    ContainerRestart(ContainerRestart),
    ServiceDirect(ServiceDirect),
    ServiceRelay(ServiceRelay),
}

impl Delivery {
    pub fn select(kind: TargetKind, plane: Arc<dyn ControlPlane>, config: &SyncConfig) -> Self {
        match (kind, config.restart) {
            (TargetKind::Container, false) => Delivery::ContainerDirect(ContainerDirect),
            (TargetKind::Container, true) => Delivery::ContainerRestart(ContainerRestart {
                stop_timeout: config.stop_timeout,
            }),
            (TargetKind::Service, false) => Delivery::ServiceDirect(ServiceDirect),
            (TargetKind::Service, true) => Delivery::ServiceRelay(ServiceRelay {
                relay: RelayManager::new(plane, config.relay_image.clone()),
                seeded: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Delivery::ContainerDirect(_) => "container-direct",
            Delivery::ContainerRestart(_) => "container-restart",
            Delivery::ServiceDirect(_) => "service-direct",
            Delivery::ServiceRelay(_) => "service-relay",
        }
    }

    /// Deliver `local`, which lives under `route.source_root`.
    pub fn deliver(&self, route: Route<'_>, local: &Path) -> Result<Delivered, SyncError> {
        match self {
            Delivery::ContainerDirect(s) => s.deliver(route, local),
            Delivery::ContainerRestart(s) => s.deliver(route, local),
            Delivery::ServiceDirect(s) => s.deliver(route, local),
            Delivery::ServiceRelay(s) => s.deliver(route, local),
        }
    }

    /// Release whatever the strategy created. Only the relay owns anything.
    pub fn cleanup(&self, route: Route<'_>) -> Result<(), CleanupError> {
        match self {
            Delivery::ServiceRelay(s) => s.cleanup(route),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Copy straight into the target container.
#[derive(Debug)]
pub struct ContainerDirect;

impl ContainerDirect {
    fn deliver(&self, route: Route<'_>, local: &Path) -> Result<Delivered, SyncError> {
        let container = live_container(route.plane, &route.target.id)?;
        let payload = copy_to(route, local, &route.target.destination, &container)?;
        Ok(Delivered {
            container,
            entries: payload.entries.len(),
            restarted: false,
        })
    }
}

/// Copy into the target container, then stop and start it.
#[derive(Debug)]
pub struct ContainerRestart {
    pub stop_timeout: Duration,
}

impl ContainerRestart {
    fn deliver(&self, route: Route<'_>, local: &Path) -> Result<Delivered, SyncError> {
        let container = live_container(route.plane, &route.target.id)?;
        let payload = copy_to(route, local, &route.target.destination, &container)?;

        tracing::info!(container = %container, "restarting container");
        route
            .plane
            .stop_container(&container, self.stop_timeout)
            .map_err(|source| RestartError::Stop {
                id: container.clone(),
                source,
            })?;
        route
            .plane
            .start_container(&container)
            .map_err(|source| RestartError::Start {
                id: container.clone(),
                source,
            })?;

        Ok(Delivered {
            container,
            entries: payload.entries.len(),
            restarted: true,
        })
    }
}

/// Copy into whichever container currently backs the service.
///
/// The change lives only as long as that task: the next reschedule drops it.
#[derive(Debug)]
pub struct ServiceDirect;

impl ServiceDirect {
    fn deliver(&self, route: Route<'_>, local: &Path) -> Result<Delivered, SyncError> {
        let container = container_for_service(route.plane, &route.target.id)?;
        let payload = copy_to(route, local, &route.target.destination, &container)?;
        Ok(Delivered {
            container,
            entries: payload.entries.len(),
            restarted: false,
        })
    }
}

/// Stage into the relay volume, then roll the service with that volume
/// mounted at the destination.
#[derive(Debug)]
pub struct ServiceRelay {
    relay: RelayManager,
    /// Set once the whole source tree has landed in the relay volume.
    seeded: AtomicBool,
}

impl ServiceRelay {
    pub fn relay(&self) -> &RelayManager {
        &self.relay
    }

    fn deliver(&self, route: Route<'_>, local: &Path) -> Result<Delivered, SyncError> {
        let ensured = self.relay.ensure()?;
        let container = ensured.resource.container_id.clone();

        // An unseeded volume would hide the rest of the tree once mounted at
        // the destination. Send the whole tree until one seed has landed.
        let payload = if self.seeded.load(Ordering::SeqCst) {
            copy_to(route, local, RELAY_MOUNT_PATH, &container)?
        } else {
            tracing::info!(container = %container, fresh = ensured.created, "seeding relay volume");
            let payload =
                archive::copy(route.plane, route.source_root, RELAY_MOUNT_PATH, &container)?;
            self.seeded.store(true, Ordering::SeqCst);
            payload
        };

        let service = route.target.id.as_str();
        let inspected = route
            .plane
            .inspect_service(service)
            .map_err(|source| RestartError::Inspect {
                service: service.to_string(),
                source,
            })?;
        let mut spec = inspected.spec;
        let stripped = attach_relay_mount(
            &mut spec,
            &ensured.resource.volume_name,
            &route.target.destination,
        );
        spec.force_update += 1;

        tracing::info!(
            service,
            volume = %ensured.resource.volume_name,
            replaced = stripped,
            force_update = spec.force_update,
            "rolling service with relay volume",
        );
        route
            .plane
            .update_service(service, inspected.version, &spec, Rollout::Detach)
            .map_err(|source| RestartError::Update {
                service: service.to_string(),
                source,
            })?;

        Ok(Delivered {
            container,
            entries: payload.entries.len(),
            restarted: true,
        })
    }

    /// Roll the service back to its own content, then drop the relay pair.
    fn cleanup(&self, route: Route<'_>) -> Result<(), CleanupError> {
        let detached = if self.relay.current().is_some() {
            detach(route)
        } else {
            Ok(())
        };
        if let Err(err) = &detached {
            tracing::error!(error = %err, "service still references the relay volume");
        }
        let removed = self.relay.cleanup();
        detached.and(removed)
    }
}

fn detach(route: Route<'_>) -> Result<(), CleanupError> {
    let service = route.target.id.as_str();
    let detach_err = |source| CleanupError::Detach {
        service: service.to_string(),
        source,
    };

    let inspected = route.plane.inspect_service(service).map_err(detach_err)?;
    let mut spec = inspected.spec;
    if detach_relay_mounts(&mut spec) == 0 {
        return Ok(());
    }
    spec.force_update += 1;
    // Old tasks keep the volume busy until they are replaced, so the volume
    // can only be removed once the rollout has converged.
    tracing::info!(service, "rolling service without relay volume");
    route
        .plane
        .update_service(service, inspected.version, &spec, Rollout::Wait)
        .map_err(detach_err)
}

/// Copy `local` to its place below `destination` inside `container`.
fn copy_to(
    route: Route<'_>,
    local: &Path,
    destination: &str,
    container: &str,
) -> Result<archive::Payload, SyncError> {
    let is_dir = std::fs::symlink_metadata(local)
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    let remote = archive::remote_dir(route.source_root, destination, local, is_dir);
    Ok(archive::copy(route.plane, local, &remote, container)?)
}
