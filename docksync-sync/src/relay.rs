//! Ephemeral relay container + volume used to stage files for a service.
//!
//! The pair is created on the first [`RelayManager::ensure`] and reused for
//! the rest of the run. [`RelayManager::cleanup`] tears it down once; later
//! calls, and any `ensure` after it, do nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use docksync_core::defaults::RELAY_MOUNT_PATH;
use docksync_core::naming::{relay_labels, temporary_name};
use docksync_core::{
    ContainerCreate, ControlPlane, ControlPlaneError, MountSpec, TemporaryResource, VolumeCreate,
};

use crate::error::{CleanupError, TransferError};

/// Result of [`RelayManager::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub resource: TemporaryResource,
    /// True when this call provisioned the pair.
    pub created: bool,
}

#[derive(Debug)]
pub struct RelayManager {
    plane: Arc<dyn ControlPlane>,
    image: String,
    resource: Mutex<Option<TemporaryResource>>,
    closed: AtomicBool,
}

impl RelayManager {
    pub fn new(plane: Arc<dyn ControlPlane>, image: impl Into<String>) -> Self {
        Self {
            plane,
            image: image.into(),
            resource: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The tracked pair, if one was provisioned and not yet torn down.
    pub fn current(&self) -> Option<TemporaryResource> {
        self.lock().clone()
    }

    /// Return the relay pair, provisioning it on first use.
    pub fn ensure(&self) -> Result<Ensured, TransferError> {
        let mut slot = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::RelayClosed);
        }
        if let Some(resource) = slot.as_ref() {
            return Ok(Ensured {
                resource: resource.clone(),
                created: false,
            });
        }

        let resource = self.provision()?;
        *slot = Some(resource.clone());
        Ok(Ensured {
            resource,
            created: true,
        })
    }

    /// Remove the relay container and volume. Runs at most once.
    ///
    /// Objects that are already gone count as removed. Both removals are
    /// attempted even if the first fails; the first failure is returned.
    pub fn cleanup(&self) -> Result<(), CleanupError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("relay cleanup already ran");
            return Ok(());
        }
        let Some(resource) = self.lock().take() else {
            return Ok(());
        };

        tracing::info!(container = %resource.container_id, "removing relay container");
        let container = tolerate_missing(self.plane.remove_container(&resource.container_id, true))
            .map_err(|source| CleanupError::RemoveContainer {
                id: resource.container_id.clone(),
                source,
            });
        if let Err(err) = &container {
            tracing::error!(error = %err, "relay container left behind");
        }

        tracing::info!(volume = %resource.volume_name, "removing relay volume");
        let volume = tolerate_missing(self.plane.remove_volume(&resource.volume_name, true))
            .map_err(|source| CleanupError::RemoveVolume {
                name: resource.volume_name.clone(),
                source,
            });
        if let Err(err) = &volume {
            tracing::error!(error = %err, "relay volume left behind");
        }

        container.and(volume)
    }

    fn provision(&self) -> Result<TemporaryResource, TransferError> {
        let volume_name = self
            .plane
            .create_volume(&VolumeCreate {
                name: temporary_name(),
                labels: relay_labels(),
            })
            .map_err(|source| TransferError::Relay {
                resource: "volume",
                source,
            })?;
        tracing::info!(volume = %volume_name, "created relay volume");

        let created = self.plane.create_container(&ContainerCreate {
            name: temporary_name(),
            image: self.image.clone(),
            mounts: vec![MountSpec::volume(&volume_name, RELAY_MOUNT_PATH)],
            labels: relay_labels(),
            auto_remove: true,
        });
        let container_id = match created {
            Ok(id) => id,
            Err(source) => {
                if let Err(err) = self.plane.remove_volume(&volume_name, true) {
                    tracing::warn!(volume = %volume_name, error = %err, "orphaned relay volume");
                }
                return Err(TransferError::Relay {
                    resource: "container",
                    source,
                });
            }
        };
        tracing::info!(container = %container_id, image = %self.image, "created relay container");

        Ok(TemporaryResource {
            container_id,
            volume_name,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<TemporaryResource>> {
        self.resource.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn tolerate_missing(result: Result<(), ControlPlaneError>) -> Result<(), ControlPlaneError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docksync_core::mock::MockControlPlane;

    fn manager() -> (Arc<MockControlPlane>, RelayManager) {
        let plane = Arc::new(MockControlPlane::new());
        let relay = RelayManager::new(plane.clone(), "hello-world");
        (plane, relay)
    }

    #[test]
    fn ensure_is_idempotent() {
        let (plane, relay) = manager();
        let first = relay.ensure().expect("first");
        let second = relay.ensure().expect("second");

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.resource, second.resource);
        assert_eq!(plane.calls_of("create_volume").len(), 1);
        assert_eq!(plane.calls_of("create_container").len(), 1);
    }

    #[test]
    fn relay_container_mounts_volume_with_auto_remove() {
        let (plane, relay) = manager();
        let ensured = relay.ensure().expect("ensure");

        let (id, spec) = plane.created_containers().pop().expect("container");
        assert_eq!(id, ensured.resource.container_id);
        assert_eq!(spec.image, "hello-world");
        assert!(spec.auto_remove);
        assert_eq!(
            spec.mounts,
            vec![MountSpec::volume(&ensured.resource.volume_name, "/docksync-data")]
        );
        let labels = plane
            .volume_labels(&ensured.resource.volume_name)
            .expect("volume");
        assert_eq!(labels.get("docksync").map(String::as_str), Some("true"));
    }

    #[test]
    fn failed_container_creation_removes_volume() {
        let (plane, relay) = manager();
        plane.set_fail_on("create_container");

        let err = relay.ensure().expect_err("must fail");
        assert!(matches!(err, TransferError::Relay { resource: "container", .. }));
        assert!(plane.volumes().is_empty());
        assert!(relay.current().is_none());
    }

    #[test]
    fn cleanup_runs_once_and_blocks_new_provisioning() {
        let (plane, relay) = manager();
        relay.ensure().expect("ensure");

        relay.cleanup().expect("cleanup");
        relay.cleanup().expect("second cleanup is a no-op");

        assert_eq!(plane.calls_of("remove_container").len(), 1);
        assert_eq!(plane.calls_of("remove_volume").len(), 1);
        assert!(plane.volumes().is_empty());
        assert!(plane.created_containers().is_empty());
        assert!(matches!(relay.ensure(), Err(TransferError::RelayClosed)));
    }

    #[test]
    fn cleanup_tolerates_already_removed_container() {
        let (plane, relay) = manager();
        let ensured = relay.ensure().expect("ensure");
        plane
            .remove_container(&ensured.resource.container_id, true)
            .expect("external removal");

        relay.cleanup().expect("missing container is fine");
        assert!(plane.volumes().is_empty());
    }

    #[test]
    fn cleanup_still_removes_volume_when_container_removal_fails() {
        let (plane, relay) = manager();
        relay.ensure().expect("ensure");
        plane.set_fail_on("remove_container");

        let err = relay.cleanup().expect_err("container removal fails");
        assert!(matches!(err, CleanupError::RemoveContainer { .. }));
        assert!(plane.volumes().is_empty(), "volume removal still attempted");
    }

    #[test]
    fn cleanup_without_relay_does_nothing() {
        let (plane, relay) = manager();
        relay.cleanup().expect("nothing to do");
        assert!(plane.calls().is_empty());
    }
}
