//! Target resolution for `docksync-detector`.
//!
//! `resolve(plane, identifier, destination)` turns a user-supplied name or id
//! into a [`SyncTarget`]. Services win over containers: when both a service
//! and a container answer to the same identifier, the target is the service.
//! Each lookup tries the identifier as an id first and as a name second.
//!
//! The container backing a service is never cached. Tasks get rescheduled, so
//! [`container_for_service`] asks the control plane again on every call.

use docksync_core::{
    ContainerSummary, ControlPlane, ControlPlaneError, ListFilter, ServiceSummary, SyncTarget,
    TargetId, TargetKind, TaskFilter,
};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from target resolution.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no container or service matches '{identifier}'")]
    NotFound { identifier: String },

    #[error("service {service} has no running task backed by a container")]
    NoRunningTask { service: String },

    #[error("container {id} is no longer running")]
    ContainerGone { id: String },

    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Resolve `identifier` to a service or, failing that, a running container.
pub fn resolve(
    plane: &dyn ControlPlane,
    identifier: &str,
    destination: &str,
) -> Result<SyncTarget, ResolutionError> {
    let (id, kind) = if let Some(id) = find_service(plane, identifier)? {
        (id, TargetKind::Service)
    } else if let Some(id) = find_container(plane, identifier)? {
        (id, TargetKind::Container)
    } else {
        return Err(ResolutionError::NotFound {
            identifier: identifier.to_string(),
        });
    };

    tracing::info!(identifier, id = %id, kind = %kind, "resolved sync target");
    Ok(SyncTarget {
        id,
        kind,
        identifier: identifier.to_string(),
        destination: destination.to_string(),
    })
}

/// Find a running container by id (or id prefix), then by name.
pub fn find_container(
    plane: &dyn ControlPlane,
    needle: &str,
) -> Result<Option<TargetId>, ResolutionError> {
    let by_id = plane.list_containers(&ListFilter::Id(needle.to_string()))?;
    if let Some(found) = by_id.first() {
        return Ok(Some(TargetId::from(found.id.as_str())));
    }

    let by_name = plane.list_containers(&ListFilter::Name(needle.to_string()))?;
    Ok(pick_container(&by_name, needle).map(|c| TargetId::from(c.id.as_str())))
}

/// Find a service by id (or id prefix), then by name.
///
/// An endpoint that is not an orchestrator manager has no services; that is
/// reported as "not found" so plain containers still resolve.
pub fn find_service(
    plane: &dyn ControlPlane,
    needle: &str,
) -> Result<Option<TargetId>, ResolutionError> {
    let by_id = match plane.list_services(&ListFilter::Id(needle.to_string())) {
        Ok(found) => found,
        Err(ControlPlaneError::SwarmUnavailable) => {
            tracing::debug!("endpoint has no services; resolving containers only");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    if let Some(found) = by_id.first() {
        return Ok(Some(TargetId::from(found.id.as_str())));
    }

    let by_name = plane.list_services(&ListFilter::Name(needle.to_string()))?;
    Ok(pick_service(&by_name, needle).map(|s| TargetId::from(s.id.as_str())))
}

/// The container currently backing one of the service's running tasks.
///
/// Which task is picked when several run is deliberately unspecified: it is
/// the first one the control plane lists that already has a container.
pub fn container_for_service(
    plane: &dyn ControlPlane,
    service: &TargetId,
) -> Result<String, ResolutionError> {
    let tasks = plane.list_tasks(&TaskFilter::running(service.as_str()))?;
    tasks
        .into_iter()
        .find_map(|task| task.container_id.filter(|id| !id.is_empty()))
        .ok_or_else(|| ResolutionError::NoRunningTask {
            service: service.to_string(),
        })
}

/// Re-check that a container target is still running before writing to it.
pub fn live_container(plane: &dyn ControlPlane, id: &TargetId) -> Result<String, ResolutionError> {
    find_container(plane, id.as_str())?
        .map(|found| found.0)
        .ok_or_else(|| ResolutionError::ContainerGone { id: id.to_string() })
}

// ---------------------------------------------------------------------------
// Name matching
// ---------------------------------------------------------------------------

// Name filters match partially, so `web` also lists `web-admin`. An exact
// name wins; otherwise the first listed entry is taken.

fn pick_container<'a>(found: &'a [ContainerSummary], needle: &str) -> Option<&'a ContainerSummary> {
    found
        .iter()
        .find(|c| {
            c.names
                .iter()
                .any(|name| name.trim_start_matches('/') == needle)
        })
        .or_else(|| found.first())
}

fn pick_service<'a>(found: &'a [ServiceSummary], needle: &str) -> Option<&'a ServiceSummary> {
    found
        .iter()
        .find(|s| s.name == needle)
        .or_else(|| found.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, name: &str) -> ContainerSummary {
        ContainerSummary {
            id: id.into(),
            names: vec![format!("/{name}")],
        }
    }

    #[test]
    fn exact_container_name_beats_list_order() {
        let found = vec![container("1", "web-admin"), container("2", "web")];
        assert_eq!(pick_container(&found, "web").map(|c| c.id.as_str()), Some("2"));
    }

    #[test]
    fn partial_container_name_falls_back_to_first() {
        let found = vec![container("1", "web-admin"), container("2", "web-api")];
        assert_eq!(pick_container(&found, "web").map(|c| c.id.as_str()), Some("1"));
    }

    #[test]
    fn exact_service_name_wins() {
        let found = vec![
            ServiceSummary { id: "a".into(), name: "api-worker".into() },
            ServiceSummary { id: "b".into(), name: "api".into() },
        ];
        assert_eq!(pick_service(&found, "api").map(|s| s.id.as_str()), Some("b"));
        assert!(pick_service(&[], "api").is_none());
    }
}
