//! Per-event entrypoint used by the daemon's driver loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docksync_core::{ChangeEvent, ChangeOp, ControlPlane, SyncConfig, SyncTarget};

use crate::delivery::{Delivered, Delivery, Route};
use crate::error::{CleanupError, SyncError};

/// What happened to one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(Delivered),
    /// Nothing was sent. Removals are not propagated: sync only ever adds or
    /// overwrites.
    Skipped { reason: &'static str },
}

/// The resolved target, its delivery strategy, and the local tree it mirrors.
#[derive(Debug)]
pub struct Pipeline {
    plane: Arc<dyn ControlPlane>,
    target: SyncTarget,
    source_root: PathBuf,
    delivery: Delivery,
    cleanup_started: AtomicBool,
}

impl Pipeline {
    pub fn new(plane: Arc<dyn ControlPlane>, target: SyncTarget, config: &SyncConfig) -> Self {
        let delivery = Delivery::select(target.kind, plane.clone(), config);
        tracing::debug!(strategy = delivery.name(), target = %target, "delivery strategy selected");
        Self {
            plane,
            target,
            source_root: config.source.clone(),
            delivery,
            cleanup_started: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Push one change to the target and restart it if configured to.
    pub fn deliver(&self, event: &ChangeEvent) -> Result<Outcome, SyncError> {
        if event.op == ChangeOp::Remove {
            tracing::info!(path = %event.path.display(), "removal not propagated");
            return Ok(Outcome::Skipped {
                reason: "removals are not propagated",
            });
        }

        let delivered = self.delivery.deliver(self.route(), &event.path)?;
        tracing::info!(
            path = %event.path.display(),
            op = %event.op,
            container = %delivered.container,
            entries = delivered.entries,
            restarted = delivered.restarted,
            "synced",
        );
        Ok(Outcome::Delivered(delivered))
    }

    /// Tear down whatever this run created. Runs at most once.
    pub fn cleanup(&self) -> Result<(), CleanupError> {
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.delivery.cleanup(self.route())
    }

    fn route(&self) -> Route<'_> {
        Route {
            plane: self.plane.as_ref(),
            target: &self.target,
            source_root: &self.source_root,
        }
    }
}
