use std::sync::Arc;

use tokio::sync::broadcast;

use docksync_core::{ChangeEvent, ControlPlane, SyncConfig};
use docksync_detector::resolve;
use docksync_sync::{Outcome, Pipeline};

use crate::error::{io_err, DaemonError};
use crate::watcher::ChangeDetector;

/// Counters for one run, logged on exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub watch_errors: usize,
}

/// Build a runtime and block the current thread until the run ends.
pub fn start_blocking(
    plane: Arc<dyn ControlPlane>,
    config: SyncConfig,
) -> Result<RunSummary, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(plane, config))
}

/// Run until ctrl-c or SIGTERM.
pub async fn run(
    plane: Arc<dyn ControlPlane>,
    config: SyncConfig,
) -> Result<RunSummary, DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        // Subscribed here so a send before the task is first polled still lands.
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok::<(), DaemonError>(()),
                signal = wait_for_signal() => {
                    // A handler that cannot be installed ends the run too.
                    let _ = shutdown.send(());
                    signal
                }
            }
        })
    };

    let result = run_until(plane, config, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(());
    handle_join("signal_handler", signal_handle.await)?;
    result
}

/// Resolve the target, watch the source tree and deliver changes one at a
/// time until `shutdown` fires. Temporary resources are cleaned up exactly
/// once on the way out, whatever ended the loop.
pub async fn run_until(
    plane: Arc<dyn ControlPlane>,
    config: SyncConfig,
    shutdown: broadcast::Sender<()>,
) -> Result<RunSummary, DaemonError> {
    let mut shutdown_rx = shutdown.subscribe();

    let target = {
        let plane = plane.clone();
        let identifier = config.destination.target.clone();
        let path = config.destination.path.clone();
        tokio::task::spawn_blocking(move || resolve(plane.as_ref(), &identifier, &path))
            .await
            .map_err(|err| join_err("resolver", err))??
    };
    tracing::info!(target = %target, source = %config.source.display(), "sync target ready");

    let pipeline = Arc::new(Pipeline::new(plane, target, &config));
    let mut detector = ChangeDetector::start(&config.source, config.debounce)?;

    let mut summary = RunSummary::default();
    let outcome = drive(&pipeline, &mut detector, &mut shutdown_rx, &mut summary).await;
    detector.close();

    let cleanup = {
        let pipeline = pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.cleanup())
            .await
            .map_err(|err| join_err("cleanup", err))
    };
    let cleanup = match cleanup {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "cleanup failed");
            Err(DaemonError::Cleanup(err))
        }
        Err(err) => Err(err),
    };

    tracing::info!(
        delivered = summary.delivered,
        skipped = summary.skipped,
        failed = summary.failed,
        watch_errors = summary.watch_errors,
        "sync stopped",
    );
    outcome.and(cleanup).map(|()| summary)
}

/// Serialized driver loop. Shutdown is checked before every event.
async fn drive(
    pipeline: &Arc<Pipeline>,
    detector: &mut ChangeDetector,
    shutdown_rx: &mut broadcast::Receiver<()>,
    summary: &mut RunSummary,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
            next = detector.recv() => match next {
                Some(Ok(event)) => deliver(pipeline, event, summary).await?,
                Some(Err(err)) => {
                    summary.watch_errors += 1;
                    tracing::warn!(error = %err, "watch error");
                }
                None => return Ok(()),
            }
        }
    }
}

/// Deliver one event on the blocking pool and wait for it. Per-event errors
/// are logged and counted; only a panicked delivery ends the loop.
async fn deliver(
    pipeline: &Arc<Pipeline>,
    event: ChangeEvent,
    summary: &mut RunSummary,
) -> Result<(), DaemonError> {
    let path = event.path.clone();
    let result = {
        let pipeline = pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.deliver(&event))
            .await
            .map_err(|err| join_err("delivery", err))?
    };

    match result {
        Ok(Outcome::Delivered(_)) => summary.delivered += 1,
        Ok(Outcome::Skipped { .. }) => summary.skipped += 1,
        Err(err) => {
            summary.failed += 1;
            tracing::error!(
                path = %path.display(),
                target = %pipeline.target(),
                error = %err,
                "delivery failed",
            );
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(DaemonError::Signal)?;
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c().await.map_err(DaemonError::Signal)?;
    tracing::info!("received ctrl-c, shutting down");
    Ok(())
}

fn join_err(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Join {
        task,
        message: err.to_string(),
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(join_err(task, err)),
    }
}

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `debug` when `verbose`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
