//! Watch loop: change detection, serialized delivery, cleanup on exit.

mod error;
mod runtime;
pub mod watcher;

pub use error::DaemonError;
pub use runtime::{init_tracing, run, run_until, start_blocking, RunSummary};
pub use watcher::ChangeDetector;
