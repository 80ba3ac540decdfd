//! # docksync-sync
//!
//! Moves files into a running workload and makes it pick them up.
//!
//! [`archive::copy`] streams a local path into a container as a tar archive.
//! [`Pipeline`] drives one change event through one of four delivery
//! strategies, chosen once from the target kind and the restart flag; the
//! service-restart strategy stages files through a relay volume owned by
//! [`RelayManager`].

pub mod archive;
pub mod delivery;
pub mod error;
pub mod mounts;
pub mod pipeline;
pub mod relay;

pub use delivery::Delivery;
pub use error::{CleanupError, RestartError, SyncError, TransferError};
pub use pipeline::{Outcome, Pipeline};
pub use relay::{Ensured, RelayManager};
