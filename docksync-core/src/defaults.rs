use std::time::Duration;

/// Tool identifier: prefix of every relay name and key of the relay label.
pub const APP_IDENTIFIER: &str = "docksync";

/// Where the relay container mounts the relay volume.
pub const RELAY_MOUNT_PATH: &str = "/docksync-data";

/// Image of the relay container. It is created but never started, so any
/// small image that exists on the endpoint works.
pub const RELAY_IMAGE: &str = "hello-world";

/// Quiet period a path must stay untouched before its change is emitted.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Grace period given to a container between stop and kill on restart.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);
