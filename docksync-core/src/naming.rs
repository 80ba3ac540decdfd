//! Names and labels of the ephemeral relay resources.
//!
//! Service specs returned by inspection carry no volume labels, so a relay
//! mount is recognised by the name prefix alone.

use std::collections::BTreeMap;

use crate::defaults::APP_IDENTIFIER;
use crate::types::MountSpec;

/// A fresh `docksync-<uuid>` name.
pub fn temporary_name() -> String {
    format!("{APP_IDENTIFIER}-{}", uuid::Uuid::new_v4())
}

/// Label set attached to every relay volume and container.
pub fn relay_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_IDENTIFIER.to_string(), "true".to_string())])
}

pub fn is_relay_source(source: &str) -> bool {
    source
        .strip_prefix(APP_IDENTIFIER)
        .is_some_and(|rest| rest.starts_with('-'))
}

pub fn is_relay_mount(mount: &MountSpec) -> bool {
    is_relay_source(&mount.source)
}
