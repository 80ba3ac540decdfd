//! Relay-mount bookkeeping on a service's task template.
//!
//! A service carries at most one relay mount. Attaching always strips every
//! mount recognised as a relay first, then appends the new one.

use docksync_core::naming::is_relay_mount;
use docksync_core::{MountSpec, ServiceSpec};

/// Replace any relay mount in `spec` with `volume` mounted at `target`.
///
/// Returns how many previous relay mounts were stripped.
pub fn attach_relay_mount(spec: &mut ServiceSpec, volume: &str, target: &str) -> usize {
    let stripped = detach_relay_mounts(spec);
    spec.mounts.push(MountSpec::volume(volume, target));
    stripped
}

/// Remove every relay mount from `spec`, keeping the others in order.
pub fn detach_relay_mounts(spec: &mut ServiceSpec) -> usize {
    let before = spec.mounts.len();
    spec.mounts.retain(|mount| !is_relay_mount(mount));
    before - spec.mounts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docksync_core::MountType;

    fn spec(mounts: Vec<MountSpec>) -> ServiceSpec {
        ServiceSpec {
            name: "web".into(),
            force_update: 3,
            mounts,
        }
    }

    fn relay_count(spec: &ServiceSpec) -> usize {
        spec.mounts.iter().filter(|m| is_relay_mount(m)).count()
    }

    #[test]
    fn repeated_attach_keeps_a_single_relay_mount() {
        let mut spec = spec(vec![MountSpec::volume("app-data", "/var/lib/app")]);
        for cycle in 0..5 {
            let volume = format!("docksync-{cycle}");
            attach_relay_mount(&mut spec, &volume, "/app");
            assert_eq!(relay_count(&spec), 1, "cycle {cycle}");
        }
        assert_eq!(spec.mounts.len(), 2);
        assert_eq!(spec.mounts[0].source, "app-data");
        assert_eq!(spec.mounts[1], MountSpec::volume("docksync-4", "/app"));
    }

    #[test]
    fn attach_reports_stripped_mounts() {
        let mut spec = spec(vec![
            MountSpec::volume("docksync-old-1", "/app"),
            MountSpec::volume("docksync-old-2", "/other"),
        ]);
        assert_eq!(attach_relay_mount(&mut spec, "docksync-new", "/app"), 2);
        assert_eq!(relay_count(&spec), 1);
    }

    #[test]
    fn detach_keeps_foreign_mounts() {
        let mut spec = spec(vec![
            MountSpec {
                mount_type: MountType::Bind,
                source: "/etc/app".into(),
                target: "/etc/app".into(),
            },
            MountSpec::volume("docksync-1", "/app"),
        ]);
        assert_eq!(detach_relay_mounts(&mut spec), 1);
        assert_eq!(spec.mounts.len(), 1);
        assert_eq!(spec.mounts[0].mount_type, MountType::Bind);
        assert_eq!(spec.force_update, 3, "force counter is not touched here");
    }
}
