//! End-to-end delivery scenarios through [`Pipeline`] and a mock control plane.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use docksync_core::mock::MockControlPlane;
use docksync_core::naming::is_relay_mount;
use docksync_core::{
    ChangeEvent, ChangeOp, ControlPlane, MountSpec, Rollout, SyncConfig, SyncTarget, TargetId,
    TargetKind,
};
use docksync_sync::{Outcome, Pipeline, SyncError};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

struct Fixture {
    plane: Arc<MockControlPlane>,
    src: TempDir,
    pipeline: Pipeline,
}

fn fixture(kind: TargetKind, id: &str, destination: &str, restart: bool) -> Fixture {
    let plane = Arc::new(MockControlPlane::new());
    let src = TempDir::new().expect("tempdir");
    let config = SyncConfig::new(
        src.path(),
        format!("x:{destination}").parse().expect("destination"),
        restart,
    );
    let target = SyncTarget {
        id: TargetId::from(id),
        kind,
        identifier: id.to_string(),
        destination: destination.to_string(),
    };
    let shared: Arc<dyn ControlPlane> = plane.clone();
    let pipeline = Pipeline::new(shared, target, &config);
    Fixture {
        plane,
        src,
        pipeline,
    }
}

fn write(root: &Path, rel: &str, content: &str) -> std::path::PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, content).expect("write");
    path
}

fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .expect("entries")
        .map(|e| {
            let e = e.expect("entry");
            format!("/{}", e.path().expect("path").display())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[test]
fn container_without_restart_gets_exactly_one_delivery() {
    let fx = fixture(TargetKind::Container, "mycontainer", "/data", false);
    fx.plane.add_container("mycontainer", "mycontainer");
    let file = write(fx.src.path(), "x.txt", "v1");

    let outcome = fx
        .pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    assert!(matches!(outcome, Outcome::Delivered(ref d) if !d.restarted));
    let archives = fx.plane.archives();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].container, "mycontainer");
    assert_eq!(entry_names(&archives[0].archive), vec!["/data/x.txt"]);
    assert!(fx.plane.calls_of("stop").is_empty());
    assert!(fx.plane.calls_of("start").is_empty());
    assert!(fx.plane.calls_of("update_service").is_empty());
}

#[test]
fn nested_file_keeps_its_relative_directory() {
    let fx = fixture(TargetKind::Container, "c1", "/app", false);
    fx.plane.add_container("c1", "api");
    let file = write(fx.src.path(), "sub/b.txt", "B");

    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Create))
        .expect("deliver");

    let archives = fx.plane.archives();
    assert_eq!(entry_names(&archives[0].archive), vec!["/app/sub/b.txt"]);
}

#[test]
fn container_restart_stops_then_starts_after_copy() {
    let fx = fixture(TargetKind::Container, "c1", "/app", true);
    fx.plane.add_container("c1", "api");
    let file = write(fx.src.path(), "main.py", "print(1)");

    let outcome = fx
        .pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");
    assert!(matches!(outcome, Outcome::Delivered(ref d) if d.restarted));

    let calls = fx.plane.calls();
    let copy = calls.iter().position(|c| c == "copy_archive:c1").expect("copy");
    let stop = calls.iter().position(|c| c == "stop:c1").expect("stop");
    let start = calls.iter().position(|c| c == "start:c1").expect("start");
    assert!(copy < stop && stop < start, "order was {calls:?}");
}

#[test]
fn failed_copy_never_restarts() {
    let fx = fixture(TargetKind::Container, "c1", "/app", true);
    fx.plane.add_container("c1", "api");
    fx.plane.set_fail_on("copy_archive");
    let file = write(fx.src.path(), "main.py", "print(1)");

    let err = fx
        .pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect_err("must fail");
    assert!(matches!(err, SyncError::Transfer(_)));
    assert!(fx.plane.calls_of("stop").is_empty());
    assert!(fx.plane.calls_of("start").is_empty());
}

#[test]
fn vanished_file_is_a_transfer_error() {
    let fx = fixture(TargetKind::Container, "c1", "/app", false);
    fx.plane.add_container("c1", "api");

    let err = fx
        .pipeline
        .deliver(&ChangeEvent::new(fx.src.path().join("gone.txt"), ChangeOp::Write))
        .expect_err("must fail");
    assert!(matches!(err, SyncError::Transfer(_)));
    assert!(fx.plane.archives().is_empty());
}

#[test]
fn removal_is_skipped() {
    let fx = fixture(TargetKind::Container, "c1", "/app", true);
    fx.plane.add_container("c1", "api");

    let outcome = fx
        .pipeline
        .deliver(&ChangeEvent::new(fx.src.path().join("old.txt"), ChangeOp::Remove))
        .expect("skip");
    assert!(matches!(outcome, Outcome::Skipped { .. }));
    assert!(fx.plane.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[test]
fn service_without_restart_copies_into_backing_container() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", false);
    fx.plane.add_service("svc1", "web", vec![]);
    fx.plane.add_task("svc1", "task1", "ctr1");
    let file = write(fx.src.path(), "index.html", "<h1>");

    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    let archives = fx.plane.archives();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].container, "ctr1");
    assert_eq!(entry_names(&archives[0].archive), vec!["/app/index.html"]);
    assert!(fx.plane.calls_of("update_service").is_empty());
    assert!(fx.plane.volumes().is_empty(), "no relay without restart");
}

#[test]
fn service_restart_stages_through_one_relay_and_forces_update() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane
        .add_service("svc1", "web", vec![MountSpec::volume("web-data", "/var/data")]);
    let file = write(fx.src.path(), "index.html", "<h1>");
    let before = fx.plane.service_spec("svc1").expect("spec").force_update;

    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    let volumes = fx.plane.volumes();
    assert_eq!(volumes.len(), 1, "exactly one relay volume");
    let relays = fx.plane.created_containers();
    assert_eq!(relays.len(), 1, "exactly one relay container");
    let relay_id = &relays[0].0;

    let archives = fx.plane.archives();
    assert_eq!(archives.len(), 1);
    assert_eq!(&archives[0].container, relay_id, "copy lands in the relay");
    assert!(entry_names(&archives[0].archive).contains(&"/docksync-data/index.html".to_string()));

    let spec = fx.plane.service_spec("svc1").expect("spec");
    assert_eq!(spec.force_update, before + 1);
    assert_eq!(
        spec.mounts,
        vec![
            MountSpec::volume("web-data", "/var/data"),
            MountSpec::volume(&volumes[0], "/app"),
        ]
    );
}

#[test]
fn successive_cycles_keep_a_single_relay_mount() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let file = write(fx.src.path(), "a.txt", "0");

    for round in 1..=4u64 {
        fs::write(&file, round.to_string()).expect("rewrite");
        fx.pipeline
            .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
            .expect("deliver");

        let spec = fx.plane.service_spec("svc1").expect("spec");
        assert_eq!(spec.mounts.iter().filter(|m| is_relay_mount(m)).count(), 1);
        assert_eq!(spec.force_update, round);
    }
    assert_eq!(fx.plane.calls_of("create_volume").len(), 1);

    let archives = fx.plane.archives();
    assert_eq!(entry_names(&archives[3].archive), vec!["/docksync-data/a.txt"]);
}

#[test]
fn failed_update_keeps_relay_for_retry() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let file = write(fx.src.path(), "a.txt", "0");

    fx.plane.set_fail_on("update_service");
    let err = fx
        .pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect_err("update fails");
    assert!(matches!(err, SyncError::Restart(_)));
    assert_eq!(fx.plane.volumes().len(), 1);

    fx.plane.clear_fail_on();
    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("retry succeeds");
    assert_eq!(fx.plane.calls_of("create_volume").len(), 1);
    assert_eq!(fx.plane.service_spec("svc1").expect("spec").force_update, 1);
}

#[test]
fn failed_seed_is_retried_with_the_whole_tree() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let a = write(fx.src.path(), "a.txt", "A");
    write(fx.src.path(), "b.txt", "B");

    fx.plane.set_fail_on("copy_archive");
    let err = fx
        .pipeline
        .deliver(&ChangeEvent::new(&a, ChangeOp::Write))
        .expect_err("seed copy fails");
    assert!(matches!(err, SyncError::Transfer(_)));
    assert!(fx.plane.calls_of("update_service").is_empty());

    fx.plane.clear_fail_on();
    fx.pipeline
        .deliver(&ChangeEvent::new(&a, ChangeOp::Write))
        .expect("retry");

    let archives = fx.plane.archives();
    assert_eq!(archives.len(), 1);
    let names = entry_names(&archives[0].archive);
    assert!(names.contains(&"/docksync-data/a.txt".to_string()));
    assert!(names.contains(&"/docksync-data/b.txt".to_string()));
    assert_eq!(fx.plane.calls_of("create_volume").len(), 1);

    // Seeded now: later events only carry the changed file.
    fx.pipeline
        .deliver(&ChangeEvent::new(&a, ChangeOp::Write))
        .expect("deliver");
    assert_eq!(
        entry_names(&fx.plane.archives()[1].archive),
        vec!["/docksync-data/a.txt"]
    );
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[test]
fn cleanup_detaches_relay_then_removes_it_once() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let file = write(fx.src.path(), "a.txt", "0");
    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    fx.pipeline.cleanup().expect("cleanup");
    fx.pipeline.cleanup().expect("second cleanup is a no-op");

    let spec = fx.plane.service_spec("svc1").expect("spec");
    assert!(spec.mounts.is_empty(), "relay mount detached");
    assert_eq!(spec.force_update, 2);
    assert!(fx.plane.volumes().is_empty());
    assert!(fx.plane.created_containers().is_empty());
    assert_eq!(fx.plane.calls_of("remove_volume").len(), 1);
    assert_eq!(fx.plane.calls_of("remove_container").len(), 1);
}

#[test]
fn cleanup_without_relay_touches_nothing() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);

    fx.pipeline.cleanup().expect("cleanup");
    assert!(fx.plane.calls().is_empty());
}

#[test]
fn cleanup_waits_for_detach_rollout_before_removing_volume() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let file = write(fx.src.path(), "a.txt", "0");
    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    fx.pipeline.cleanup().expect("cleanup");

    assert_eq!(
        fx.plane.rollouts(),
        vec![
            ("svc1".to_string(), Rollout::Detach),
            ("svc1".to_string(), Rollout::Wait),
        ]
    );
    assert!(fx.plane.volumes().is_empty(), "volume freed once old tasks are gone");
}

#[test]
fn failed_detach_leaves_volume_in_use() {
    let fx = fixture(TargetKind::Service, "svc1", "/app", true);
    fx.plane.add_service("svc1", "web", vec![]);
    let file = write(fx.src.path(), "a.txt", "0");
    fx.pipeline
        .deliver(&ChangeEvent::new(&file, ChangeOp::Write))
        .expect("deliver");

    fx.plane.set_fail_on("update_service");
    fx.pipeline.cleanup().expect_err("detach fails");

    assert_eq!(fx.plane.volumes().len(), 1, "mounted volume cannot be removed");
    assert!(fx.plane.created_containers().is_empty(), "relay container still removed");
}
