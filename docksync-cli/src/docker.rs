//! [`ControlPlane`] over the `docker` command-line client.
//!
//! Every operation is one `docker` invocation. Listings ask for
//! `{{json .}}` and are decoded line by line. Failures are classified from
//! stderr: "no such ..." is [`ControlPlaneError::NotFound`], "not a swarm
//! manager" is [`ControlPlaneError::SwarmUnavailable`].
//!
//! Archive uploads are the exception: they go over the Engine API (see
//! [`crate::engine`]) whenever the endpoint is one it can dial.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use docksync_core::{
    ContainerCreate, ContainerSummary, ControlPlane, ControlPlaneError, CopyOptions, ListFilter,
    MountSpec, MountType, Rollout, ServiceInspect, ServiceSpec, ServiceSummary, TaskFilter,
    TaskSummary, VolumeCreate,
};

const JSON_FORMAT: &str = "{{json .}}";
use crate::engine::EngineApi;

const TASK_CONTAINER_FORMAT: &str = "{{with .Status.ContainerStatus}}{{.ContainerID}}{{end}}";

#[derive(Debug)]
pub struct DockerCli {
    program: String,
    host: Option<String>,
    api_version: Option<String>,
    engine: Option<EngineApi>,
}

impl DockerCli {
    pub fn new(host: Option<String>, api_version: Option<String>) -> Self {
        let engine = EngineApi::new(host.as_deref(), api_version.as_deref());
        match &engine {
            Some(engine) => tracing::debug!(endpoint = ?engine.endpoint(), "uploads use the engine API"),
            None => tracing::warn!(
                host = host.as_deref().unwrap_or_default(),
                "endpoint not reachable over the engine API; a synced path that changes type may be refused",
            ),
        }
        Self {
            program: "docker".to_string(),
            host,
            api_version,
            engine,
        }
    }

    /// Check that the endpoint answers. Returns the server version.
    pub fn connect(&self) -> Result<String, ControlPlaneError> {
        let out = self.run(
            "version",
            ("endpoint", self.host.as_deref().unwrap_or("default")),
            argv(&["version", "--format", "{{.Server.Version}}"]),
            None,
        )?;
        Ok(out.trim().to_string())
    }

    fn run(
        &self,
        operation: &'static str,
        subject: (&'static str, &str),
        args: Vec<String>,
        input: Option<&[u8]>,
    ) -> Result<String, ControlPlaneError> {
        tracing::debug!(operation, args = %args.join(" "), "docker");
        let io = |source| ControlPlaneError::Io {
            operation: operation.to_string(),
            source,
        };

        let mut cmd = Command::new(&self.program);
        if let Some(host) = &self.host {
            cmd.arg("-H").arg(host);
        }
        if let Some(version) = &self.api_version {
            cmd.env("DOCKER_API_VERSION", version);
        }
        cmd.args(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(io)?;
        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(bytes).map_err(io)?;
        }
        let output = child.wait_with_output().map_err(io)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let (kind, id) = subject;
            Err(classify_failure(
                operation,
                kind,
                id,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }

    /// Container ids for the given task ids, in the same order.
    fn task_containers(&self, task_ids: &[String]) -> Result<Vec<String>, ControlPlaneError> {
        let mut args = argv(&["inspect", "--type", "task", "--format", TASK_CONTAINER_FORMAT]);
        args.extend(task_ids.iter().cloned());
        let out = self.run("inspect task", ("task", &task_ids.join(",")), args, None)?;
        Ok(out.lines().map(|line| line.trim().to_string()).collect())
    }
}

impl ControlPlane for DockerCli {
    fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerSummary>, ControlPlaneError> {
        let args = argv(&[
            "ps",
            "--no-trunc",
            "--filter",
            &filter_arg(filter),
            "--format",
            JSON_FORMAT,
        ]);
        let out = self.run("ps", ("container", filter.needle()), args, None)?;
        let lines: Vec<PsLine> = json_lines("ps", &out)?;
        Ok(lines.into_iter().map(ContainerSummary::from).collect())
    }

    fn list_services(&self, filter: &ListFilter) -> Result<Vec<ServiceSummary>, ControlPlaneError> {
        let args = argv(&[
            "service",
            "ls",
            "--filter",
            &filter_arg(filter),
            "--format",
            JSON_FORMAT,
        ]);
        let out = self.run("service ls", ("service", filter.needle()), args, None)?;
        let lines: Vec<ServiceLine> = json_lines("service ls", &out)?;
        Ok(lines.into_iter().map(ServiceSummary::from).collect())
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, ControlPlaneError> {
        let args = argv(&[
            "service",
            "ps",
            &filter.service,
            "--no-trunc",
            "--filter",
            &format!("desired-state={}", filter.desired_state),
            "--format",
            JSON_FORMAT,
        ]);
        let out = self.run("service ps", ("service", &filter.service), args, None)?;
        let lines: Vec<TaskLine> = json_lines("service ps", &out)?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = lines.into_iter().map(|line| line.id).collect();
        let containers = self.task_containers(&ids)?;
        Ok(ids
            .into_iter()
            .zip(containers.into_iter().map(Some).chain(std::iter::repeat(None)))
            .map(|(id, container)| TaskSummary {
                id,
                container_id: container.filter(|c| !c.is_empty()),
            })
            .collect())
    }

    fn inspect_service(&self, id: &str) -> Result<ServiceInspect, ControlPlaneError> {
        let args = argv(&["service", "inspect", id, "--format", JSON_FORMAT]);
        let out = self.run("service inspect", ("service", id), args, None)?;
        let inspected: InspectedService =
            serde_json::from_str(out.trim()).map_err(|source| ControlPlaneError::Decode {
                operation: "service inspect".to_string(),
                source,
            })?;
        Ok(inspected.into())
    }

    fn create_volume(&self, spec: &VolumeCreate) -> Result<String, ControlPlaneError> {
        let mut args = argv(&["volume", "create"]);
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.name.clone());
        let out = self.run("volume create", ("volume", &spec.name), args, None)?;
        Ok(out.trim().to_string())
    }

    fn create_container(&self, spec: &ContainerCreate) -> Result<String, ControlPlaneError> {
        let mut args = argv(&["create", "--name", &spec.name]);
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(mount_arg(mount));
        }
        if spec.auto_remove {
            args.push("--rm".to_string());
        }
        args.push(spec.image.clone());
        let out = self.run("create", ("image", &spec.image), args, None)?;
        Ok(out.trim().to_string())
    }

    fn remove_container(&self, id: &str, force: bool) -> Result<(), ControlPlaneError> {
        let mut args = argv(&["rm"]);
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        self.run("rm", ("container", id), args, None).map(drop)
    }

    fn remove_volume(&self, name: &str, force: bool) -> Result<(), ControlPlaneError> {
        let mut args = argv(&["volume", "rm"]);
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        self.run("volume rm", ("volume", name), args, None)
            .map(drop)
    }

    fn start_container(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.run("start", ("container", id), argv(&["start", id]), None)
            .map(drop)
    }

    fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ControlPlaneError> {
        let secs = timeout.as_secs().to_string();
        self.run(
            "stop",
            ("container", id),
            argv(&["stop", "-t", &secs, id]),
            None,
        )
        .map(drop)
    }

    /// The CLI cannot submit a whole spec, so the difference to the live spec
    /// is replayed as `service update` flags.
    fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        rollout: Rollout,
    ) -> Result<(), ControlPlaneError> {
        let live = self.inspect_service(id)?;
        if live.version != version {
            return Err(ControlPlaneError::Command {
                operation: "service update".to_string(),
                message: format!(
                    "update out of sequence: {id} is at version {}, update based on {version}",
                    live.version
                ),
            });
        }

        let flags = update_flags(&live.spec, spec);
        if flags.is_empty() {
            tracing::debug!(service = id, "service spec unchanged");
            return Ok(());
        }
        let mut args = argv(&["service", "update", detach_flag(rollout)]);
        args.extend(flags);
        args.push(id.to_string());
        self.run("service update", ("service", id), args, None)
            .map(drop)
    }

    fn copy_archive(
        &self,
        container: &str,
        path: &str,
        archive: &[u8],
        options: CopyOptions,
    ) -> Result<(), ControlPlaneError> {
        if let Some(engine) = &self.engine {
            return engine.upload(container, path, archive, options);
        }
        // docker cp always refuses type changes.
        let args = argv(&["cp", "-", &format!("{container}:{path}")]);
        self.run("cp", ("container", container), args, Some(archive))
            .map(drop)
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn detach_flag(rollout: Rollout) -> &'static str {
    match rollout {
        Rollout::Detach => "--detach",
        // Blocks until the rollout has converged.
        Rollout::Wait => "--detach=false",
    }
}

fn filter_arg(filter: &ListFilter) -> String {
    match filter {
        ListFilter::Id(id) => format!("id={id}"),
        ListFilter::Name(name) => format!("name={name}"),
    }
}

fn mount_arg(mount: &MountSpec) -> String {
    match mount.mount_type {
        MountType::Tmpfs => format!("type=tmpfs,target={}", mount.target),
        other => format!("type={other},source={},target={}", mount.source, mount.target),
    }
}

/// `service update` flags that turn `live` into `desired`.
///
/// Mounts are keyed by target. `--mount-add` on a target already in use
/// replaces that mount, so a target present on both sides is never removed.
fn update_flags(live: &ServiceSpec, desired: &ServiceSpec) -> Vec<String> {
    let mut flags = Vec::new();
    for mount in &live.mounts {
        if !desired.mounts.iter().any(|m| m.target == mount.target) {
            flags.push("--mount-rm".to_string());
            flags.push(mount.target.clone());
        }
    }
    for mount in &desired.mounts {
        if !live.mounts.contains(mount) {
            flags.push("--mount-add".to_string());
            flags.push(mount_arg(mount));
        }
    }
    if desired.force_update > live.force_update {
        flags.push("--force".to_string());
    }
    flags
}

fn classify_failure(
    operation: &'static str,
    kind: &'static str,
    id: &str,
    stderr: &str,
) -> ControlPlaneError {
    let message = stderr.trim();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not a swarm manager") {
        ControlPlaneError::SwarmUnavailable
    } else if lowered.contains("no such") {
        ControlPlaneError::NotFound {
            kind,
            id: id.to_string(),
        }
    } else {
        ControlPlaneError::Command {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output decoding
// ---------------------------------------------------------------------------

fn json_lines<T: DeserializeOwned>(
    operation: &'static str,
    output: &str,
) -> Result<Vec<T>, ControlPlaneError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| ControlPlaneError::Decode {
                operation: operation.to_string(),
                source,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
}

impl From<PsLine> for ContainerSummary {
    fn from(line: PsLine) -> Self {
        ContainerSummary {
            id: line.id,
            names: line
                .names
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

impl From<ServiceLine> for ServiceSummary {
    fn from(line: ServiceLine) -> Self {
        ServiceSummary {
            id: line.id,
            name: line.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskLine {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedService {
    #[serde(rename = "ID")]
    id: String,
    version: InspectedVersion,
    spec: InspectedSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedVersion {
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedSpec {
    name: String,
    #[serde(default)]
    task_template: InspectedTaskTemplate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedTaskTemplate {
    #[serde(default)]
    container_spec: InspectedContainerSpec,
    #[serde(default)]
    force_update: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainerSpec {
    #[serde(default)]
    mounts: Vec<InspectedMount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedMount {
    #[serde(rename = "Type", default)]
    mount_type: String,
    #[serde(default)]
    source: String,
    target: String,
}

impl InspectedMount {
    /// `None` for mount kinds the engine never touches (npipe, cluster).
    fn into_spec(self) -> Option<MountSpec> {
        let mount_type = match self.mount_type.as_str() {
            "volume" => MountType::Volume,
            "bind" => MountType::Bind,
            "tmpfs" => MountType::Tmpfs,
            _ => return None,
        };
        Some(MountSpec {
            mount_type,
            source: self.source,
            target: self.target,
        })
    }
}

impl From<InspectedService> for ServiceInspect {
    fn from(inspected: InspectedService) -> Self {
        let template = inspected.spec.task_template;
        ServiceInspect {
            id: inspected.id,
            version: inspected.version.index,
            spec: ServiceSpec {
                name: inspected.spec.name,
                force_update: template.force_update,
                mounts: template
                    .container_spec
                    .mounts
                    .into_iter()
                    .filter_map(InspectedMount::into_spec)
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SERVICE_JSON: &str = r#"{
        "ID": "x1y2z3",
        "Version": {"Index": 42},
        "Spec": {
            "Name": "web",
            "TaskTemplate": {
                "ContainerSpec": {
                    "Image": "nginx:latest",
                    "Mounts": [
                        {"Type": "volume", "Source": "web-data", "Target": "/var/data"},
                        {"Type": "volume", "Source": "docksync-1234", "Target": "/app"},
                        {"Type": "npipe", "Source": "\\\\.\\pipe\\x", "Target": "\\\\.\\pipe\\x"}
                    ]
                },
                "ForceUpdate": 3
            }
        }
    }"#;

    fn spec(force_update: u64, mounts: Vec<MountSpec>) -> ServiceSpec {
        ServiceSpec {
            name: "web".to_string(),
            force_update,
            mounts,
        }
    }

    #[test]
    fn decodes_service_inspect() {
        let inspected: InspectedService = serde_json::from_str(SERVICE_JSON).expect("decode");
        let inspect = ServiceInspect::from(inspected);
        assert_eq!(inspect.id, "x1y2z3");
        assert_eq!(inspect.version, 42);
        assert_eq!(inspect.spec.force_update, 3);
        assert_eq!(
            inspect.spec.mounts,
            vec![
                MountSpec::volume("web-data", "/var/data"),
                MountSpec::volume("docksync-1234", "/app"),
            ]
        );
    }

    #[test]
    fn service_without_mounts_or_counter_decodes_to_defaults() {
        let json = r#"{"ID":"a","Version":{"Index":1},"Spec":{"Name":"web","TaskTemplate":{"ContainerSpec":{}}}}"#;
        let inspected: InspectedService = serde_json::from_str(json).expect("decode");
        let inspect = ServiceInspect::from(inspected);
        assert!(inspect.spec.mounts.is_empty());
        assert_eq!(inspect.spec.force_update, 0);
    }

    #[test]
    fn decodes_ps_lines_and_splits_names() {
        let out = concat!(
            r#"{"ID":"abc123","Image":"nginx","Names":"api,api-alias","State":"running"}"#,
            "\n\n",
            r#"{"ID":"def456","Image":"redis","Names":"cache"}"#,
            "\n",
        );
        let lines: Vec<PsLine> = json_lines("ps", out).expect("decode");
        let containers: Vec<ContainerSummary> =
            lines.into_iter().map(ContainerSummary::from).collect();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].id, "abc123");
        assert_eq!(containers[0].names, vec!["api", "api-alias"]);
        assert_eq!(containers[1].names, vec!["cache"]);
    }

    #[test]
    fn undecodable_line_is_a_decode_error() {
        let err = json_lines::<PsLine>("ps", "not json\n").expect_err("must fail");
        assert!(matches!(err, ControlPlaneError::Decode { .. }));
    }

    #[test]
    fn relay_swap_replaces_mount_at_same_target_and_forces() {
        let live = spec(
            3,
            vec![
                MountSpec::volume("web-data", "/var/data"),
                MountSpec::volume("docksync-old", "/app"),
            ],
        );
        let desired = spec(
            4,
            vec![
                MountSpec::volume("web-data", "/var/data"),
                MountSpec::volume("docksync-new", "/app"),
            ],
        );
        assert_eq!(
            update_flags(&live, &desired),
            vec![
                "--mount-add",
                "type=volume,source=docksync-new,target=/app",
                "--force",
            ]
        );
    }

    #[test]
    fn detaching_relay_removes_its_target() {
        let live = spec(5, vec![MountSpec::volume("docksync-old", "/app")]);
        let desired = spec(6, vec![]);
        assert_eq!(
            update_flags(&live, &desired),
            vec!["--mount-rm", "/app", "--force"]
        );
    }

    #[test]
    fn only_waiting_rollouts_block() {
        assert_eq!(detach_flag(Rollout::Detach), "--detach");
        assert_eq!(detach_flag(Rollout::Wait), "--detach=false");
    }

    #[test]
    fn identical_specs_need_no_flags() {
        let live = spec(1, vec![MountSpec::volume("web-data", "/var/data")]);
        assert!(update_flags(&live, &live.clone()).is_empty());
    }

    #[rstest]
    #[case("Error response from daemon: No such container: abc", "not_found")]
    #[case("Error: no such service: web", "not_found")]
    #[case("Error response from daemon: get docksync-1: no such volume", "not_found")]
    #[case(
        "Error response from daemon: This node is not a swarm manager. Use \"docker swarm init\"",
        "swarm"
    )]
    #[case("Error response from daemon: conflict", "command")]
    fn classifies_stderr(#[case] stderr: &str, #[case] expected: &str) {
        let err = classify_failure("op", "container", "abc", stderr);
        let actual = match err {
            ControlPlaneError::NotFound { .. } => "not_found",
            ControlPlaneError::SwarmUnavailable => "swarm",
            ControlPlaneError::Command { .. } => "command",
            _ => "other",
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn mount_args_follow_mount_flag_syntax() {
        assert_eq!(
            mount_arg(&MountSpec::volume("docksync-1", "/docksync-data")),
            "type=volume,source=docksync-1,target=/docksync-data"
        );
        let tmpfs = MountSpec {
            mount_type: MountType::Tmpfs,
            source: String::new(),
            target: "/tmp".to_string(),
        };
        assert_eq!(mount_arg(&tmpfs), "type=tmpfs,target=/tmp");
    }

    #[test]
    fn engine_uploads_depend_on_the_endpoint_scheme() {
        let local = DockerCli::new(Some("unix:///var/run/docker.sock".to_string()), None);
        assert!(local.engine.is_some());
        let remote = DockerCli::new(Some("ssh://deploy@build-host".to_string()), None);
        assert!(remote.engine.is_none());
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let cli = DockerCli {
            program: "/nonexistent/docksync-test-docker".to_string(),
            host: None,
            api_version: None,
            engine: None,
        };
        let err = cli.connect().expect_err("must fail");
        assert!(matches!(err, ControlPlaneError::Io { .. }));
    }
}
