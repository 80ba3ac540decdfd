//! Endpoint discovery from the active docker context.

use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ContextInfo {
    #[serde(rename = "Endpoints")]
    endpoints: Endpoints,
}

#[derive(Debug, Deserialize)]
struct Endpoints {
    docker: DockerEndpoint,
}

#[derive(Debug, Deserialize)]
struct DockerEndpoint {
    #[serde(rename = "Host")]
    host: String,
}

/// Host of the current context, as `docker context inspect` reports it.
pub fn current_host() -> Result<String> {
    let output = Command::new("docker")
        .args(["context", "inspect"])
        .output()
        .context("running docker context inspect")?;
    if !output.status.success() {
        bail!(
            "failed to get docker context: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let host = parse_host(&String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(host = %host, "using host from docker context");
    Ok(host)
}

fn parse_host(json: &str) -> Result<String> {
    let contexts: Vec<ContextInfo> =
        serde_json::from_str(json).context("failed to parse docker context")?;
    contexts
        .into_iter()
        .next()
        .map(|context| context.endpoints.docker.host)
        .ok_or_else(|| anyhow!("no docker context found"))
}
