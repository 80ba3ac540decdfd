//! docksync: mirror a local directory into a running container or service.
//!
//! # Usage
//!
//! ```text
//! docksync <SOURCE> <TARGET>:<PATH> [--restart] [--host <endpoint>] [--verbose]
//! ```
//!
//! `TARGET` is a container or swarm service, by name or id. With `--restart`
//! a container is restarted and a service is rolled after every delivery.

mod context;
mod docker;
mod engine;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;

use docksync_core::defaults::RELAY_IMAGE;
use docksync_core::{Destination, SyncConfig};

use docker::DockerCli;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "docksync",
    version,
    about = "Sync a local directory into a running Docker container or service",
    long_about = None,
)]
struct Cli {
    /// Local directory to watch.
    source: PathBuf,

    /// Where to sync to, as <container-or-service>:<absolute-path>.
    destination: Destination,

    /// Restart the container, or roll the service, after each sync.
    #[arg(short, long)]
    restart: bool,

    /// Docker endpoint. Defaults to the host of the current docker context.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Docker API version to speak.
    #[arg(long, env = "DOCKER_API_VERSION")]
    api_version: Option<String>,

    /// Log every docker invocation.
    #[arg(long)]
    verbose: bool,

    /// Quiet period before a changed path is synced, in milliseconds.
    #[arg(long, default_value_t = 100)]
    debounce_ms: u64,

    /// Seconds to wait for a container to stop before killing it.
    #[arg(long, default_value_t = 10)]
    stop_timeout: u64,

    /// Image used for the relay container that stages files for services.
    #[arg(long, default_value = RELAY_IMAGE)]
    relay_image: String,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    docksync_daemon::init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    let host = match cli.host {
        Some(host) => host,
        None => context::current_host()?,
    };
    let plane = DockerCli::new(Some(host.clone()), cli.api_version);
    let server = plane
        .connect()
        .with_context(|| format!("cannot reach docker at {host}"))?;
    tracing::debug!(host = %host, server = %server, "connected");

    println!(
        "{} {} {} {}",
        "Syncing".green().bold(),
        config.source.display(),
        "->".dimmed(),
        config.destination
    );

    let summary = docksync_daemon::start_blocking(Arc::new(plane), config)?;
    tracing::debug!(?summary, "exiting");
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SyncConfig> {
    let source = fs::canonicalize(&cli.source)
        .with_context(|| format!("source {} does not exist", cli.source.display()))?;
    if !source.is_dir() {
        bail!("source {} is not a directory", source.display());
    }

    let mut config = SyncConfig::new(source, cli.destination.clone(), cli.restart);
    config.debounce = Duration::from_millis(cli.debounce_ms);
    config.stop_timeout = Duration::from_secs(cli.stop_timeout);
    config.relay_image = cli.relay_image.clone();
    Ok(config)
}
