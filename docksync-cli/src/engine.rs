//! Archive uploads over the Docker Engine API.
//!
//! `docker cp` always asks the daemon to refuse an entry that would replace a
//! directory with a file or the reverse. The archive endpoint takes that as a
//! parameter, so uploads go through [`bollard`] and everything else stays on
//! the command-line client.
//!
//! The [`ControlPlane`](docksync_core::ControlPlane) is synchronous and runs
//! on the blocking pool; requests are driven on the ambient tokio runtime
//! through [`Handle::block_on`].

use std::fmt;
use std::sync::{Mutex, PoisonError};

use bollard::container::UploadToContainerOptions;
use bollard::errors::Error as BollardError;
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use tokio::runtime::Handle;

use docksync_core::{ControlPlaneError, CopyOptions};

/// Request timeout, in seconds.
const TIMEOUT_SECS: u64 = 120;

#[cfg(unix)]
const LOCAL_ENDPOINT: &str = "unix:///var/run/docker.sock";
#[cfg(windows)]
const LOCAL_ENDPOINT: &str = "npipe:////./pipe/docker_engine";

/// A daemon address the Engine API client can dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(String),
    NamedPipe(String),
    Http(String),
}

impl Endpoint {
    /// `None` for schemes only the command-line client speaks, such as `ssh://`.
    pub fn parse(host: &str) -> Option<Self> {
        let host = host.trim();
        if host.starts_with("unix://") {
            Some(Endpoint::Unix(host.to_string()))
        } else if host.starts_with("npipe://") {
            Some(Endpoint::NamedPipe(host.to_string()))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Some(Endpoint::Http(host.to_string()))
        } else {
            None
        }
    }

    fn connect(&self, version: &ClientVersion) -> Result<Docker, ControlPlaneError> {
        let connected = match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => Docker::connect_with_unix(path, TIMEOUT_SECS, version),
            #[cfg(windows)]
            Endpoint::NamedPipe(path) => {
                Docker::connect_with_named_pipe(path, TIMEOUT_SECS, version)
            }
            Endpoint::Http(addr) => Docker::connect_with_http(addr, TIMEOUT_SECS, version),
            #[allow(unreachable_patterns)]
            other => {
                return Err(ControlPlaneError::Command {
                    operation: "connect".to_string(),
                    message: format!("{other:?} is not reachable from this platform"),
                })
            }
        };
        connected.map_err(|err| ControlPlaneError::Command {
            operation: "connect".to_string(),
            message: err.to_string(),
        })
    }
}

/// `"1.43"` as a client version.
pub fn parse_api_version(version: &str) -> Option<ClientVersion> {
    let (major, minor) = version.trim().trim_start_matches('v').split_once('.')?;
    Some(ClientVersion {
        major_version: major.parse().ok()?,
        minor_version: minor.parse().ok()?,
    })
}

fn default_version() -> ClientVersion {
    ClientVersion {
        major_version: API_DEFAULT_VERSION.major_version,
        minor_version: API_DEFAULT_VERSION.minor_version,
    }
}

/// Engine API client for archive uploads, dialled on first use.
pub struct EngineApi {
    endpoint: Endpoint,
    version: ClientVersion,
    client: Mutex<Option<Docker>>,
}

impl EngineApi {
    /// `None` when `host` uses a scheme the Engine API client cannot dial.
    pub fn new(host: Option<&str>, api_version: Option<&str>) -> Option<Self> {
        let endpoint = Endpoint::parse(host.unwrap_or(LOCAL_ENDPOINT))?;
        let version = match api_version {
            Some(raw) => parse_api_version(raw).unwrap_or_else(|| {
                tracing::warn!(version = raw, "unparseable API version, using the default");
                default_version()
            }),
            None => default_version(),
        };
        Some(Self {
            endpoint,
            version,
            client: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Extract `archive` into `container` at `path`.
    pub fn upload(
        &self,
        container: &str,
        path: &str,
        archive: &[u8],
        options: CopyOptions,
    ) -> Result<(), ControlPlaneError> {
        let handle = Handle::try_current().map_err(|err| ControlPlaneError::Command {
            operation: "upload".to_string(),
            message: err.to_string(),
        })?;
        let docker = self.client()?;
        tracing::debug!(container, path, bytes = archive.len(), "engine upload");
        handle
            .block_on(docker.upload_to_container(
                container,
                Some(upload_options(path, options)),
                archive.to_vec().into(),
            ))
            .map_err(|err| classify(container, err))
    }

    fn client(&self) -> Result<Docker, ControlPlaneError> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(docker) = slot.as_ref() {
            return Ok(docker.clone());
        }
        let docker = self.endpoint.connect(&self.version)?;
        *slot = Some(docker.clone());
        Ok(docker)
    }
}

impl fmt::Debug for EngineApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineApi")
            .field("endpoint", &self.endpoint)
            .field(
                "version",
                &format_args!("{}.{}", self.version.major_version, self.version.minor_version),
            )
            .finish_non_exhaustive()
    }
}

fn upload_options(path: &str, options: CopyOptions) -> UploadToContainerOptions<String> {
    UploadToContainerOptions {
        path: path.to_string(),
        no_overwrite_dir_non_dir: (!options.allow_overwrite_dir_with_file).to_string(),
    }
}

fn classify(container: &str, err: BollardError) -> ControlPlaneError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => ControlPlaneError::NotFound {
            kind: "container",
            id: container.to_string(),
        },
        other => ControlPlaneError::Command {
            operation: "upload".to_string(),
            message: other.to_string(),
        },
    }
}
