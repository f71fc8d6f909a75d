//! Bollard-backed engine implementation

use super::{DockerBackend, EngineError, EngineResult};
use crate::config::DockerConfig;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary, ImageInspect, PortBinding};
use bollard::{Docker, API_DEFAULT_VERSION};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Grace period the engine gives a container before killing it
const STOP_TIMEOUT_SECS: i64 = 30;

/// Docker engine reached through bollard
pub struct BollardBackend {
    docker: Docker,
}

impl BollardBackend {
    /// Build a client from explicit settings. Without a configured host the
    /// endpoint comes from `DOCKER_HOST`, and with no endpoint at all bollard's
    /// defaults apply.
    pub fn connect(config: &DockerConfig) -> EngineResult<Self> {
        let timeout = config.timeout_secs();
        let host = config.effective_host();

        let docker = match connection(config, host.as_deref())? {
            Connection::Defaults => Docker::connect_with_defaults(),
            Connection::Ssl {
                host,
                ca,
                cert,
                key,
            } => Docker::connect_with_ssl(host, &key, &cert, &ca, timeout, API_DEFAULT_VERSION),
            Connection::Socket(path) => {
                Docker::connect_with_socket(path, timeout, API_DEFAULT_VERSION)
            }
            Connection::Http(host) => Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION),
        }
        .map_err(|e| EngineError::Connect(e.to_string()))?;

        info!(
            host = host.as_deref().unwrap_or("<default>"),
            tls = config.tls,
            "Docker client configured"
        );

        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Connector chosen for an engine endpoint
#[derive(Debug, PartialEq, Eq)]
enum Connection<'a> {
    Defaults,
    Ssl {
        host: &'a str,
        ca: PathBuf,
        cert: PathBuf,
        key: PathBuf,
    },
    Socket(&'a str),
    Http(&'a str),
}

fn connection<'a>(config: &DockerConfig, host: Option<&'a str>) -> EngineResult<Connection<'a>> {
    let Some(host) = host else {
        if config.tls {
            warn!("TLS is enabled but no engine host is set, using the default connection");
        }
        return Ok(Connection::Defaults);
    };

    if config.tls {
        if !config.tls_verify {
            return Err(EngineError::Connect(
                "TLS without certificate verification is not supported".to_string(),
            ));
        }
        return Ok(Connection::Ssl {
            host,
            ca: require_tls_file(config, config.tls_ca.as_ref(), "ca.pem")?,
            cert: require_tls_file(config, config.tls_cert.as_ref(), "cert.pem")?,
            key: require_tls_file(config, config.tls_key.as_ref(), "key.pem")?,
        });
    }

    if is_local_endpoint(host) {
        Ok(Connection::Socket(host.trim_start_matches("unix://")))
    } else {
        Ok(Connection::Http(host))
    }
}

/// Whether an engine endpoint addresses a daemon on this machine
pub(crate) fn is_local_endpoint(host: &str) -> bool {
    host.starts_with("unix://") || host.starts_with('/') || host.starts_with("npipe://")
}

fn require_tls_file(
    config: &DockerConfig,
    configured: Option<&PathBuf>,
    file_name: &str,
) -> EngineResult<PathBuf> {
    config
        .tls_file(configured, file_name)
        .ok_or_else(|| EngineError::Connect(format!("TLS enabled but no {} configured", file_name)))
}

fn map_error(error: bollard::errors::Error, target: &str) -> EngineError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(format!("{}: {}", target, message)),
        other => EngineError::Docker(other),
    }
}

#[async_trait]
impl DockerBackend for BollardBackend {
    async fn inspect_image(&self, name: &str) -> EngineResult<ImageInspect> {
        self.docker
            .inspect_image(name)
            .await
            .map_err(|e| map_error(e, name))
    }

    /// Only running containers are listed.
    async fn list_containers(
        &self,
        label_filters: Vec<String>,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), label_filters);

        let options = ListContainersOptions {
            all: false,
            filters,
            ..Default::default()
        };

        self.docker
            .list_containers(Some(options))
            .await
            .map_err(EngineError::Docker)
    }

    async fn inspect_container(&self, container_id: &str) -> EngineResult<ContainerInspectResponse> {
        self.docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| map_error(e, container_id))
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> EngineResult<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_error(e, name))?;

        for warning in &response.warnings {
            debug!(container_name = %name, warning = %warning, "Engine warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error(e, container_id))
    }

    async fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self
            .docker
            .stop_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Already stopped
                Ok(())
            }
            Err(e) => Err(map_error(e, container_id)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> EngineResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| map_error(e, container_id))
    }

    async fn port(
        &self,
        container_id: &str,
        private_port: u16,
    ) -> EngineResult<Option<Vec<PortBinding>>> {
        let inspect = self.inspect_container(container_id).await?;

        Ok(inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .and_then(|ports| ports.get(&format!("{}/tcp", private_port)).cloned())
            .flatten())
    }
}
