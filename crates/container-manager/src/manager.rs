//! Container lifecycle management
//!
//! Starts, discovers and tears down application containers for many callers
//! at once. Two pending sets keep at most one mutation in flight per target:
//! `starting` is keyed by mapping id, `stopping` by engine container id.
//! Everything else is recovered from the engine through labels on demand, so
//! the manager holds no state that would need persisting.

use crate::config::ManagerConfig;
use crate::container::Container;
use crate::engine::docker::is_local_endpoint;
use crate::engine::AsyncDockerClient;
use crate::error::{ManagerError, Operation, Result};
use crate::image::Image;
use crate::labels;
use crate::naming;
use crate::pending::{PendingGuard, PendingSet};
use bollard::container::Config;
use bollard::models::{HostConfig, PortBinding};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Address used when the engine runs on this machine
pub const LOOPBACK_IP: &str = "127.0.0.1";
const ALL_INTERFACES_IP: &str = "0.0.0.0";

/// Access mode of a bind mount
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
}

impl fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeMode::ReadOnly => write!(f, "ro"),
            VolumeMode::ReadWrite => write!(f, "rw"),
        }
    }
}

/// Where a host path is mounted inside the container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBind {
    pub bind: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

/// Host source path -> mount target
pub type Volumes = HashMap<String, VolumeBind>;

/// Orchestrates application containers of one realm
pub struct ContainerManager {
    docker: AsyncDockerClient,
    config: ManagerConfig,
    /// Address published ports are reached at
    endpoint_ip: String,
    starting: PendingSet,
    stopping: PendingSet,
}

impl ContainerManager {
    /// Manager talking to the engine described by `config.docker`.
    pub fn new(config: ManagerConfig) -> Self {
        let docker = AsyncDockerClient::new(config.docker.clone());
        Self::with_client(config, docker)
    }

    pub fn with_client(config: ManagerConfig, docker: AsyncDockerClient) -> Self {
        let endpoint_ip = endpoint_ip(config.docker.effective_host().as_deref());
        info!(
            realm = %config.realm,
            endpoint_ip = %endpoint_ip,
            container_port = config.container_port,
            "Container manager configured"
        );

        Self {
            docker,
            config,
            endpoint_ip,
            starting: PendingSet::new(),
            stopping: PendingSet::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn realm(&self) -> &str {
        &self.config.realm
    }

    /// Whether a start for `mapping_id` is in flight
    pub fn is_starting(&self, mapping_id: &str) -> bool {
        self.starting.contains(mapping_id)
    }

    /// Whether a stop for `container_id` is in flight
    pub fn is_stopping(&self, container_id: &str) -> bool {
        self.stopping.contains(container_id)
    }

    /// Start a fresh container of `image_name` for `user_name`'s grant
    /// `mapping_id`, replacing any container already serving that grant.
    ///
    /// Fails immediately with [`ManagerError::OperationInProgress`] while
    /// another start for the same mapping id is running. A missing image is
    /// reported as the engine's not-found error. When the container was
    /// created but could not be started or reached, it is stopped and removed
    /// before the error is returned.
    pub async fn start_container(
        &self,
        user_name: &str,
        image_name: &str,
        mapping_id: &str,
        base_urlpath: &str,
        volumes: &Volumes,
        environment: &HashMap<String, String>,
    ) -> Result<Container> {
        let _pending = acquire(&self.starting, Operation::Start, mapping_id)?;

        info!(
            user = %user_name,
            image = %image_name,
            mapping_id = %mapping_id,
            "Starting container"
        );

        let image = self
            .docker
            .inspect_image(image_name)
            .await
            .map_err(ManagerError::engine("inspect_image", image_name))?;

        // Includes containers whose endpoint cannot be resolved.
        let existing = self
            .labelled_containers(None, Some(mapping_id), Some(user_name))
            .await?;
        if existing.len() > 1 {
            error!(
                count = existing.len(),
                mapping_id = %mapping_id,
                user = %user_name,
                "Mapping is served by more than one container"
            );
            return Err(ManagerError::MultipleResultsFound {
                count: existing.len(),
            });
        }
        for container in &existing {
            info!(
                container_id = %container.engine_id,
                mapping_id = %mapping_id,
                "Replacing running container of mapping"
            );
            self.stop_and_remove_container(&container.engine_id).await?;
        }

        let binds = filter_volumes(volumes);
        let container_name = naming::container_name(&self.config.realm, user_name, mapping_id);
        let url_id = naming::new_url_id();
        let urlpath = container_urlpath(base_urlpath, &url_id);

        let container_config = self.container_config(
            image_name,
            user_name,
            mapping_id,
            &url_id,
            &urlpath,
            binds,
            environment,
        );

        debug!(container_name = %container_name, url_id = %url_id, "Creating container");

        let container_id = self
            .docker
            .create_container(&container_name, container_config)
            .await
            .map_err(ManagerError::engine("create_container", &container_name))?;

        if let Err(e) = self.docker.start_container(&container_id).await {
            error!(
                container_id = %container_id,
                error = %e,
                "Failed to start container, removing it"
            );
            self.cleanup(&container_id).await;
            return Err(ManagerError::engine("start_container", &container_id)(e));
        }

        let (ip, port) = match self.resolve_endpoint(&container_id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(
                    container_id = %container_id,
                    error = %e,
                    "Started container has no usable endpoint, removing it"
                );
                self.cleanup(&container_id).await;
                return Err(e);
            }
        };

        let container = Container {
            engine_id: container_id,
            name: container_name,
            image_name: image_name.to_string(),
            image_id: image.id.unwrap_or_default(),
            ip,
            port: Some(port),
            url_id,
            urlpath,
            mapping_id: mapping_id.to_string(),
            user_name: user_name.to_string(),
            realm: self.config.realm.clone(),
        };

        info!(
            container_id = %container.engine_id,
            host_url = %container.host_url(),
            urlpath = %container.urlpath,
            "Container started"
        );

        Ok(container)
    }

    /// Stop and remove a container of this realm.
    ///
    /// Only a concurrent stop of the same id is reported as an error. A
    /// container that is already gone counts as removed, a container of
    /// another realm is left alone, and stop/remove failures are logged.
    pub async fn stop_and_remove_container(&self, container_id: &str) -> Result<()> {
        let _pending = acquire(&self.stopping, Operation::Stop, container_id)?;

        let inspect = match self.docker.inspect_container(container_id).await {
            Ok(inspect) => inspect,
            Err(e) if e.is_not_found() => {
                info!(container_id = %container_id, "Container not found, nothing to remove");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    container_id = %container_id,
                    error = %e,
                    "Failed to inspect container, not removing it"
                );
                return Ok(());
            }
        };

        let realm = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|l| l.get(labels::REALM));

        if realm.map(String::as_str) != Some(self.config.realm.as_str()) {
            warn!(
                container_id = %container_id,
                container_realm = ?realm,
                realm = %self.config.realm,
                "Refusing to remove container outside this realm"
            );
            return Ok(());
        }

        match self.docker.stop_container(container_id).await {
            Ok(()) => debug!(container_id = %container_id, "Container stopped"),
            Err(e) => warn!(
                container_id = %container_id,
                error = %e,
                "Failed to stop container"
            ),
        }

        match self.docker.remove_container(container_id).await {
            Ok(()) => info!(container_id = %container_id, "Container removed"),
            Err(e) => warn!(
                container_id = %container_id,
                error = %e,
                "Failed to remove container"
            ),
        }

        Ok(())
    }

    /// Running containers of this realm matching every given filter.
    ///
    /// A container whose endpoint cannot be resolved is logged and left out.
    pub async fn find_containers(
        &self,
        url_id: Option<&str>,
        mapping_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<Vec<Container>> {
        let labelled = self
            .labelled_containers(url_id, mapping_id, user_name)
            .await?;

        let mut containers = Vec::with_capacity(labelled.len());
        for mut container in labelled {
            match self.resolve_endpoint(&container.engine_id).await {
                Ok((ip, port)) => {
                    container.ip = ip;
                    container.port = Some(port);
                    containers.push(container);
                }
                Err(e) => {
                    warn!(
                        container_id = %container.engine_id,
                        error = %e,
                        "Skipping container with unresolvable endpoint"
                    );
                }
            }
        }

        Ok(containers)
    }

    /// Running containers of this realm matching the label filters, with the
    /// endpoint left unresolved.
    async fn labelled_containers(
        &self,
        url_id: Option<&str>,
        mapping_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<Vec<Container>> {
        let mut filters = vec![labels::filter(labels::REALM, &self.config.realm)];
        if let Some(url_id) = url_id {
            filters.push(labels::filter(labels::URL_ID, url_id));
        }
        if let Some(mapping_id) = mapping_id {
            filters.push(labels::filter(labels::MAPPING_ID, mapping_id));
        }
        if let Some(user_name) = user_name {
            filters.push(labels::filter(labels::USER, user_name));
        }

        let summaries = self
            .docker
            .list_containers(filters)
            .await
            .map_err(ManagerError::engine("list_containers", &self.config.realm))?;

        Ok(summaries.iter().map(Container::from_summary).collect())
    }

    /// The single container matching the filters, if any.
    pub async fn find_container(
        &self,
        url_id: Option<&str>,
        mapping_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<Option<Container>> {
        let mut containers = self.find_containers(url_id, mapping_id, user_name).await?;
        match containers.len() {
            0 => Ok(None),
            1 => Ok(containers.pop()),
            count => {
                error!(
                    count,
                    url_id = ?url_id,
                    mapping_id = ?mapping_id,
                    user = ?user_name,
                    "Label lookup matched more than one container"
                );
                Err(ManagerError::MultipleResultsFound { count })
            }
        }
    }

    /// Image metadata, or `None` if the engine does not know the image.
    pub async fn image(&self, image_name: &str) -> Result<Option<Image>> {
        match self.docker.inspect_image(image_name).await {
            Ok(inspect) => Ok(Some(Image::from_inspect(image_name, &inspect))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ManagerError::engine("inspect_image", image_name)(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn container_config(
        &self,
        image_name: &str,
        user_name: &str,
        mapping_id: &str,
        url_id: &str,
        urlpath: &str,
        binds: Vec<String>,
        environment: &HashMap<String, String>,
    ) -> Config<String> {
        let port_key = format!("{}/tcp", self.config.container_port);

        let host_ip = if self.endpoint_ip == LOOPBACK_IP {
            LOOPBACK_IP
        } else {
            ALL_INTERFACES_IP
        };

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(host_ip.to_string()),
                host_port: Some("0".to_string()), // Dynamic port
            }]),
        );

        let mut container_labels = HashMap::new();
        container_labels.insert(labels::REALM.to_string(), self.config.realm.clone());
        container_labels.insert(labels::USER.to_string(), user_name.to_string());
        container_labels.insert(labels::MAPPING_ID.to_string(), mapping_id.to_string());
        container_labels.insert(labels::URL_ID.to_string(), url_id.to_string());
        container_labels.insert(labels::URLPATH.to_string(), urlpath.to_string());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            ..Default::default()
        };

        Config {
            image: Some(image_name.to_string()),
            env: Some(build_environment(user_name, urlpath, url_id, environment)),
            labels: Some(container_labels),
            exposed_ports: Some({
                let mut ports = HashMap::new();
                ports.insert(port_key, HashMap::new());
                ports
            }),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Reachable ip and host port of the published container port.
    async fn resolve_endpoint(&self, container_id: &str) -> Result<(String, u16)> {
        let private_port = self.config.container_port;
        let bindings = self
            .docker
            .port(container_id, private_port)
            .await
            .map_err(ManagerError::engine("port", container_id))?;

        let unresolvable = |reason: String| ManagerError::EndpointResolution {
            container_id: container_id.to_string(),
            reason,
        };

        let binding = bindings
            .and_then(|bindings| bindings.into_iter().next())
            .ok_or_else(|| unresolvable(format!("port {}/tcp is not published", private_port)))?;

        let host_port = binding
            .host_port
            .ok_or_else(|| unresolvable("binding has no host port".to_string()))?;

        let port = host_port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| unresolvable(format!("invalid host port '{}'", host_port)))?;

        Ok((self.endpoint_ip.clone(), port))
    }

    /// Best-effort removal after a failed start.
    async fn cleanup(&self, container_id: &str) {
        if let Err(e) = self.stop_and_remove_container(container_id).await {
            warn!(
                container_id = %container_id,
                error = %e,
                "Cleanup of failed container did not run"
            );
        }
    }
}

fn acquire(set: &PendingSet, operation: Operation, key: &str) -> Result<PendingGuard> {
    set.try_acquire(key).ok_or_else(|| {
        warn!(operation = %operation, key = %key, "Operation already in progress");
        ManagerError::OperationInProgress {
            operation,
            key: key.to_string(),
        }
    })
}

/// Address published ports are reachable at for a given engine endpoint.
///
/// The engine reports bindings on `0.0.0.0`, which is not an address a client
/// can use. A remote engine is reached through its own hostname; a local one
/// through loopback.
pub fn endpoint_ip(engine_host: Option<&str>) -> String {
    let Some(host) = engine_host else {
        return LOOPBACK_IP.to_string();
    };
    if is_local_endpoint(host) {
        return LOOPBACK_IP.to_string();
    }

    // `host:port` without a scheme is what the engine client treats as tcp.
    hostname(host)
        .or_else(|| hostname(&format!("tcp://{}", host)))
        .unwrap_or_else(|| {
            warn!(host = %host, "Engine host has no hostname, assuming local engine");
            LOOPBACK_IP.to_string()
        })
}

fn hostname(endpoint: &str) -> Option<String> {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .filter(|host| !host.is_empty())
}

/// Keep only bind mounts whose source exists on this machine. The engine
/// would otherwise create an empty directory in place of a missing source.
pub fn filter_volumes(volumes: &Volumes) -> Vec<String> {
    let mut binds: Vec<String> = volumes
        .iter()
        .filter_map(|(source, volume)| {
            if Path::new(source).exists() {
                Some(format!("{}:{}:{}", source, volume.bind, volume.mode))
            } else {
                warn!(
                    source = %source,
                    target = %volume.bind,
                    "Dropping volume whose source does not exist"
                );
                None
            }
        })
        .collect();
    binds.sort();
    binds
}

/// Public path of a container: `{base_urlpath}containers/{url_id}/`
pub fn container_urlpath(base_urlpath: &str, url_id: &str) -> String {
    let base = base_urlpath.trim_end_matches('/');
    let base = base.strip_prefix('/').unwrap_or(base);
    if base.is_empty() {
        format!("/containers/{}/", url_id)
    } else {
        format!("/{}/containers/{}/", base, url_id)
    }
}

/// Unix login derived from a user name: the part before `@`.
pub fn unix_user(user_name: &str) -> &str {
    user_name.split('@').next().unwrap_or(user_name)
}

/// Fixed variables first; caller-supplied pairs never override them.
fn build_environment(
    user_name: &str,
    urlpath: &str,
    url_id: &str,
    extra: &HashMap<String, String>,
) -> Vec<String> {
    let mut env = BTreeMap::new();
    env.insert("JPY_USER".to_string(), user_name.to_string());
    env.insert("JPY_BASE_USER_URL".to_string(), urlpath.to_string());
    env.insert("USER".to_string(), unix_user(user_name).to_string());
    env.insert("URL_ID".to_string(), url_id.to_string());

    for (key, value) in extra {
        env.entry(key.clone()).or_insert_with(|| value.clone());
    }

    env.into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}
