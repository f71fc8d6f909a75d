//! In-memory engine used by the manager integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bollard::container::Config;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerSummary, HostConfig, ImageConfig, ImageInspect,
    PortBinding,
};
use remoteapp_container_manager::engine::{DockerBackend, EngineError, EngineResult};
use remoteapp_container_manager::{
    labels, AsyncDockerClient, ContainerManager, DockerConfig, ManagerConfig,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const REALM: &str = "test-realm";
pub const CONTAINER_PORT: u16 = 8888;
pub const LOCAL_HOST: &str = "unix:///var/run/docker.sock";
pub const FIRST_HOST_PORT: u16 = 32768;

#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub requested_ports: HashMap<String, Option<Vec<PortBinding>>>,
    pub published_ports: HashMap<String, Option<Vec<PortBinding>>>,
    pub running: bool,
}

/// Blocks one engine operation until released
pub struct Gate {
    operation: &'static str,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct State {
    operations: Vec<String>,
    images: HashMap<String, ImageInspect>,
    containers: BTreeMap<String, FakeContainer>,
    next_id: u32,
    next_port: u16,
    fail_start: bool,
    fail_stop: bool,
    broken_ports: HashSet<String>,
    gate: Option<Gate>,
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

fn server_error(message: &str) -> EngineError {
    EngineError::Docker(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, entry: impl Into<String>) {
        self.state.lock().unwrap().operations.push(entry.into());
    }

    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn add_image(&self, name: &str, image_labels: &[(&str, &str)]) {
        let inspect = ImageInspect {
            id: Some(format!("sha256:{}", name.replace(':', "-"))),
            config: Some(ImageConfig {
                labels: Some(
                    image_labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .images
            .insert(name.to_string(), inspect);
    }

    /// Running container with a published port, as if created by someone else.
    pub fn seed_container(&self, name: &str, container_labels: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = next_id(&mut state);
        let port = next_port(&mut state);
        let mut published = HashMap::new();
        published.insert(
            format!("{}/tcp", CONTAINER_PORT),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".into()),
                host_port: Some(port.to_string()),
            }]),
        );
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image: "seeded:latest".into(),
                image_id: "sha256:seeded".into(),
                labels: container_labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                env: Vec::new(),
                binds: Vec::new(),
                requested_ports: HashMap::new(),
                published_ports: published,
                running: true,
            },
        );
        id
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .cloned()
            .collect()
    }

    pub fn running_with_label(&self, key: &str, value: &str) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.running && c.labels.get(key).map(String::as_str) == Some(value))
            .collect()
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().unwrap().fail_stop = fail;
    }

    /// Make `port` report a binding that cannot be parsed.
    pub fn break_port(&self, id: &str) {
        self.state.lock().unwrap().broken_ports.insert(id.to_string());
    }

    /// Block the next call of `operation` until `release` is notified.
    pub fn hold(&self, operation: &'static str) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state.lock().unwrap().gate = Some(Gate {
            operation,
            entered: entered.clone(),
            release: release.clone(),
        });
        (entered, release)
    }

    async fn pass_gate(&self, operation: &'static str) {
        let gate = {
            let mut state = self.state.lock().unwrap();
            let held = state
                .gate
                .as_ref()
                .is_some_and(|gate| gate.operation == operation);
            if held {
                state.gate.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    fn find_id(&self, id_or_name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .values()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .map(|c| c.id.clone())
    }
}

fn next_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("c{:04}", state.next_id)
}

fn next_port(state: &mut State) -> u16 {
    let port = FIRST_HOST_PORT + state.next_port;
    state.next_port += 1;
    port
}

#[async_trait]
impl DockerBackend for FakeEngine {
    async fn inspect_image(&self, name: &str) -> EngineResult<ImageInspect> {
        self.record(format!("inspect_image:{name}"));
        self.pass_gate("inspect_image").await;
        self.state
            .lock()
            .unwrap()
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no such image: {name}")))
    }

    async fn list_containers(
        &self,
        label_filters: Vec<String>,
    ) -> EngineResult<Vec<ContainerSummary>> {
        self.record(format!("list:{}", label_filters.join(",")));
        let filters: Vec<(String, String)> = label_filters
            .iter()
            .filter_map(|f| f.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| c.running)
            .filter(|c| filters.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .map(|c| ContainerSummary {
                id: Some(c.id.clone()),
                names: Some(vec![format!("/{}", c.name)]),
                image: Some(c.image.clone()),
                image_id: Some(c.image_id.clone()),
                labels: Some(c.labels.clone()),
                ..Default::default()
            })
            .collect())
    }

    async fn inspect_container(&self, container_id: &str) -> EngineResult<ContainerInspectResponse> {
        self.record(format!("inspect_container:{container_id}"));
        self.pass_gate("inspect_container").await;
        let id = self
            .find_id(container_id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {container_id}")))?;
        let state = self.state.lock().unwrap();
        let c = &state.containers[&id];
        Ok(ContainerInspectResponse {
            id: Some(c.id.clone()),
            name: Some(format!("/{}", c.name)),
            config: Some(ContainerConfig {
                image: Some(c.image.clone()),
                labels: Some(c.labels.clone()),
                env: Some(c.env.clone()),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                binds: Some(c.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> EngineResult<String> {
        self.record(format!("create:{name}"));
        let image = config.image.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let image_id = state
            .images
            .get(&image)
            .and_then(|i| i.id.clone())
            .ok_or_else(|| EngineError::NotFound(format!("no such image: {image}")))?;
        if state.containers.values().any(|c| c.name == name) {
            return Err(EngineError::Docker(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409,
                    message: format!("name {name} already in use"),
                },
            ));
        }

        let id = next_id(&mut state);
        let host_config = config.host_config.unwrap_or_default();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image,
                image_id,
                labels: config.labels.unwrap_or_default(),
                env: config.env.unwrap_or_default(),
                binds: host_config.binds.unwrap_or_default(),
                requested_ports: host_config.port_bindings.unwrap_or_default(),
                published_ports: HashMap::new(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        self.record(format!("start:{container_id}"));
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(server_error("cannot start container"));
        }
        let mut container = state
            .containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;

        let mut published = HashMap::new();
        for (key, bindings) in &container.requested_ports {
            let mut assigned = Vec::new();
            for binding in bindings.iter().flatten() {
                let host_port = match binding.host_port.as_deref() {
                    Some("0") | None => next_port(&mut state).to_string(),
                    Some(port) => port.to_string(),
                };
                assigned.push(PortBinding {
                    host_ip: binding.host_ip.clone(),
                    host_port: Some(host_port),
                });
            }
            published.insert(key.clone(), Some(assigned));
        }
        container.published_ports = published;
        container.running = true;
        state.containers.insert(container_id.to_string(), container);
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        self.record(format!("stop:{container_id}"));
        let id = self
            .find_id(container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        if state.fail_stop {
            return Err(server_error("cannot stop container"));
        }
        if let Some(c) = state.containers.get_mut(&id) {
            c.running = false;
            c.published_ports.clear();
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> EngineResult<()> {
        self.record(format!("remove:{container_id}"));
        let id = self
            .find_id(container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        self.state.lock().unwrap().containers.remove(&id);
        Ok(())
    }

    async fn port(
        &self,
        container_id: &str,
        private_port: u16,
    ) -> EngineResult<Option<Vec<PortBinding>>> {
        let id = self
            .find_id(container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        let state = self.state.lock().unwrap();
        if state.broken_ports.contains(&id) {
            return Ok(Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".into()),
                host_port: Some("not-a-port".into()),
            }]));
        }
        Ok(state.containers[&id]
            .published_ports
            .get(&format!("{}/tcp", private_port))
            .cloned()
            .flatten())
    }
}

pub fn config(realm: &str, host: &str) -> ManagerConfig {
    ManagerConfig {
        realm: realm.to_string(),
        container_port: CONTAINER_PORT,
        docker: DockerConfig {
            host: Some(host.to_string()),
            ..Default::default()
        },
    }
}

pub fn manager_with(engine: &Arc<FakeEngine>, realm: &str, host: &str) -> ContainerManager {
    let client = AsyncDockerClient::with_backend(engine.clone());
    ContainerManager::with_client(config(realm, host), client)
}

pub fn manager(engine: &Arc<FakeEngine>) -> ContainerManager {
    manager_with(engine, REALM, LOCAL_HOST)
}

/// Ownership labels as the manager writes them
pub fn owned_labels<'a>(
    realm: &'a str,
    user: &'a str,
    mapping_id: &'a str,
    url_id: &'a str,
) -> Vec<(&'static str, &'a str)> {
    vec![
        (labels::REALM, realm),
        (labels::USER, user),
        (labels::MAPPING_ID, mapping_id),
        (labels::URL_ID, url_id),
        (labels::URLPATH, "/seeded/"),
    ]
}
