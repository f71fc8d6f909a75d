//! Container engine access
//!
//! The manager talks to the engine through [`DockerBackend`], which lists
//! exactly the engine operations the orchestrator consumes. [`AsyncDockerClient`]
//! funnels every call through a single worker so the engine observes them in
//! submission order.

pub mod client;
pub mod docker;

pub use client::AsyncDockerClient;
pub use docker::BollardBackend;

use async_trait::async_trait;
use bollard::container::Config;
use bollard::models::{ContainerInspectResponse, ContainerSummary, ImageInspect, PortBinding};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine layer
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Failed to connect to Docker engine: {0}")]
    Connect(String),

    #[error("Engine worker has stopped")]
    WorkerStopped,
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Engine operations used by the container manager.
///
/// Implementations must report a missing image or container as
/// [`EngineError::NotFound`].
#[async_trait]
pub trait DockerBackend: Send + Sync {
    async fn inspect_image(&self, name: &str) -> EngineResult<ImageInspect>;

    /// List running containers matching every `key=value` label filter.
    async fn list_containers(&self, label_filters: Vec<String>)
        -> EngineResult<Vec<ContainerSummary>>;

    async fn inspect_container(&self, container_id: &str) -> EngineResult<ContainerInspectResponse>;

    /// Create a container and return its engine id.
    async fn create_container(&self, name: &str, config: Config<String>) -> EngineResult<String>;

    async fn start_container(&self, container_id: &str) -> EngineResult<()>;

    async fn stop_container(&self, container_id: &str) -> EngineResult<()>;

    async fn remove_container(&self, container_id: &str) -> EngineResult<()>;

    /// Host bindings published for `private_port/tcp`, `None` when unpublished.
    async fn port(
        &self,
        container_id: &str,
        private_port: u16,
    ) -> EngineResult<Option<Vec<PortBinding>>>;
}
