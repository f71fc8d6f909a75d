//! Remote application container manager
//!
//! Runs isolated application containers on a Docker engine on behalf of many
//! concurrent callers. Provides:
//! - Container lifecycle (start, stop and remove, discovery)
//! - At most one in-flight start per mapping and one stop per container
//! - Endpoint resolution for the reverse proxy
//! - A single-worker async adapter over the engine API
//!
//! Ownership is stored on the engine as labels, so a restarted manager finds
//! its containers again without any local state.

pub mod config;
pub mod configurables;
pub mod container;
pub mod engine;
pub mod error;
pub mod image;
pub mod labels;
pub mod manager;
pub mod naming;
pub mod pending;
pub mod readiness;
pub mod reverse_proxy;

pub use config::{ConfigError, DockerConfig, ManagerConfig};
pub use configurables::{Configurable, ConfigurableError};
pub use container::Container;
pub use engine::{AsyncDockerClient, BollardBackend, DockerBackend, EngineError, EngineResult};
pub use error::{ManagerError, Operation, Result};
pub use image::{Image, ImageType};
pub use manager::{ContainerManager, VolumeBind, VolumeMode, Volumes};
pub use readiness::{wait_for_http_server_2xx, ReadinessError};
pub use reverse_proxy::{ConfigurableHttpProxy, ProxyError, ReverseProxy};
