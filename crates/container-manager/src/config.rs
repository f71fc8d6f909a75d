//! Configuration types for the container manager
//!
//! `ManagerConfig` is serializable with human-friendly duration fields (plain
//! seconds) so the same file can be shared between the CLI and any hosting
//! service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable read when no engine host is configured
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
const DOCKER_CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";

/// Manager configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Partition of the engine's containers owned by this manager
    pub realm: String,
    /// Port the application listens on inside the container
    pub container_port: u16,
    /// Engine connection settings
    pub docker: DockerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            realm: "remoteapp".to_string(),
            container_port: 8888,
            docker: DockerConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Docker engine connection settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Engine endpoint: `unix:///var/run/docker.sock`, `tcp://host:2376`, ...
    /// Falls back to the ambient `DOCKER_HOST` when unset.
    pub host: Option<String>,
    /// Talk TLS to the engine
    pub tls: bool,
    /// Verify the engine certificate against `tls_ca`
    pub tls_verify: bool,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Request timeout for engine calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl DockerConfig {
    /// The configured endpoint, or the one the ambient environment points at.
    pub fn effective_host(&self) -> Option<String> {
        self.host
            .clone()
            .or_else(|| std::env::var(DOCKER_HOST_ENV).ok())
            .filter(|host| !host.is_empty())
    }

    /// Resolve a TLS file, defaulting to `$DOCKER_CERT_PATH/<file_name>`.
    pub fn tls_file(&self, configured: Option<&PathBuf>, file_name: &str) -> Option<PathBuf> {
        configured.cloned().or_else(|| {
            std::env::var(DOCKER_CERT_PATH_ENV)
                .ok()
                .map(|dir| PathBuf::from(dir).join(file_name))
        })
    }

    pub(crate) fn timeout_secs(&self) -> u64 {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout.as_secs().max(1)
        }
    }
}

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Humantime serde helper
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
