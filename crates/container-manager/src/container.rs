//! Container value model
//!
//! A `Container` is a snapshot built from the engine's current state on every
//! lookup or start. Nothing caches it; a fresh lookup replaces it.

use crate::labels;
use bollard::models::ContainerSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Engine-assigned container id
    pub engine_id: String,
    pub name: String,
    pub image_name: String,
    pub image_id: String,
    /// Address the container is reachable at
    pub ip: String,
    pub port: Option<u16>,
    /// Routable identifier used in the public URL
    pub url_id: String,
    /// Public path the reverse proxy routes to this container
    pub urlpath: String,
    /// Grant this instance satisfies
    pub mapping_id: String,
    pub user_name: String,
    pub realm: String,
}

impl Container {
    /// Build from a list entry. The endpoint is left unresolved.
    pub fn from_summary(summary: &ContainerSummary) -> Self {
        let empty = HashMap::new();
        let labels = summary.labels.as_ref().unwrap_or(&empty);
        let label = |key: &str| labels.get(key).cloned().unwrap_or_default();

        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default();

        Self {
            engine_id: summary.id.clone().unwrap_or_default(),
            name,
            image_name: summary.image.clone().unwrap_or_default(),
            image_id: summary.image_id.clone().unwrap_or_default(),
            ip: String::new(),
            port: None,
            url_id: label(labels::URL_ID),
            urlpath: label(labels::URLPATH),
            mapping_id: label(labels::MAPPING_ID),
            user_name: label(labels::USER),
            realm: label(labels::REALM),
        }
    }

    /// Path relative to the user's base URL, `containers/{url_id}`
    pub fn relative_url(&self) -> String {
        format!("containers/{}", self.url_id)
    }

    /// URL the reverse proxy forwards to
    pub fn host_url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.ip, port),
            None => format!("http://{}", self.ip),
        }
    }
}
