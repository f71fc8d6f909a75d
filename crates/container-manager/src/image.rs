//! Image value model

use crate::configurables::{self, Configurable, ConfigurableError};
use crate::labels;
use bollard::models::ImageInspect;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Kind of application an image packages. Picks the startup-options schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Desktop application served over VNC
    #[default]
    VncApp,
    /// Application with its own web interface
    WebApp,
}

impl ImageType {
    /// Whether startup options may select configurables for this kind
    pub fn accepts_configurables(self) -> bool {
        match self {
            ImageType::VncApp => true,
            ImageType::WebApp => false,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::VncApp => write!(f, "vncapp"),
            ImageType::WebApp => write!(f, "webapp"),
        }
    }
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vncapp" => Ok(ImageType::VncApp),
            "webapp" => Ok(ImageType::WebApp),
            other => Err(format!("unknown image type '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub engine_id: String,
    pub name: String,
    pub ui_name: String,
    pub icon_128: String,
    pub description: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    /// Environment variables the image accepts (names only)
    pub env: BTreeSet<String>,
    pub configurables: Vec<Configurable>,
}

impl Image {
    /// Build from an engine inspect response of the image called `name`.
    pub fn from_inspect(name: &str, inspect: &ImageInspect) -> Self {
        let empty = HashMap::new();
        let image_labels = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .unwrap_or(&empty);
        let label = |key: &str| image_labels.get(key).cloned().unwrap_or_default();

        let image_type = match image_labels.get(labels::TYPE) {
            None => ImageType::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(image = %name, error = %e, "Falling back to default image type");
                ImageType::default()
            }),
        };

        let env: BTreeSet<String> = image_labels
            .keys()
            .filter_map(|key| labels::env_key(key))
            .collect();

        let ui_name = image_labels
            .get(labels::UI_NAME)
            .filter(|ui_name| !ui_name.is_empty())
            .cloned()
            .unwrap_or_else(|| name.to_string());

        Self {
            engine_id: inspect.id.clone().unwrap_or_default(),
            name: name.to_string(),
            ui_name,
            icon_128: label(labels::ICON_128),
            description: label(labels::DESCRIPTION),
            image_type,
            configurables: configurables::supported(&env),
            env,
        }
    }

    /// Validate caller startup options against this image and translate them
    /// into environment pairs for `start_container`.
    pub fn startup_environment(
        &self,
        options: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, ConfigurableError> {
        let mut env = HashMap::new();

        for (option, value) in options {
            let configurable = Configurable::from_tag(option)
                .ok_or_else(|| ConfigurableError::UnknownOption(option.clone()))?;

            if !self.image_type.accepts_configurables()
                || !self.configurables.contains(&configurable)
            {
                return Err(ConfigurableError::Unsupported {
                    option: option.clone(),
                });
            }

            env.extend(configurable.to_env(value)?);
        }

        Ok(env)
    }
}
