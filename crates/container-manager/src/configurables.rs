//! Startup options an image can opt into
//!
//! An image supports a configurable when it declares every environment
//! variable the configurable writes. Callers pass options keyed by the
//! configurable's tag and get back the environment to start the container with.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Configurable {
    /// Screen size of a VNC desktop, given as `WIDTHxHEIGHT`
    Resolution,
}

/// Every configurable known to the manager
pub const ALL: &[Configurable] = &[Configurable::Resolution];

const X11_DEPTH: &str = "16";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurableError {
    #[error("Unknown startup option: {0}")]
    UnknownOption(String),

    #[error("Startup option {option} is not supported by this image")]
    Unsupported { option: String },

    #[error("Invalid value for {option}: {value}")]
    InvalidValue { option: String, value: String },
}

impl Configurable {
    pub fn tag(self) -> &'static str {
        match self {
            Configurable::Resolution => "resolution",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        ALL.iter().copied().find(|c| c.tag() == tag)
    }

    /// Environment variables the image must declare
    pub fn required_env(self) -> &'static [&'static str] {
        match self {
            Configurable::Resolution => &["X11_WIDTH", "X11_HEIGHT", "X11_DEPTH"],
        }
    }

    pub fn supported_by(self, declared_env: &BTreeSet<String>) -> bool {
        self.required_env()
            .iter()
            .all(|key| declared_env.contains(*key))
    }

    /// Translate a validated option value to environment pairs.
    pub fn to_env(self, value: &str) -> Result<HashMap<String, String>, ConfigurableError> {
        match self {
            Configurable::Resolution => {
                let invalid = || ConfigurableError::InvalidValue {
                    option: self.tag().to_string(),
                    value: value.to_string(),
                };
                let (width, height) = value.split_once('x').ok_or_else(invalid)?;
                let width: u32 = width.parse().map_err(|_| invalid())?;
                let height: u32 = height.parse().map_err(|_| invalid())?;
                if width == 0 || height == 0 {
                    return Err(invalid());
                }

                let mut env = HashMap::new();
                env.insert("X11_WIDTH".to_string(), width.to_string());
                env.insert("X11_HEIGHT".to_string(), height.to_string());
                env.insert("X11_DEPTH".to_string(), X11_DEPTH.to_string());
                Ok(env)
            }
        }
    }
}

impl fmt::Display for Configurable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Configurables whose required variables all appear in `declared_env`.
pub fn supported(declared_env: &BTreeSet<String>) -> Vec<Configurable> {
    ALL.iter()
        .copied()
        .filter(|c| c.supported_by(declared_env))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_resolution_requires_all_keys() {
        assert_eq!(
            supported(&env(&["X11_WIDTH", "X11_HEIGHT", "X11_DEPTH"])),
            vec![Configurable::Resolution]
        );
        assert!(supported(&env(&["X11_WIDTH", "X11_HEIGHT"])).is_empty());
        assert!(supported(&env(&[])).is_empty());
    }

    #[test]
    fn test_resolution_to_env() {
        let env = Configurable::Resolution
            .to_env("1920x1080")
            .expect("valid resolution");
        assert_eq!(env["X11_WIDTH"], "1920");
        assert_eq!(env["X11_HEIGHT"], "1080");
        assert_eq!(env["X11_DEPTH"], "16");
    }

    #[test]
    fn test_resolution_rejects_malformed_values() {
        for value in ["1920", "x1080", "1920x", "0x1080", "axb", "1920x1080x24"] {
            let err = Configurable::Resolution.to_env(value).expect_err(value);
            assert!(matches!(err, ConfigurableError::InvalidValue { .. }));
        }
    }

    #[test]
    fn test_tag_round_trip() {
        assert_eq!(
            Configurable::from_tag("resolution"),
            Some(Configurable::Resolution)
        );
        assert_eq!(Configurable::from_tag("dpi"), None);
        assert_eq!(Configurable::Resolution.to_string(), "resolution");
    }
}
