//! Label namespace
//!
//! Labels are the only durable ownership record for a managed container. They
//! are written once at creation time and read back on every lookup, so a
//! restarted manager rediscovers its containers without any local state.

/// Reverse-DNS prefix shared by every key below
pub const NAMESPACE: &str = "org.remoteapp.docker";

// Container-side labels
pub const USER: &str = "org.remoteapp.docker.user";
pub const MAPPING_ID: &str = "org.remoteapp.docker.mapping_id";
pub const URL_ID: &str = "org.remoteapp.docker.url_id";
pub const URLPATH: &str = "org.remoteapp.docker.urlpath";
pub const REALM: &str = "org.remoteapp.docker.realm";

// Image-side labels
pub const UI_NAME: &str = "org.remoteapp.docker.ui_name";
pub const ICON_128: &str = "org.remoteapp.docker.icon_128";
pub const DESCRIPTION: &str = "org.remoteapp.docker.description";
pub const TYPE: &str = "org.remoteapp.docker.type";

/// Prefix of the sub-namespace enumerating environment variables an image
/// accepts, e.g. `org.remoteapp.docker.env.x11_width`.
pub const ENV_PREFIX: &str = "org.remoteapp.docker.env.";

/// Render a `key=value` filter for the engine's label filter syntax.
pub fn filter(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Strip the env sub-namespace from a label key, returning the variable name
/// upper-cased. Returns `None` for keys outside the sub-namespace.
pub fn env_key(label: &str) -> Option<String> {
    label
        .strip_prefix(ENV_PREFIX)
        .filter(|key| !key.is_empty())
        .map(|key| key.to_uppercase())
}
