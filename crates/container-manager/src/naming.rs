//! Container naming
//!
//! Names only help a human reading `docker ps`. Ownership is always read back
//! from labels, never parsed out of a name.

use rand::distributions::Uniform;
use rand::Rng;

/// Marker introducing an escaped byte
pub const ESCAPE_CHAR: char = '_';

/// Length of the random suffix appended to every container name
pub const SUFFIX_LEN: usize = 10;

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

/// Escape `raw` to letters, digits, `-` and `.`. Every other character is
/// replaced by `_XX` for each byte of its UTF-8 encoding.
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    let mut buf = [0u8; 4];
    for c in raw.chars() {
        if is_safe(c) {
            escaped.push(c);
        } else {
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push(ESCAPE_CHAR);
                escaped.push_str(&format!("{:02X}", byte));
            }
        }
    }
    escaped
}

/// `{realm}-{user}-{mapping_id}-`, each part escaped independently.
pub fn container_name_prefix(realm: &str, user_name: &str, mapping_id: &str) -> String {
    format!(
        "{}-{}-{}-",
        escape(realm),
        escape(user_name),
        escape(mapping_id)
    )
}

/// Fresh container name for one start of a mapping.
pub fn container_name(realm: &str, user_name: &str, mapping_id: &str) -> String {
    format!(
        "{}{}",
        container_name_prefix(realm, user_name, mapping_id),
        random_suffix()
    )
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'a', b'z'))
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Opaque identifier for the public URL of a container. It is chosen before
/// the container exists, so it cannot be the engine id.
pub fn new_url_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}
