//! Identifier utilities

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix for session ids synthesized from unattributed messages
pub const DIRECT_SESSION_PREFIX: &str = "direct-";

/// Generate a new UUIDv4 string
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Hex-encoded SHA-256 over the given parts, separated by `\u{1f}`
///
/// The separator keeps `("ab", "c")` and `("a", "bc")` distinct.
pub fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Deterministic session id for a synthesized direct engagement
pub fn direct_session_id(dedupe_key: &str) -> String {
    let hash = digest(&[dedupe_key]);
    format!("{}{}", DIRECT_SESSION_PREFIX, &hash[..16])
}
