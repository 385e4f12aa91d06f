//! Incident tags

use sha2::{Digest, Sha256};

use crate::Info;

/// Deterministic id of one fault episode: SHA-256 over the fault name and the
/// sorted `key:value` pairs of its info
pub fn incident_tag(fault: &str, info: &Info) -> String {
    let mut canonical = fault.to_string();
    for (key, value) in info {
        canonical.push_str(&format!("|{}:{}", key, value));
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
