// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sha2::{Digest, Sha256};

/// Generate a session/asset id: SHA-256 of the millisecond timestamp,
/// first 10 bytes, hex-encoded (20 characters).
///
/// Two calls within the same millisecond produce the same digest; callers
/// tolerate that (ids are scoped per session, and the store only needs
/// filename uniqueness).
pub fn new_id() -> String {
    id_for_millis(now_millis())
}

/// Memory ids carry their creation time plus a random suffix so that two
/// memories created in the same millisecond stay distinct.
pub fn new_memory_id() -> String {
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("mem_{}_{}", now_millis(), &rand[..8])
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn id_for_millis(millis: u64) -> String {
    let digest = Sha256::digest(millis.to_string().as_bytes());
    hex::encode(&digest[..10])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_twenty_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn id_is_deterministic_per_millisecond() {
        assert_eq!(id_for_millis(1700000000000), id_for_millis(1700000000000));
        assert_ne!(id_for_millis(1700000000000), id_for_millis(1700000000001));
    }

    #[test]
    fn memory_id_has_expected_shape() {
        let id = new_memory_id();
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "mem");
        assert!(parts[1].parse::<u64>().is_ok(), "millis segment: {id}");
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn memory_ids_are_unique_within_a_millisecond() {
        assert_ne!(new_memory_id(), new_memory_id());
    }
}
