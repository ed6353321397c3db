//! Hash & ID service: deterministic content hashing and opaque UUID minting
//! (spec.md §2). Adapted from the teacher's `storage::calculate_hash`, which
//! returns raw hex — this crate prefixes the algorithm name as spec.md §3.1
//! requires for `content_hash`/`file_hash`.

use sha2::{Digest, Sha256};

/// SHA-256 content hash, `sha256:`-prefixed.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_prefixed() {
        let hash = content_hash(b"hello world");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), "sha256:".len() + 64);
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
