//! SHA-256 content hashing for checkpoint integrity verification.
//!
//! Implements the `ContentHasher` trait from `conductor-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use conductor_core::hash::ContentHasher;

/// SHA-256 implementation of `ContentHasher`.
///
/// Produces the lowercase hex digest stored in every checkpoint's
/// `checksum` field.
pub struct Sha256ContentHasher;

impl Sha256ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha256ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher for Sha256ContentHasher {
    fn compute_hash(&self, content: &str) -> String {
        format!("{:x}", Sha256::digest(content.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_has_known_digest() {
        let hash = Sha256ContentHasher::new().compute_hash("");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_tracks_state_content() {
        let hasher = Sha256ContentHasher::new();
        let state = r#"{"status":"running","completed_steps":{"lint":"completed"}}"#;
        assert_eq!(hasher.compute_hash(state), hasher.compute_hash(state));
        assert_ne!(
            hasher.compute_hash(state),
            hasher.compute_hash(&state.replace("running", "paused"))
        );
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let hash = Sha256ContentHasher::new().compute_hash("checkpoint");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
