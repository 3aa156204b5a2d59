//! ContentHasher trait for computing checkpoint checksums.
//!
//! Defined in conductor-core so the checkpoint manager can verify snapshots
//! without coupling to a specific algorithm. The `Sha256ContentHasher`
//! adapter lives in conductor-infra.

/// Abstraction over content hashing for integrity verification.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}
