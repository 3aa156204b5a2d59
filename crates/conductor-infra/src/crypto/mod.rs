//! Cryptographic operations for Conductor.
//!
//! - `hash`: SHA-256 content hashing for checkpoint checksums

pub mod hash;

pub use hash::Sha256ContentHasher;
