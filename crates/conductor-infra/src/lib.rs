//! Infrastructure layer for Conductor.
//!
//! Contains implementations of the ports defined in `conductor-core`:
//! durable state stores (JSON-lines files, SQLite), SHA-256 checkpoint
//! hashing, data-directory and `config.toml` handling, and the reference
//! capabilities (`echo`, `shell`).

pub mod capability;
pub mod config;
pub mod crypto;
pub mod filesystem;
pub mod store;
