//! Engine logic and storage trait definitions for Conductor.
//!
//! This crate defines the "ports" (`StateStore`, `ContentHasher`,
//! `Capability`) that the infrastructure layer implements. It depends only on
//! `conductor-types` -- never on `conductor-infra` or any database/IO crate.

pub mod capability;
pub mod event;
pub mod hash;
pub mod workflow;
