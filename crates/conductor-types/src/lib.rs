//! Shared domain types for Conductor.
//!
//! Workflow definitions, execution state, events, checkpoints, the execution
//! plan, the error taxonomy and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror, schemars.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod plan;
pub mod state;
pub mod workflow;
