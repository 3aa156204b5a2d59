//! Workflow engine core: validation, DAG scheduling, and durable state.
//!
//! - `schema` -- strict validation of raw definition documents
//! - `definition` -- YAML/JSON parsing and file loading
//! - `dag` -- dependency graph, ready sets, waves, blocked diagnosis
//! - `settings` -- workflow settings layered over engine config
//! - `plan` -- execution plan artifact and text rendering
//! - `context` -- step input templates and artifact size limits
//! - `retry` -- retry decisions and backoff
//! - `circuit_breaker` -- per-agent breakers
//! - `state` -- the event reducer
//! - `migration` -- checkpoint format upgrades
//! - `store` -- `StateStore` port and the in-memory store
//! - `checkpoint` -- checkpoint manager and the writable journal
//! - `step_runner` -- one step through breaker, timeout and retries
//! - `parallel` -- bounded parallel batches
//! - `executor` -- the ready-set loop, resume and pause

pub mod checkpoint;
pub mod circuit_breaker;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod migration;
pub mod parallel;
pub mod plan;
pub mod retry;
pub mod schema;
pub mod settings;
pub mod state;
pub mod step_runner;
pub mod store;
