//! Capability abstraction: the boundary between the engine and the agents
//! that perform step work.

pub mod box_capability;
pub mod provider;
pub mod registry;

pub use box_capability::BoxCapability;
pub use provider::{Capability, CapabilityRequest};
pub use registry::CapabilityRegistry;
