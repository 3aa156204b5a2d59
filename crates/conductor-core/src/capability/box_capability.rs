//! BoxCapability -- object-safe dynamic dispatch wrapper for Capability.
//!
//! 1. `CapabilityDyn` is the object-safe form with a boxed future
//! 2. Blanket-impl `CapabilityDyn` for all `T: Capability`
//! 3. `BoxCapability` wraps `Box<dyn CapabilityDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use conductor_types::capability::CapabilityOutput;
use conductor_types::error::CapabilityError;

use super::provider::{Capability, CapabilityRequest};

/// Object-safe version of [`Capability`] with a boxed future.
pub trait CapabilityDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        request: &'a CapabilityRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CapabilityOutput, CapabilityError>> + Send + 'a>>;
}

impl<T: Capability> CapabilityDyn for T {
    fn name(&self) -> &str {
        Capability::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        request: &'a CapabilityRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CapabilityOutput, CapabilityError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased capability for runtime registration.
pub struct BoxCapability {
    inner: Box<dyn CapabilityDyn + Send + Sync>,
}

impl BoxCapability {
    pub fn new<T: Capability + 'static>(capability: T) -> Self {
        Self {
            inner: Box::new(capability),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput, CapabilityError> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCapability")
            .field("name", &self.name())
            .finish()
    }
}
