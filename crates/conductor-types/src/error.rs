//! Error taxonomy shared by the engine, the state store and capabilities.
//!
//! Categories classify *what kind* of failure happened; whether it is retried
//! is decided from the category plus the capability's own hint.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure category of a step, capability or workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad or missing settings. Requires a user fix.
    Configuration,
    /// Malformed definition or inputs.
    Validation,
    /// The capability's downstream service is unavailable.
    ExternalDependency,
    /// The capability ran and failed on its own logic.
    Execution,
    /// Filesystem or access-control denial.
    Permission,
    /// A step or the workflow ran out of time.
    Timeout,
}

impl ErrorCategory {
    /// Categories that are the caller's fault and are never retried.
    pub fn is_always_fatal(self) -> bool {
        matches!(
            self,
            ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Permission
        )
    }

    /// Recoverability when the capability gives no hint.
    pub fn default_recoverable(self) -> bool {
        matches!(self, ErrorCategory::ExternalDependency | ErrorCategory::Timeout)
    }

    /// Whether a failure of this category counts against a circuit breaker.
    pub fn counts_against_breaker(self) -> bool {
        matches!(
            self,
            ErrorCategory::ExternalDependency | ErrorCategory::Timeout | ErrorCategory::Execution
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Validation => "validation",
            ErrorCategory::ExternalDependency => "external_dependency",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// A classified failure as recorded in events and workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub message: String,
    /// Whether a later attempt (or a resume) may succeed.
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// What the user can do about it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorInfo {
    /// Build an error whose recoverability follows the category default.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            recoverable: category.default_recoverable(),
            step_id: None,
            remediation: None,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable && !self.category.is_always_fatal();
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(step) = &self.step_id {
            write!(f, "step '{step}': ")?;
        }
        write!(
            f,
            "{} ({}, {})",
            self.message,
            self.category,
            if self.recoverable { "recoverable" } else { "not recoverable" }
        )
    }
}

/// Error returned by a capability invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct CapabilityError {
    pub category: ErrorCategory,
    pub message: String,
    /// Capability-supplied retry hint. Ignored for caller-fault categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl CapabilityError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: None,
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ExternalDependency, message)
    }

    pub fn execution(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            category: ErrorCategory::Execution,
            message: message.into(),
            retryable: Some(retryable),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permission, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Whether this failure may succeed on a later attempt.
    pub fn is_recoverable(&self) -> bool {
        if self.category.is_always_fatal() {
            return false;
        }
        self.retryable
            .unwrap_or_else(|| self.category.default_recoverable())
    }

    /// Convert into the recorded form, attributed to `step_id`.
    pub fn into_info(self, step_id: &str) -> ErrorInfo {
        let recoverable = self.is_recoverable();
        ErrorInfo {
            category: self.category,
            message: self.message,
            recoverable,
            step_id: Some(step_id.to_string()),
            remediation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_fault_categories_never_recoverable() {
        for category in [
            ErrorCategory::Configuration,
            ErrorCategory::Validation,
            ErrorCategory::Permission,
        ] {
            let err = CapabilityError {
                category,
                message: "nope".into(),
                retryable: Some(true),
            };
            assert!(!err.is_recoverable(), "{category} must never be retried");
        }
    }

    #[test]
    fn execution_follows_capability_hint() {
        assert!(CapabilityError::execution("flaky", true).is_recoverable());
        assert!(!CapabilityError::execution("bad input", false).is_recoverable());
        assert!(!CapabilityError::new(ErrorCategory::Execution, "no hint").is_recoverable());
    }

    #[test]
    fn external_and_timeout_default_recoverable() {
        assert!(CapabilityError::external("503").is_recoverable());
        assert!(CapabilityError::timeout("slow").is_recoverable());
        let mut err = CapabilityError::external("gone for good");
        err.retryable = Some(false);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::ExternalDependency).unwrap();
        assert_eq!(json, "\"external_dependency\"");
        assert_eq!(ErrorCategory::ExternalDependency.to_string(), "external_dependency");
    }

    #[test]
    fn error_info_display_names_step_and_category() {
        let info = CapabilityError::permission("cannot write /etc").into_info("deploy");
        let text = info.to_string();
        assert!(text.contains("step 'deploy'"));
        assert!(text.contains("permission"));
        assert!(text.contains("not recoverable"));
    }

    #[test]
    fn recoverable_builder_respects_fatal_categories() {
        let info = ErrorInfo::new(ErrorCategory::Validation, "bad").recoverable(true);
        assert!(!info.recoverable);
        let info = ErrorInfo::new(ErrorCategory::Execution, "flaky").recoverable(true);
        assert!(info.recoverable);
    }
}
