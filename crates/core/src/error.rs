//! Error taxonomy shared across the engine.

use crate::capability::CapabilityKind;
use crate::experiment::Stage;
use std::time::Duration;

/// Registration and lookup failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// A descriptor with the same `(kind, name)` already exists
    #[error("capability already registered: {kind}/{name}")]
    Duplicate {
        /// Kind of the rejected descriptor
        kind: CapabilityKind,
        /// Name of the rejected descriptor
        name: String,
    },

    /// No descriptor under `(kind, name)`
    #[error("capability not found: {kind}/{name}")]
    NotFound {
        /// Kind looked up
        kind: CapabilityKind,
        /// Name looked up
        name: String,
    },

    /// Option defaults failed validation at registration time
    #[error("invalid defaults for {kind}/{name}: {reason}")]
    InvalidDefaults {
        /// Kind of the rejected descriptor
        kind: CapabilityKind,
        /// Name of the rejected descriptor
        name: String,
        /// What the validation rejected
        reason: String,
    },
}

/// Normalized invocation failures.
///
/// Everything a plugin can do wrong is folded into one of these before any
/// other component sees it; a misbehaving collaborator cannot corrupt
/// orchestrator or scheduler state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// The call exceeded its deadline. The underlying call may still be in
    /// flight on the collaborator's side; the wait is abandoned.
    #[error("plugin call timed out after {0:?}")]
    Timeout(Duration),

    /// The implementation returned an error or panicked
    #[error("plugin raised: {0}")]
    Exception(String),

    /// The raw result does not match the output contract for the kind
    #[error("result does not match the {0} contract: {1}")]
    MalformedResult(CapabilityKind, String),

    /// The collaborator signaled rate limiting; the target should back off
    /// rather than be abandoned
    #[error("plugin rate limited")]
    RateLimited {
        /// Collaborator-suggested wait, if any
        retry_after: Option<Duration>,
    },
}

impl InvokeError {
    /// Whether this failure should route to backoff instead of an error
    /// verdict.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// A forward experiment stage failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    /// The stage that failed
    pub stage: Stage,
    /// The normalized invocation failure
    pub source: InvokeError,
}

/// Marker error plugin implementations return (through `anyhow`) to signal
/// upstream rate limiting. The invocation layer downcasts it so the
/// scheduler can apply backoff instead of burying the signal in a generic
/// exception.
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("rate limited by upstream collaborator")]
pub struct RateLimited {
    /// Collaborator-suggested wait, if any
    pub retry_after: Option<Duration>,
}

impl RateLimited {
    /// Rate limited with a suggested wait.
    pub fn with_retry_after(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_routable() {
        let err = InvokeError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.is_rate_limited());
        assert!(!InvokeError::Timeout(Duration::from_secs(30)).is_rate_limited());
    }

    #[test]
    fn marker_survives_anyhow_downcast() {
        let err = anyhow::Error::new(RateLimited::with_retry_after(Duration::from_secs(5)));
        let marker = err.downcast_ref::<RateLimited>().unwrap();
        assert_eq!(marker.retry_after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = StageError {
            stage: Stage::Run,
            source: InvokeError::Exception("boom".to_string()),
        };
        assert!(err.to_string().contains("run stage failed"));
    }
}
