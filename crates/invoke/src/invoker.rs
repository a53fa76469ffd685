//! Uniform plugin invocation.
//!
//! The invoker is the only place the core touches a collaborator's call
//! semantics. Every fault mode a plugin has — panic, hang, rate limit,
//! garbage output — is normalized to an `InvokeError` here, so a
//! misbehaving plugin can never corrupt orchestrator or scheduler state.

use crate::validate::validate_output;
use adaptune_core::{
    CapabilityDescriptor, InvokeError, PluginCall, PluginOutput, RateLimited,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the invocation layer.
#[derive(Debug, Clone, Copy)]
pub struct InvokerConfig {
    /// Deadline for a single plugin call
    pub call_timeout: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl InvokerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Calls registered plugins under a uniform success/failure contract.
pub struct Invoker {
    config: InvokerConfig,
}

impl Invoker {
    /// Create an invoker with the default configuration.
    pub fn new() -> Self {
        Self {
            config: InvokerConfig::default(),
        }
    }

    /// Create an invoker with the given configuration.
    pub fn with_config(config: InvokerConfig) -> Self {
        Self { config }
    }

    /// The configured per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    /// Invoke a plugin with the configured timeout.
    pub async fn invoke(
        &self,
        descriptor: &CapabilityDescriptor,
        call: PluginCall,
    ) -> Result<PluginOutput, InvokeError> {
        self.invoke_with_timeout(descriptor, call, self.config.call_timeout)
            .await
    }

    /// Invoke a plugin with an explicit timeout.
    ///
    /// The plugin call runs on its own task: a panic is caught at the join
    /// boundary, and on timeout the wait is abandoned — the underlying call
    /// may still be in flight on the collaborator's side, cancellation is
    /// not assumed to propagate.
    pub async fn invoke_with_timeout(
        &self,
        descriptor: &CapabilityDescriptor,
        call: PluginCall,
        timeout: Duration,
    ) -> Result<PluginOutput, InvokeError> {
        if call.kind() != descriptor.kind {
            return Err(InvokeError::Exception(format!(
                "{} call addressed to {} capability {}",
                call.kind(),
                descriptor.kind,
                descriptor.name
            )));
        }

        debug!(
            "Invoking {}/{} for {}",
            descriptor.kind,
            descriptor.name,
            call.target()
        );

        let handle = descriptor.handle.clone();
        let validated_against = call.clone();
        let task = tokio::spawn(async move { handle.call(call).await });

        let joined = match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Call to {}/{} timed out after {:?}, abandoning wait",
                    descriptor.kind, descriptor.name, timeout
                );
                return Err(InvokeError::Timeout(timeout));
            }
        };

        let result = match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let detail = panic_message(join_err.into_panic());
                warn!(
                    "Plugin {}/{} panicked: {}",
                    descriptor.kind, descriptor.name, detail
                );
                return Err(InvokeError::Exception(detail));
            }
            Err(_) => {
                return Err(InvokeError::Exception("plugin task was cancelled".to_string()));
            }
        };

        match result {
            Ok(value) => validate_output(&validated_against, value),
            Err(err) => match err.downcast_ref::<RateLimited>() {
                Some(marker) => Err(InvokeError::RateLimited {
                    retry_after: marker.retry_after,
                }),
                None => Err(InvokeError::Exception(format!("{err:#}"))),
            },
        }
    }
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}
