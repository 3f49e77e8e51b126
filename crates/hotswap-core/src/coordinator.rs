//! Redefinition coordinator
//!
//! Drives a single redefinition through the [`HostRuntime`]. Takes a
//! [`ValidatedChange`], so an incompatible pair can never reach the runtime.
//! The blocking runtime call runs on the blocking pool; its outcome is
//! classified and recorded as an immutable [`RedefinitionAttempt`].
//!
//! The coordinator never retries and never touches instance state. On success
//! it only asks the registry how many live instances exist.

use crate::recovery::classify_rejection;
use crate::runtime::HostRuntime;
use hotswap_instances::InstanceRegistry;
use hotswap_unit::{
    FailureClass, PendingAttempt, RecoveryAction, RedefinitionAttempt, RedefinitionFailureInfo,
    RequestId, ValidatedChange,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{info, warn};

/// Runs redefinitions against the host runtime
#[derive(Clone)]
pub struct RedefinitionCoordinator {
    runtime: Arc<dyn HostRuntime>,
    registry: Arc<InstanceRegistry>,
    call_timeout: Option<Duration>,
}

impl RedefinitionCoordinator {
    #[must_use]
    pub fn new(runtime: Arc<dyn HostRuntime>, registry: Arc<InstanceRegistry>) -> Self {
        Self {
            runtime,
            registry,
            call_timeout: None,
        }
    }

    /// Bound the wait for the runtime's answer
    ///
    /// A call that exceeds the bound keeps running on the blocking pool; the
    /// attempt is recorded as failed with an unknown outcome.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Submit the new bytes of `change` to the runtime
    pub async fn redefine(&self, request_id: RequestId, change: &ValidatedChange) -> RedefinitionAttempt {
        let pending = PendingAttempt::new(request_id, change);
        let identity = change.identity().clone();
        let bytes = change.new_unit().shared_bytes();
        let runtime = Arc::clone(&self.runtime);
        let target = identity.clone();
        let call = tokio::task::spawn_blocking(move || runtime.redefine(&target, &bytes));

        let result = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => flatten(joined),
                Err(_) => Err(RedefinitionFailureInfo::new(
                    FailureClass::Unknown,
                    format!("runtime call exceeded {limit:?}; outcome unknown"),
                    "",
                    RecoveryAction::ManualIntervention,
                )),
            },
            None => flatten(call.await),
        };

        let attempt = match result {
            Ok(()) => {
                let discovered = self.registry.count(&identity);
                pending.succeed(discovered)
            }
            Err(failure) => pending.fail(failure),
        };

        let elapsed_ms = u64::try_from(attempt.elapsed().as_millis()).unwrap_or(u64::MAX);
        match attempt.failure() {
            None => info!(
                %identity,
                attempt = %attempt.id(),
                elapsed_ms,
                instances = attempt.instances_discovered().unwrap_or(0),
                "redefinition accepted"
            ),
            Some(failure) => {
                metrics::counter!("hotswap_redefinition_failures_total").increment(1);
                warn!(
                    %identity,
                    attempt = %attempt.id(),
                    elapsed_ms,
                    class = ?failure.class,
                    detail = %failure.runtime_detail,
                    "redefinition rejected"
                );
            }
        }
        attempt
    }
}

fn flatten(
    joined: Result<Result<(), crate::runtime::RuntimeRejection>, JoinError>,
) -> Result<(), RedefinitionFailureInfo> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(rejection)) => Err(classify_rejection(&rejection)),
        Err(error) => {
            let detail = if error.is_panic() {
                panic_detail(error.into_panic())
            } else {
                "runtime call was cancelled".to_string()
            };
            Err(RedefinitionFailureInfo::new(
                FailureClass::Unknown,
                "runtime call aborted",
                detail,
                RecoveryAction::ManualIntervention,
            ))
        }
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast::<String>()
        .map(|s| *s)
        .or_else(|payload| payload.downcast::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|_| "runtime call panicked".to_string())
}

impl fmt::Debug for RedefinitionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedefinitionCoordinator")
            .field("registry", &self.registry)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}
