//! Failure recovery
//!
//! - [`classify_rejection`]: runtime rejection → failure class + remedy
//! - [`RetryPolicy`]: bounded exponential backoff, transient failures only
//! - [`FailureRecovery`]: retry decisions, rollback guidance, statistics

use crate::config::RetryConfig;
use crate::runtime::{RejectionKind, RuntimeRejection};
use hotswap_unit::{
    CodeDigest, FailureClass, RecoveryAction, RedefinitionAttempt, RedefinitionFailureInfo,
    UnitIdentity,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Classify a runtime rejection and recommend a remedy
#[must_use]
pub fn classify_rejection(rejection: &RuntimeRejection) -> RedefinitionFailureInfo {
    let (class, reason, recommended) = match rejection.kind {
        RejectionKind::SchemaChange => (
            FailureClass::Structural,
            "runtime rejected a schema change",
            RecoveryAction::RestartRequired,
        ),
        RejectionKind::Unsupported => (
            FailureClass::Structural,
            "runtime does not support this redefinition",
            RecoveryAction::RejectChange,
        ),
        RejectionKind::NotLoaded => (
            FailureClass::Environmental,
            "unit is not loaded; load or instantiate it first",
            RecoveryAction::ManualIntervention,
        ),
        RejectionKind::ResourceContention => (
            FailureClass::Transient,
            "runtime temporarily unable to redefine",
            RecoveryAction::RetryOperation,
        ),
        RejectionKind::Other => (
            FailureClass::Unknown,
            "runtime rejected the redefinition",
            RecoveryAction::RollbackChanges,
        ),
    };
    RedefinitionFailureInfo::new(class, reason, rejection.detail.clone(), recommended)
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            multiplier: config.multiplier.max(1.0),
            max_delay: config.max_delay(),
        }
    }

    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self::new(&RetryConfig::default().with_max_retries(0))
    }

    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Whether a failure of `class` should be retried after `retries_done`
    #[inline]
    #[must_use]
    pub fn should_retry(&self, class: FailureClass, retries_done: u32) -> bool {
        class.is_retryable() && retries_done < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Try again after `delay`
    Retry { delay: Duration },
    /// Stop and report
    Surface,
}

/// Operator guidance after a rejected redefinition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackGuidance {
    /// Unit that failed to redefine
    pub identity: UnitIdentity,
    /// Digest of the version still running
    pub restore_digest: CodeDigest,
    /// Recommended action
    pub action: RecoveryAction,
    /// Human-readable advice
    pub message: String,
}

/// Recovery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    /// Failed attempts seen
    pub total_failures: u64,
    /// Retries scheduled
    pub retries: u64,
    /// Rollback guidance issued
    pub rollbacks_advised: u64,
    /// Requests short-circuited by an open breaker
    pub degraded_rejections: u64,
    /// Migrations with at least one failed instance
    pub partial_migrations: u64,
}

/// Retry decisions, rollback guidance and statistics
#[derive(Debug, Default)]
pub struct FailureRecovery {
    policy: RetryPolicy,
    stats: Mutex<RecoveryStatistics>,
}

impl FailureRecovery {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Mutex::new(RecoveryStatistics::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide whether a failed attempt is retried
    pub fn decide(&self, failure: &RedefinitionFailureInfo, retries_done: u32) -> RecoveryDecision {
        let mut stats = self.stats.lock();
        stats.total_failures += 1;
        if self.policy.should_retry(failure.class, retries_done) {
            stats.retries += 1;
            let delay = self.policy.delay_for(retries_done + 1);
            debug!(class = ?failure.class, retry = retries_done + 1, ?delay, "scheduling retry");
            RecoveryDecision::Retry { delay }
        } else {
            RecoveryDecision::Surface
        }
    }

    /// Build operator guidance for a failed attempt
    ///
    /// Returns `None` for successful attempts.
    pub fn rollback_guidance(&self, attempt: &RedefinitionAttempt) -> Option<RollbackGuidance> {
        let failure = attempt.failure()?;
        self.stats.lock().rollbacks_advised += 1;
        let message = format!(
            "{} was not redefined ({}): {}. Version {} remains active; {}.",
            attempt.identity(),
            failure.reason,
            if failure.runtime_detail.is_empty() {
                "no runtime detail"
            } else {
                failure.runtime_detail.as_str()
            },
            attempt.old_digest().short(),
            failure.recommended.describe(),
        );
        Some(RollbackGuidance {
            identity: attempt.identity().clone(),
            restore_digest: attempt.old_digest(),
            action: failure.recommended,
            message,
        })
    }

    /// Count a request rejected by the open breaker
    pub fn note_degraded(&self) {
        self.stats.lock().degraded_rejections += 1;
    }

    /// Count a migration with failed instances
    pub fn note_partial_migration(&self) {
        self.stats.lock().partial_migrations += 1;
    }

    #[must_use]
    pub fn statistics(&self) -> RecoveryStatistics {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_unit::{CodeUnit, CompatibilityValidator, PendingAttempt, RequestId, StructuralSignature};
    use std::sync::Arc;

    fn failed_attempt(kind: RejectionKind) -> RedefinitionAttempt {
        let id = UnitIdentity::new("com.acme.Pricing").unwrap();
        let old = Arc::new(CodeUnit::new(id.clone(), StructuralSignature::default(), b"v1".to_vec()));
        let new = Arc::new(CodeUnit::new(id, StructuralSignature::default(), b"v2".to_vec()));
        let change = CompatibilityValidator::default().check(old, new).unwrap();
        PendingAttempt::new(RequestId::new(), &change)
            .fail(classify_rejection(&RuntimeRejection::new(kind, "detail from runtime")))
    }

    #[test]
    fn classification_table() {
        let schema = classify_rejection(&RuntimeRejection::new(RejectionKind::SchemaChange, "x"));
        assert_eq!(schema.class, FailureClass::Structural);
        assert_eq!(schema.recommended, RecoveryAction::RestartRequired);

        let busy = classify_rejection(&RuntimeRejection::new(RejectionKind::ResourceContention, "x"));
        assert_eq!(busy.class, FailureClass::Transient);
        assert_eq!(busy.recommended, RecoveryAction::RetryOperation);

        let missing = classify_rejection(&RuntimeRejection::new(RejectionKind::NotLoaded, "x"));
        assert_eq!(missing.class, FailureClass::Environmental);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(20), Duration::from_secs(5));
    }

    #[test]
    fn only_transient_failures_retry() {
        let recovery = FailureRecovery::new(RetryPolicy::default());
        let busy = classify_rejection(&RuntimeRejection::new(RejectionKind::ResourceContention, ""));
        let schema = classify_rejection(&RuntimeRejection::new(RejectionKind::SchemaChange, ""));

        assert!(matches!(recovery.decide(&busy, 0), RecoveryDecision::Retry { .. }));
        assert_eq!(recovery.decide(&busy, 3), RecoveryDecision::Surface);
        assert_eq!(recovery.decide(&schema, 0), RecoveryDecision::Surface);

        let stats = recovery.statistics();
        assert_eq!((stats.total_failures, stats.retries), (3, 1));
    }

    #[test]
    fn guidance_names_version_to_keep() {
        let recovery = FailureRecovery::default();
        let attempt = failed_attempt(RejectionKind::SchemaChange);
        let guidance = recovery.rollback_guidance(&attempt).unwrap();

        assert_eq!(guidance.restore_digest, attempt.old_digest());
        assert_eq!(guidance.action, RecoveryAction::RestartRequired);
        assert!(guidance.message.contains("com.acme.Pricing"));
        assert!(guidance.message.contains("restart the application"));
        assert_eq!(recovery.statistics().rollbacks_advised, 1);
    }
}
