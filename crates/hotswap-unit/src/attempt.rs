//! Redefinition attempt records
//!
//! A [`PendingAttempt`] is opened when the host runtime is about to be asked to
//! redefine a unit. It is consumed exactly once, by [`PendingAttempt::succeed`]
//! or [`PendingAttempt::fail`], into an immutable [`RedefinitionAttempt`].

use crate::hash::CodeDigest;
use crate::identity::UnitIdentity;
use crate::verdict::{ChangeScope, ValidatedChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};
use ulid::Ulid;

/// Hot-swap request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Fresh identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Underlying ULID
    #[inline]
    #[must_use]
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Redefinition attempt identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttemptId(Ulid);

impl AttemptId {
    /// Fresh identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Underlying ULID
    #[inline]
    #[must_use]
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "att-{}", self.0)
    }
}

/// Coarse failure classification, drives retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// May succeed if retried (resource contention, timeout)
    Transient,
    /// The change itself is unacceptable to the runtime
    Structural,
    /// The runtime is not in a state to accept it (unit not loaded)
    Environmental,
    /// Unclassified
    Unknown,
}

impl FailureClass {
    /// Whether retrying can help
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Action recommended after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Restart the host process to pick up the change
    RestartRequired,
    /// Restore the previous code bytes
    RollbackChanges,
    /// Retry the same operation
    RetryOperation,
    /// Drop the change, keep running the old code
    RejectChange,
    /// Keep current state untouched
    PreserveCurrentState,
    /// Continue with reduced functionality
    FallbackMode,
    /// An operator has to look at it
    ManualIntervention,
    /// Nothing to do
    NoAction,
}

impl RecoveryAction {
    /// Whether an operator should be alerted right away
    #[inline]
    #[must_use]
    pub fn requires_immediate_attention(self) -> bool {
        matches!(self, Self::RestartRequired | Self::ManualIntervention)
    }

    /// Whether carrying out the action changes running state
    #[inline]
    #[must_use]
    pub fn modifies_state(self) -> bool {
        matches!(
            self,
            Self::RestartRequired | Self::RollbackChanges | Self::RetryOperation | Self::FallbackMode
        )
    }

    /// Short operator-facing description
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::RestartRequired => "restart the application to apply this change",
            Self::RollbackChanges => "roll back to the previous version",
            Self::RetryOperation => "retry the redefinition",
            Self::RejectChange => "use compatible changes or restart",
            Self::PreserveCurrentState => "keep the current version",
            Self::FallbackMode => "continue in fallback mode",
            Self::ManualIntervention => "manual intervention required",
            Self::NoAction => "no action needed",
        }
    }
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Why a redefinition failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedefinitionFailureInfo {
    /// Classification
    pub class: FailureClass,
    /// Summary reason
    pub reason: String,
    /// Raw rejection detail from the runtime
    pub runtime_detail: String,
    /// Recommended remedy
    pub recommended: RecoveryAction,
}

impl RedefinitionFailureInfo {
    /// Create failure info
    #[must_use]
    pub fn new(
        class: FailureClass,
        reason: impl Into<String>,
        runtime_detail: impl Into<String>,
        recommended: RecoveryAction,
    ) -> Self {
        Self {
            class,
            reason: reason.into(),
            runtime_detail: runtime_detail.into(),
            recommended,
        }
    }
}

/// Terminal outcome of an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    /// Runtime accepted the new bytes
    Succeeded {
        /// Live instances found by the registry query
        instances_discovered: usize,
    },
    /// Runtime rejected the new bytes
    Failed(RedefinitionFailureInfo),
}

/// An attempt that has been started but not finalized
#[derive(Debug)]
pub struct PendingAttempt {
    id: AttemptId,
    request_id: RequestId,
    identity: UnitIdentity,
    old_digest: CodeDigest,
    new_digest: CodeDigest,
    scope: ChangeScope,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl PendingAttempt {
    /// Open an attempt for a validated change
    #[must_use]
    pub fn new(request_id: RequestId, change: &ValidatedChange) -> Self {
        Self {
            id: AttemptId::new(),
            request_id,
            identity: change.identity().clone(),
            old_digest: change.old().digest(),
            new_digest: change.new_unit().digest(),
            scope: change.scope().clone(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Attempt id
    #[inline]
    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Unit being redefined
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// Finalize as succeeded
    #[must_use]
    pub fn succeed(self, instances_discovered: usize) -> RedefinitionAttempt {
        self.finish(AttemptOutcome::Succeeded {
            instances_discovered,
        })
    }

    /// Finalize as failed
    #[must_use]
    pub fn fail(self, failure: RedefinitionFailureInfo) -> RedefinitionAttempt {
        self.finish(AttemptOutcome::Failed(failure))
    }

    fn finish(self, outcome: AttemptOutcome) -> RedefinitionAttempt {
        RedefinitionAttempt {
            id: self.id,
            request_id: self.request_id,
            identity: self.identity,
            old_digest: self.old_digest,
            new_digest: self.new_digest,
            scope: self.scope,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.started.elapsed(),
            outcome,
        }
    }
}

/// Finalized, immutable redefinition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedefinitionAttempt {
    id: AttemptId,
    request_id: RequestId,
    identity: UnitIdentity,
    old_digest: CodeDigest,
    new_digest: CodeDigest,
    scope: ChangeScope,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    elapsed: Duration,
    outcome: AttemptOutcome,
}

impl RedefinitionAttempt {
    #[inline]
    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    #[inline]
    #[must_use]
    pub fn old_digest(&self) -> CodeDigest {
        self.old_digest
    }

    #[inline]
    #[must_use]
    pub fn new_digest(&self) -> CodeDigest {
        self.new_digest
    }

    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ChangeScope {
        &self.scope
    }

    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[inline]
    #[must_use]
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Wall time spent between open and finalize
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    #[must_use]
    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded { .. })
    }

    /// Failure detail, if the attempt failed
    #[must_use]
    pub fn failure(&self) -> Option<&RedefinitionFailureInfo> {
        match &self.outcome {
            AttemptOutcome::Failed(info) => Some(info),
            AttemptOutcome::Succeeded { .. } => None,
        }
    }

    /// Instances discovered on success
    #[must_use]
    pub fn instances_discovered(&self) -> Option<usize> {
        match self.outcome {
            AttemptOutcome::Succeeded {
                instances_discovered,
            } => Some(instances_discovered),
            AttemptOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::StructuralSignature;
    use crate::unit::CodeUnit;
    use crate::validator::CompatibilityValidator;
    use std::sync::Arc;

    fn change() -> ValidatedChange {
        let id = UnitIdentity::new("com.acme.Greeter").unwrap();
        let old = Arc::new(CodeUnit::new(id.clone(), StructuralSignature::default(), b"a".to_vec()));
        let new = Arc::new(CodeUnit::new(id, StructuralSignature::default(), b"b".to_vec()));
        CompatibilityValidator::default().check(old, new).unwrap()
    }

    #[test]
    fn pending_attempt_finalizes_success() {
        let change = change();
        let request = RequestId::new();
        let pending = PendingAttempt::new(request, &change);
        let id = pending.id();

        let attempt = pending.succeed(4);
        assert_eq!(attempt.id(), id);
        assert_eq!(attempt.request_id(), request);
        assert!(attempt.is_success());
        assert_eq!(attempt.instances_discovered(), Some(4));
        assert_eq!(attempt.new_digest(), change.new_unit().digest());
        assert!(attempt.finished_at() >= attempt.started_at());
    }

    #[test]
    fn pending_attempt_finalizes_failure() {
        let attempt = PendingAttempt::new(RequestId::new(), &change()).fail(
            RedefinitionFailureInfo::new(
                FailureClass::Structural,
                "schema change rejected",
                "attempted to add a field",
                RecoveryAction::RestartRequired,
            ),
        );
        assert!(!attempt.is_success());
        assert_eq!(attempt.instances_discovered(), None);
        let failure = attempt.failure().unwrap();
        assert_eq!(failure.class, FailureClass::Structural);
        assert!(failure.recommended.requires_immediate_attention());
    }

    #[test]
    fn recovery_action_flags() {
        assert!(RecoveryAction::RollbackChanges.modifies_state());
        assert!(!RecoveryAction::PreserveCurrentState.modifies_state());
        assert!(!RecoveryAction::RetryOperation.requires_immediate_attention());
        assert!(FailureClass::Transient.is_retryable());
        assert!(!FailureClass::Structural.is_retryable());
    }

    #[test]
    fn attempt_serializes_outcome_tag() {
        let attempt = PendingAttempt::new(RequestId::new(), &change()).succeed(0);
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["outcome"]["outcome"], "SUCCEEDED");
        assert_eq!(json["identity"], "com.acme.Greeter");
    }
}
