//! Post-redefinition instance migration
//!
//! Brings every live instance of a redefined unit up to date using the
//! strategy chosen by [`StrategySelector`]. Migration is best-effort: a failing
//! or panicking callback marks that one instance FAILED and the batch goes on.

use crate::hooks::{ExternalRefresher, HookError, MigrationHooks, PostUpdateHook};
use crate::registry::{InstanceHandle, InstanceRegistry, Tracked, TrackedInstance};
use crate::status::InstanceStatus;
use crate::strategy::{StrategySelector, UpdateStrategy};
use hotswap_unit::{AttemptId, RedefinitionAttempt, UnitIdentity};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Migration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    /// Instances are only touched after a successful redefinition
    #[error("attempt {attempt} did not succeed; instances left untouched")]
    AttemptNotSucceeded { attempt: AttemptId },
}

/// One instance that could not be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFailure {
    /// Registry handle of the instance
    pub handle: InstanceHandle,
    /// Concrete type of the instance
    pub type_name: String,
    /// What went wrong
    pub error: String,
}

/// Outcome of migrating one attempt's instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    attempt_id: AttemptId,
    identity: UnitIdentity,
    strategy: UpdateStrategy,
    updated: usize,
    failed: usize,
    skipped: usize,
    failures: Vec<InstanceFailure>,
    elapsed: Duration,
}

impl MigrationReport {
    #[inline]
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    #[inline]
    #[must_use]
    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Instances newly marked UPDATED
    #[inline]
    #[must_use]
    pub fn updated(&self) -> usize {
        self.updated
    }

    /// Instances marked FAILED
    #[inline]
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Instances left untouched
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Per-instance failure detail
    #[inline]
    #[must_use]
    pub fn failures(&self) -> &[InstanceFailure] {
        &self.failures
    }

    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether at least one instance failed to migrate
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    /// Instances seen in total
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.updated + self.failed + self.skipped
    }
}

/// Resolved per-batch action
enum Action {
    Nothing,
    Hook(Arc<dyn PostUpdateHook>),
    Refresh(Arc<dyn ExternalRefresher>),
    Missing(HookError),
}

impl Action {
    fn apply(&self, instance: &dyn Tracked, attempt: &RedefinitionAttempt) -> Result<(), HookError> {
        match self {
            Self::Nothing => Ok(()),
            Self::Hook(hook) => guarded(|| hook.on_redefined(instance, attempt)),
            Self::Refresh(refresher) => guarded(|| refresher.refresh(instance, attempt)),
            Self::Missing(error) => Err(error.clone()),
        }
    }
}

fn guarded(f: impl FnOnce() -> Result<(), HookError>) -> Result<(), HookError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(HookError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Migrates tracked instances after successful redefinitions
#[derive(Debug, Clone)]
pub struct InstanceMigrator {
    registry: Arc<InstanceRegistry>,
    hooks: Arc<MigrationHooks>,
    selector: StrategySelector,
}

impl InstanceMigrator {
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>, hooks: Arc<MigrationHooks>) -> Self {
        Self {
            registry,
            hooks,
            selector: StrategySelector::new(),
        }
    }

    /// With a custom strategy selector
    #[must_use]
    pub fn with_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn hooks(&self) -> &Arc<MigrationHooks> {
        &self.hooks
    }

    /// Strategy that [`migrate`](Self::migrate) would use for `identity`
    #[must_use]
    pub fn strategy_for(&self, identity: &UnitIdentity) -> UpdateStrategy {
        self.selector.select(identity, &self.hooks)
    }

    /// Migrate every live instance touched by `attempt`
    ///
    /// Instances already processed for this attempt are skipped, so running
    /// it twice changes nothing the second time.
    ///
    /// # Errors
    /// [`MigrationError::AttemptNotSucceeded`] if the attempt failed.
    pub fn migrate(&self, attempt: &RedefinitionAttempt) -> Result<MigrationReport, MigrationError> {
        if !attempt.is_success() {
            return Err(MigrationError::AttemptNotSucceeded {
                attempt: attempt.id(),
            });
        }

        let started = Instant::now();
        let identity = attempt.identity();
        let strategy = self.strategy_for(identity);
        let span = info_span!("migrate", %identity, attempt = %attempt.id(), %strategy);
        let _guard = span.enter();
        let action = self.resolve(strategy, identity);

        let mut report = MigrationReport {
            attempt_id: attempt.id(),
            identity: identity.clone(),
            strategy,
            updated: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        };

        for tracked in self.registry.find(identity) {
            self.migrate_one(&tracked, &action, attempt, &mut report);
        }

        report.elapsed = started.elapsed();
        metrics::counter!("hotswap_instances_updated_total").increment(report.updated as u64);
        metrics::counter!("hotswap_instances_failed_total").increment(report.failed as u64);
        info!(
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "migration finished"
        );
        Ok(report)
    }

    /// Report that leaves every instance untouched
    ///
    /// Used when a cancellation arrived while the runtime call was in flight.
    #[must_use]
    pub fn skip(&self, attempt: &RedefinitionAttempt) -> MigrationReport {
        let identity = attempt.identity();
        let skipped = self.registry.count(identity);
        debug!(%identity, skipped, "migration skipped on request");
        MigrationReport {
            attempt_id: attempt.id(),
            identity: identity.clone(),
            strategy: self.strategy_for(identity),
            updated: 0,
            failed: 0,
            skipped,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn resolve(&self, strategy: UpdateStrategy, identity: &UnitIdentity) -> Action {
        match strategy {
            UpdateStrategy::NoOp => Action::Nothing,
            UpdateStrategy::StatePreserving => self
                .hooks
                .post_update(identity)
                .map_or(Action::Nothing, Action::Hook),
            UpdateStrategy::ExternalFactory => match self.hooks.refresher(identity) {
                Some(refresher) => Action::Refresh(refresher),
                None => Action::Missing(HookError::NoRefresher(identity.clone())),
            },
        }
    }

    fn migrate_one(
        &self,
        tracked: &TrackedInstance,
        action: &Action,
        attempt: &RedefinitionAttempt,
        report: &mut MigrationReport,
    ) {
        let handle = tracked.handle();
        let processed = tracked.last_attempt() == Some(attempt.id())
            && matches!(tracked.status(), InstanceStatus::Updated | InstanceStatus::Failed);
        if processed {
            report.skipped += 1;
            return;
        }

        if tracked.status() == InstanceStatus::Updated {
            if let Err(error) = self.registry.transition(handle, InstanceStatus::Stale, attempt.id()) {
                warn!(slot = handle.slot(), %error, "could not mark instance stale");
                report.skipped += 1;
                return;
            }
        }

        let result = action.apply(tracked.instance(), attempt);
        let target = if result.is_ok() {
            InstanceStatus::Updated
        } else {
            InstanceStatus::Failed
        };
        if let Err(error) = self.registry.transition(handle, target, attempt.id()) {
            warn!(slot = handle.slot(), %error, "could not record instance status");
            report.skipped += 1;
            return;
        }

        match result {
            Ok(()) => report.updated += 1,
            Err(error) => {
                warn!(
                    slot = handle.slot(),
                    instance_type = tracked.instance().type_name(),
                    %error,
                    "instance migration failed"
                );
                report.failed += 1;
                report.failures.push(InstanceFailure {
                    handle: handle.clone(),
                    type_name: tracked.instance().type_name().to_string(),
                    error: error.to_string(),
                });
            }
        }
    }
}
