//! Hot-swap pipeline orchestration
//!
//! Drives one [`CandidateChange`] through
//! `REQUESTED → VALIDATING → {REJECTED | REDEFINING → {FAILED | MIGRATING → COMPLETED}}`.
//!
//! Requests for the same unit are serialized; requests for different units
//! run concurrently. Validation rejections, an open breaker and cancellation
//! are returned as errors. Redefinition failures and partial migrations are
//! ordinary outcomes recorded in the [`SwapReport`].

use crate::breaker::{BreakerTransition, CircuitBreaker, Degraded};
use crate::config::PipelineConfig;
use crate::coordinator::RedefinitionCoordinator;
use crate::error::{ConfigError, HotSwapError};
use crate::events::{EventSink, NoopSink, SwapEvent};
use crate::recovery::{FailureRecovery, RecoveryDecision, RetryPolicy, RollbackGuidance};
use crate::runtime::HostRuntime;
use crate::state::{PipelineState, StateChange, StateTracker};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hotswap_instances::{
    spawn_sweeper, InstanceMigrator, InstanceRegistry, MigrationHooks, MigrationReport,
    StrategySelector,
};
use hotswap_unit::{
    CodeUnit, CompatibilityValidator, Incompatible, RedefinitionAttempt, RequestId, UnitIdentity,
    ValidatedChange,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// A change submitted for hot-swapping
///
/// The identity is taken from the old unit; the validator reports a
/// mismatching new unit as incompatible.
#[derive(Debug, Clone)]
pub struct CandidateChange {
    old: Arc<CodeUnit>,
    new: Arc<CodeUnit>,
    request_id: RequestId,
    timestamp: DateTime<Utc>,
}

impl CandidateChange {
    #[must_use]
    pub fn new(old: Arc<CodeUnit>, new: Arc<CodeUnit>) -> Self {
        Self {
            old,
            new,
            request_id: RequestId::new(),
            timestamp: Utc::now(),
        }
    }

    /// Use a request id assigned upstream
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        self.old.identity()
    }

    #[inline]
    #[must_use]
    pub fn old(&self) -> &Arc<CodeUnit> {
        &self.old
    }

    #[inline]
    #[must_use]
    pub fn new_unit(&self) -> &Arc<CodeUnit> {
        &self.new
    }

    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Cooperative cancellation flag
///
/// Honoured up to the start of REDEFINING. Afterwards it only means
/// "do not migrate instances".
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a request that reached REDEFINING
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReport {
    pub request_id: RequestId,
    pub identity: UnitIdentity,
    /// `Failed` or `Completed`
    pub final_state: PipelineState,
    /// Every state entered, in order
    pub states: Vec<StateChange>,
    /// Runtime calls, including retries
    pub attempts: Vec<RedefinitionAttempt>,
    pub migration: Option<MigrationReport>,
    pub rollback: Option<RollbackGuidance>,
    /// Cancelled while the runtime call was in flight
    pub migration_skipped: bool,
    pub elapsed: Duration,
}

impl SwapReport {
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.final_state == PipelineState::Completed
    }

    /// Completed, but some instances failed to migrate
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.migration.as_ref().is_some_and(MigrationReport::is_partial)
    }

    /// The attempt that decided the outcome
    #[must_use]
    pub fn final_attempt(&self) -> Option<&RedefinitionAttempt> {
        self.attempts.last()
    }

    #[must_use]
    pub fn path(&self) -> Vec<PipelineState> {
        self.states.iter().map(|change| change.state).collect()
    }
}

/// Per-request bookkeeping
struct RequestRun {
    request_id: RequestId,
    identity: UnitIdentity,
    tracker: StateTracker,
    started: Instant,
}

/// Hot-swap pipeline
pub struct HotSwapPipeline {
    validator: CompatibilityValidator,
    coordinator: RedefinitionCoordinator,
    migrator: Arc<InstanceMigrator>,
    breaker: CircuitBreaker,
    recovery: Arc<FailureRecovery>,
    sink: Arc<dyn EventSink>,
    locks: DashMap<UnitIdentity, Arc<tokio::sync::Mutex<()>>>,
    config: PipelineConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl HotSwapPipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run a change through the pipeline
    ///
    /// # Errors
    /// - [`HotSwapError::ValidationRejected`] for incompatible changes
    /// - [`HotSwapError::SystemDegraded`] while the breaker is open
    pub async fn submit(&self, change: CandidateChange) -> Result<SwapReport, HotSwapError> {
        self.submit_with_cancel(change, CancelToken::new()).await
    }

    /// Run a change that can be cancelled
    ///
    /// # Errors
    /// As [`submit`](Self::submit), plus [`HotSwapError::Cancelled`] when the
    /// token fires before REDEFINING.
    pub async fn submit_with_cancel(
        &self,
        change: CandidateChange,
        cancel: CancelToken,
    ) -> Result<SwapReport, HotSwapError> {
        metrics::counter!("hotswap_requests_total").increment(1);
        let identity = change.identity().clone();
        let span = info_span!("hot_swap", request = %change.request_id(), %identity);

        let lock = self.lock_for(&identity);
        let result = async {
            let _serialized = lock.lock().await;
            self.run(change, &cancel).await
        }
        .instrument(span)
        .await;

        drop(lock);
        self.locks.remove_if(&identity, |_, entry| Arc::strong_count(entry) == 1);
        result
    }

    async fn run(&self, change: CandidateChange, cancel: &CancelToken) -> Result<SwapReport, HotSwapError> {
        let mut run = RequestRun {
            request_id: change.request_id(),
            identity: change.identity().clone(),
            tracker: StateTracker::new(),
            started: Instant::now(),
        };
        self.advance(&mut run, PipelineState::Validating).await?;

        if cancel.is_cancelled() {
            return self.reject(&mut run, HotSwapError::Cancelled).await;
        }

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(Degraded { retry_after }) => {
                self.recovery.note_degraded();
                metrics::counter!("hotswap_rejections_total", "reason" => "degraded").increment(1);
                return self
                    .reject(&mut run, HotSwapError::SystemDegraded { retry_after })
                    .await;
            }
        };
        if let Some(transition) = permit.opened_trial() {
            self.publish_breaker(transition).await;
        }

        let validated = match self.validator.check(change.old, change.new) {
            Ok(validated) => validated,
            Err(Incompatible { verdict }) => {
                metrics::counter!("hotswap_rejections_total", "reason" => "incompatible").increment(1);
                self.sink
                    .publish(&SwapEvent::ValidationRejected {
                        request_id: run.request_id,
                        verdict: verdict.clone(),
                    })
                    .await;
                return self
                    .reject(&mut run, HotSwapError::ValidationRejected { verdict })
                    .await;
            }
        };

        if cancel.is_cancelled() {
            return self.reject(&mut run, HotSwapError::Cancelled).await;
        }

        self.advance(&mut run, PipelineState::Redefining).await?;
        let (attempts, attempt) = self.redefine_with_retries(&run, &validated, cancel).await;

        if !attempt.is_success() {
            if let Some(transition) = permit.failure() {
                self.publish_breaker(transition).await;
            }
            let rollback = self.recovery.rollback_guidance(&attempt);
            if let Some(guidance) = &rollback {
                self.sink
                    .publish(&SwapEvent::RollbackAdvised {
                        request_id: run.request_id,
                        guidance: guidance.clone(),
                    })
                    .await;
            }
            let mut attempts = attempts;
            attempts.push(attempt);
            self.advance(&mut run, PipelineState::Failed).await?;
            return Ok(Self::report(run, attempts, None, rollback, false));
        }

        self.advance(&mut run, PipelineState::Migrating).await?;
        let skipped = cancel.is_cancelled();
        let migration = if skipped {
            info!("cancelled during redefinition, leaving instances untouched");
            self.migrator.skip(&attempt)
        } else {
            self.migrator.migrate(&attempt)?
        };
        self.sink
            .publish(&SwapEvent::MigrationCompleted {
                report: migration.clone(),
            })
            .await;

        let settled = if migration.is_partial() {
            self.recovery.note_partial_migration();
            warn!(failed = migration.failed(), "migration left failed instances");
            permit.failure()
        } else {
            permit.success()
        };
        if let Some(transition) = settled {
            self.publish_breaker(transition).await;
        }

        let mut attempts = attempts;
        attempts.push(attempt);
        self.advance(&mut run, PipelineState::Completed).await?;
        Ok(Self::report(run, attempts, Some(migration), None, skipped))
    }

    /// Call the runtime until success, a non-retryable failure or exhaustion
    ///
    /// Returns the superseded attempts and the final one.
    async fn redefine_with_retries(
        &self,
        run: &RequestRun,
        change: &ValidatedChange,
        cancel: &CancelToken,
    ) -> (Vec<RedefinitionAttempt>, RedefinitionAttempt) {
        let mut superseded = Vec::new();
        let mut retries = 0;
        loop {
            let attempt = self.coordinator.redefine(run.request_id, change).await;
            self.sink
                .publish(&SwapEvent::AttemptRecorded {
                    attempt: attempt.clone(),
                })
                .await;

            let Some(failure) = attempt.failure() else {
                return (superseded, attempt);
            };
            match self.recovery.decide(failure, retries) {
                RecoveryDecision::Retry { delay } if !cancel.is_cancelled() => {
                    debug!(retry = retries + 1, ?delay, "retrying redefinition");
                    superseded.push(attempt);
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                _ => return (superseded, attempt),
            }
        }
    }

    async fn advance(&self, run: &mut RequestRun, to: PipelineState) -> Result<(), HotSwapError> {
        let from = run.tracker.advance(to)?;
        self.sink
            .publish(&SwapEvent::StateChanged {
                request_id: run.request_id,
                identity: run.identity.clone(),
                from,
                to,
                at: Utc::now(),
            })
            .await;
        Ok(())
    }

    async fn reject(&self, run: &mut RequestRun, error: HotSwapError) -> Result<SwapReport, HotSwapError> {
        self.advance(run, PipelineState::Rejected).await?;
        info!(%error, "request rejected");
        Err(error)
    }

    async fn publish_breaker(&self, transition: BreakerTransition) {
        self.sink.publish(&SwapEvent::BreakerChanged { transition }).await;
    }

    fn report(
        run: RequestRun,
        attempts: Vec<RedefinitionAttempt>,
        migration: Option<MigrationReport>,
        rollback: Option<RollbackGuidance>,
        migration_skipped: bool,
    ) -> SwapReport {
        let final_state = run.tracker.current();
        SwapReport {
            request_id: run.request_id,
            identity: run.identity,
            final_state,
            states: run.tracker.into_history(),
            attempts,
            migration,
            rollback,
            migration_skipped,
            elapsed: run.started.elapsed(),
        }
    }

    fn lock_for(&self, identity: &UnitIdentity) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }

    #[inline]
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.migrator.registry()
    }

    #[inline]
    #[must_use]
    pub fn hooks(&self) -> &Arc<MigrationHooks> {
        self.migrator.hooks()
    }

    #[inline]
    #[must_use]
    pub fn migrator(&self) -> &Arc<InstanceMigrator> {
        &self.migrator
    }

    #[inline]
    #[must_use]
    pub fn recovery(&self) -> &Arc<FailureRecovery> {
        &self.recovery
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Identities with a request currently queued or running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for HotSwapPipeline {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl fmt::Debug for HotSwapPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotSwapPipeline")
            .field("validator", &self.validator)
            .field("coordinator", &self.coordinator)
            .field("breaker", &self.breaker.state())
            .field("in_flight", &self.locks.len())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`HotSwapPipeline`]
#[derive(Default)]
pub struct PipelineBuilder {
    runtime: Option<Arc<dyn HostRuntime>>,
    registry: Option<Arc<InstanceRegistry>>,
    hooks: Option<Arc<MigrationHooks>>,
    breaker: Option<CircuitBreaker>,
    sink: Option<Arc<dyn EventSink>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Host runtime (required)
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn HostRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<MigrationHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Share a breaker between pipelines
    #[must_use]
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline
    ///
    /// Starts the registry sweeper when `sweep_interval_secs` is set and a
    /// tokio runtime is available.
    ///
    /// # Errors
    /// [`HotSwapError::Config`] for an invalid configuration or a missing
    /// runtime.
    pub fn build(self) -> Result<HotSwapPipeline, HotSwapError> {
        self.config.validate()?;
        let runtime = self
            .runtime
            .ok_or_else(|| ConfigError::invalid("runtime", "a host runtime is required"))?;
        let registry = self.registry.unwrap_or_default();
        let hooks = self.hooks.unwrap_or_default();
        let config = self.config;

        let sweeper = config.sweep_interval().and_then(|interval| {
            if tokio::runtime::Handle::try_current().is_ok() {
                Some(spawn_sweeper(&registry, interval))
            } else {
                warn!("no tokio runtime, registry sweeper not started");
                None
            }
        });

        let coordinator = RedefinitionCoordinator::new(runtime, Arc::clone(&registry))
            .with_call_timeout(config.retry.call_timeout());
        let migrator = InstanceMigrator::new(registry, hooks)
            .with_selector(StrategySelector::from_config(&config.migration));

        Ok(HotSwapPipeline {
            validator: CompatibilityValidator::new(config.validation),
            coordinator,
            migrator: Arc::new(migrator),
            breaker: self.breaker.unwrap_or_else(|| CircuitBreaker::new(&config.breaker)),
            recovery: Arc::new(FailureRecovery::new(RetryPolicy::new(&config.retry))),
            sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            locks: DashMap::new(),
            config,
            sweeper,
        })
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("has_runtime", &self.runtime.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
