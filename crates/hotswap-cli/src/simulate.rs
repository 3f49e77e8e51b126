//! In-process pipeline simulation
//!
//! Builds a pipeline over [`InMemoryRuntime`], registers synthetic instances,
//! submits one body-only change and summarizes what happened.

use anyhow::Result;
use hotswap_core::{
    BreakerState, CandidateChange, HotSwapError, HotSwapPipeline, InMemoryRuntime, PipelineConfig,
    PipelineState, RecoveryStatistics, RejectionKind, RuntimeRejection, TracingSink,
};
use hotswap_instances::{HookError, InstanceRegistry, MigrationHooks, Tracked};
use hotswap_unit::{CodeUnit, FieldSig, MethodSig, RedefinitionAttempt, StructuralSignature, UnitIdentity};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tracing::info;

const UNIT: &str = "sim.OrderService";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorOptions {
    /// Live instances to register
    pub instances: usize,
    /// Instances whose post-update hook fails
    pub failing_hooks: usize,
    /// Transient runtime rejections before the call goes through
    pub runtime_failures: usize,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            instances: 10,
            failing_hooks: 0,
            runtime_failures: 0,
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub identity: String,
    pub final_state: String,
    pub error: Option<String>,
    pub attempts: usize,
    pub updated: usize,
    pub failed: usize,
    pub rollback: Option<String>,
    pub breaker: BreakerState,
    pub recovery: RecoveryStatistics,
}

impl SimulationReport {
    /// Completed without failed instances
    #[must_use]
    pub fn passed(&self) -> bool {
        self.final_state == PipelineState::Completed.as_str() && self.failed == 0
    }
}

impl Display for SimulationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hot-swap Simulation")?;
        writeln!(f, "===================")?;
        writeln!(f, "Unit:        {}", self.identity)?;
        writeln!(f, "Final state: {}", self.final_state)?;
        if let Some(error) = &self.error {
            writeln!(f, "Error:       {error}")?;
        }
        writeln!(f, "Attempts:    {}", self.attempts)?;
        writeln!(f, "Instances:   {} updated, {} failed", self.updated, self.failed)?;
        if let Some(rollback) = &self.rollback {
            writeln!(f, "Rollback:    {rollback}")?;
        }
        writeln!(f, "Breaker:     {}", self.breaker)?;
        write!(
            f,
            "Recovery:    {} failure(s), {} retry(ies)",
            self.recovery.total_failures, self.recovery.retries
        )
    }
}

/// Sample instance used by the simulation
#[derive(Debug)]
struct Worker {
    index: usize,
}

fn unit(identity: &UnitIdentity, body: &str) -> Arc<CodeUnit> {
    let signature = StructuralSignature::builder()
        .field("pending", FieldSig::new("int"))
        .method(MethodSig::new("place", ["Order"], "boolean").with_body(body))
        .build();
    Arc::new(CodeUnit::new(identity.clone(), signature, body.as_bytes().to_vec()))
}

/// Run one simulated hot-swap
///
/// # Errors
/// Invalid configuration.
pub async fn run_simulation(options: SimulatorOptions, config: PipelineConfig) -> Result<SimulationReport> {
    info!(
        instances = options.instances,
        failing_hooks = options.failing_hooks,
        runtime_failures = options.runtime_failures,
        "starting simulation"
    );
    let identity = UnitIdentity::new(UNIT)?;
    let old = unit(&identity, "return queue.offer(order);");
    let new = unit(&identity, "return order.valid() && queue.offer(order);");

    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.load(identity.clone(), old.bytes().to_vec());
    for i in 0..options.runtime_failures {
        runtime.reject_next(RuntimeRejection::new(
            RejectionKind::ResourceContention,
            format!("simulated contention #{}", i + 1),
        ));
    }

    let registry = Arc::new(InstanceRegistry::new());
    let workers: Vec<Arc<Worker>> = (0..options.instances).map(|index| Arc::new(Worker { index })).collect();
    for worker in &workers {
        registry.register(worker, &identity);
    }

    let hooks = Arc::new(MigrationHooks::new());
    let failing = options.failing_hooks;
    hooks.on_post_update(identity.clone(), move |instance: &dyn Tracked, _: &RedefinitionAttempt| {
        match instance.downcast_ref::<Worker>() {
            Some(worker) if worker.index < failing => {
                Err(HookError::failed(format!("worker {} rejected new code", worker.index)))
            }
            Some(_) => Ok(()),
            None => Err(HookError::TypeMismatch {
                expected: "Worker",
                actual: instance.type_name(),
            }),
        }
    });

    let pipeline = HotSwapPipeline::builder()
        .runtime(runtime)
        .registry(registry)
        .hooks(hooks)
        .sink(Arc::new(TracingSink))
        .config(config)
        .build()?;

    let outcome = pipeline.submit(CandidateChange::new(old, new)).await;
    let mut report = SimulationReport {
        identity: identity.to_string(),
        final_state: PipelineState::Rejected.to_string(),
        error: None,
        attempts: 0,
        updated: 0,
        failed: 0,
        rollback: None,
        breaker: pipeline.breaker().state(),
        recovery: pipeline.recovery().statistics(),
    };
    match outcome {
        Ok(swap) => {
            report.final_state = swap.final_state.to_string();
            report.attempts = swap.attempts.len();
            if let Some(migration) = &swap.migration {
                report.updated = migration.updated();
                report.failed = migration.failed();
            }
            report.rollback = swap.rollback.map(|guidance| guidance.message);
        }
        Err(HotSwapError::Config(error)) => return Err(error.into()),
        Err(error) => report.error = Some(error.to_string()),
    }
    drop(workers);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_core::RetryConfig;

    #[tokio::test]
    async fn clean_run_updates_everything() {
        let report = run_simulation(SimulatorOptions::default(), PipelineConfig::new()).await.unwrap();
        assert!(report.passed());
        assert_eq!((report.updated, report.failed), (10, 0));
        assert_eq!(report.breaker, BreakerState::Closed);
    }

    #[tokio::test]
    async fn failing_hooks_are_counted() {
        let options = SimulatorOptions {
            instances: 6,
            failing_hooks: 2,
            runtime_failures: 0,
        };
        let report = run_simulation(options, PipelineConfig::new()).await.unwrap();
        assert_eq!(report.final_state, "COMPLETED");
        assert_eq!((report.updated, report.failed), (4, 2));
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_swap() {
        let options = SimulatorOptions {
            instances: 2,
            failing_hooks: 0,
            runtime_failures: 2,
        };
        let retry = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            ..RetryConfig::default()
        };
        let report = run_simulation(options, PipelineConfig::new().with_retry(retry)).await.unwrap();
        assert_eq!(report.final_state, "FAILED");
        assert_eq!(report.attempts, 2);
        assert!(report.rollback.is_some());
    }
}
