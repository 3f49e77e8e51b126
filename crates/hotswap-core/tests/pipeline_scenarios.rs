//! End-to-end pipeline scenarios

use hotswap_core::{
    BreakerConfig, BreakerState, CancelToken, HotSwapError, HotSwapPipeline, PipelineConfig,
    PipelineState, RejectionKind, RetryConfig,
};
use hotswap_instances::{InstanceRegistry, MigrationHooks};
use hotswap_test_utils::{
    body_change, field_added_change, identity, register_sessions, session_hook, RecordingSink,
    ScriptedRuntime,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const CART: &str = "com.acme.shop.Cart";

struct Harness {
    runtime: Arc<ScriptedRuntime>,
    registry: Arc<InstanceRegistry>,
    hooks: Arc<MigrationHooks>,
    sink: Arc<RecordingSink>,
    pipeline: Arc<HotSwapPipeline>,
}

fn harness(runtime: Arc<ScriptedRuntime>, config: PipelineConfig) -> Harness {
    let registry = Arc::new(InstanceRegistry::new());
    let hooks = Arc::new(MigrationHooks::new());
    let sink = RecordingSink::new();
    let pipeline = HotSwapPipeline::builder()
        .runtime(runtime.clone())
        .registry(Arc::clone(&registry))
        .hooks(Arc::clone(&hooks))
        .sink(sink.clone())
        .config(config)
        .build()
        .unwrap();
    Harness {
        runtime,
        registry,
        hooks,
        sink,
        pipeline: Arc::new(pipeline),
    }
}

fn no_retries() -> PipelineConfig {
    PipelineConfig::new().with_retry(RetryConfig::default().with_max_retries(0))
}

#[tokio::test]
async fn body_change_migrates_every_instance() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    let sessions = register_sessions(&h.registry, &identity(CART), 5);
    h.hooks.on_post_update(identity(CART), session_hook(0));

    let report = h.pipeline.submit(body_change(CART)).await.unwrap();

    assert_eq!(report.final_state, PipelineState::Completed);
    let migration = report.migration.as_ref().unwrap();
    assert_eq!((migration.updated(), migration.failed()), (5, 0));
    assert!(sessions.iter().all(|s| s.refreshed() == 1));
    assert_eq!(report.final_attempt().unwrap().instances_discovered(), Some(5));
    assert_eq!(
        h.sink.states(),
        vec![
            PipelineState::Validating,
            PipelineState::Redefining,
            PipelineState::Migrating,
            PipelineState::Completed,
        ]
    );
}

#[tokio::test]
async fn added_field_is_rejected_without_an_attempt() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());

    let err = h.pipeline.submit(field_added_change(CART)).await.unwrap_err();

    let HotSwapError::ValidationRejected { verdict } = &err else {
        panic!("expected validation rejection, got {err:?}");
    };
    assert!(verdict.violations().iter().any(|v| v.is_schema_change()));
    assert_eq!(err.terminal_state(), Some(PipelineState::Rejected));
    assert_eq!(h.runtime.calls(), 0);
    assert_eq!(h.sink.count("attempt_recorded"), 0);
    assert_eq!(h.sink.count("validation_rejected"), 1);
    assert_eq!(h.sink.states(), vec![PipelineState::Validating, PipelineState::Rejected]);
}

#[tokio::test]
async fn runtime_failure_skips_migration_and_counts_once() {
    let h = harness(ScriptedRuntime::rejecting(1, RejectionKind::SchemaChange), no_retries());
    let sessions = register_sessions(&h.registry, &identity(CART), 3);
    h.hooks.on_post_update(identity(CART), session_hook(0));

    let report = h.pipeline.submit(body_change(CART)).await.unwrap();

    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(report.migration.is_none());
    assert_eq!(report.attempts.len(), 1);
    assert!(report.rollback.is_some());
    assert_eq!(h.pipeline.breaker().snapshot().recent_failures, 1);
    assert!(sessions.iter().all(|s| s.refreshed() == 0));
    assert_eq!(h.sink.count("migration_completed"), 0);
    assert_eq!(h.sink.count("rollback_advised"), 1);
}

#[tokio::test]
async fn failing_hooks_give_partial_completion() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    let sessions = register_sessions(&h.registry, &identity(CART), 10);
    h.hooks.on_post_update(identity(CART), session_hook(2));

    let report = h.pipeline.submit(body_change(CART)).await.unwrap();

    assert_eq!(report.final_state, PipelineState::Completed);
    assert!(report.is_partial());
    let migration = report.migration.as_ref().unwrap();
    assert_eq!((migration.updated(), migration.failed()), (8, 2));
    assert_eq!(sessions.iter().filter(|s| s.refreshed() == 1).count(), 8);
    assert_eq!(h.pipeline.recovery().statistics().partial_migrations, 1);
    assert_eq!(h.pipeline.breaker().state(), BreakerState::Closed);
}

#[tokio::test]
async fn open_breaker_short_circuits_requests() {
    let h = harness(ScriptedRuntime::rejecting(3, RejectionKind::SchemaChange), no_retries());

    for _ in 0..3 {
        let report = h.pipeline.submit(body_change(CART)).await.unwrap();
        assert_eq!(report.final_state, PipelineState::Failed);
    }
    assert_eq!(h.pipeline.breaker().state(), BreakerState::Open);

    let err = h.pipeline.submit(body_change(CART)).await.unwrap_err();
    assert!(err.is_system_degraded());
    assert_eq!(h.runtime.calls(), 3);
    assert_eq!(h.pipeline.recovery().statistics().degraded_rejections, 1);
    assert_eq!(h.sink.count("breaker_changed"), 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_recovers_through_a_trial_request() {
    let config = no_retries().with_breaker(BreakerConfig::default().with_threshold(1).with_cooldown_secs(10));
    let h = harness(ScriptedRuntime::rejecting(1, RejectionKind::Unsupported), config);

    h.pipeline.submit(body_change(CART)).await.unwrap();
    assert!(h.pipeline.submit(body_change(CART)).await.is_err());

    tokio::time::advance(Duration::from_secs(11)).await;
    let report = h.pipeline.submit(body_change(CART)).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(h.pipeline.breaker().state(), BreakerState::Closed);
    // CLOSED→OPEN, OPEN→HALF_OPEN, HALF_OPEN→CLOSED
    assert_eq!(h.sink.count("breaker_changed"), 3);
}

#[tokio::test]
async fn transient_rejections_are_retried() {
    let retry = RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryConfig::default()
    };
    let h = harness(
        ScriptedRuntime::rejecting(2, RejectionKind::ResourceContention),
        PipelineConfig::new().with_retry(retry),
    );

    let report = h.pipeline.submit(body_change(CART)).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.attempts.len(), 3);
    assert!(report.attempts[..2].iter().all(|a| !a.is_success()));
    assert_eq!(h.pipeline.recovery().statistics().retries, 2);
    assert_eq!(h.pipeline.breaker().snapshot().recent_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_unit_requests_are_serialized() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    h.runtime.set_delay(Duration::from_millis(50));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let pipeline = Arc::clone(&h.pipeline);
            tokio::spawn(async move { pipeline.submit(body_change(CART)).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_completed());
    }

    assert_eq!(h.runtime.calls(), 3);
    assert_eq!(h.runtime.max_in_flight(), 1);
    assert_eq!(h.pipeline.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_units_run_concurrently() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    h.runtime.set_delay(Duration::from_millis(300));

    let a = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.submit(body_change("com.acme.A")).await })
    };
    let b = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.submit(body_change("com.acme.B")).await })
    };
    assert!(a.await.unwrap().unwrap().is_completed());
    assert!(b.await.unwrap().unwrap().is_completed());

    assert_eq!(h.runtime.max_in_flight(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_during_redefinition_skips_migration() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    h.runtime.set_delay(Duration::from_millis(200));
    let sessions = register_sessions(&h.registry, &identity(CART), 4);
    h.hooks.on_post_update(identity(CART), session_hook(0));

    let cancel = CancelToken::new();
    let task = {
        let pipeline = Arc::clone(&h.pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.submit_with_cancel(body_change(CART), cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = task.await.unwrap().unwrap();
    assert!(report.is_completed());
    assert!(report.migration_skipped);
    assert_eq!(report.migration.as_ref().unwrap().skipped(), 4);
    assert!(sessions.iter().all(|s| s.refreshed() == 0));
    assert_eq!(h.runtime.calls(), 1);
}

#[tokio::test]
async fn cancel_before_redefinition_rejects() {
    let h = harness(ScriptedRuntime::accepting(), PipelineConfig::new());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = h.pipeline.submit_with_cancel(body_change(CART), cancel).await.unwrap_err();

    assert!(matches!(err, HotSwapError::Cancelled));
    assert_eq!(h.runtime.calls(), 0);
    assert_eq!(h.sink.states().last(), Some(&PipelineState::Rejected));
}
