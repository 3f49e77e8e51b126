//! Outcome events for external collaborators
//!
//! The pipeline publishes [`SwapEvent`]s to an [`EventSink`]: an audit log,
//! a UI, or an analytics consumer. Sinks never influence the pipeline; a
//! failing sink only logs.

use crate::breaker::BreakerTransition;
use crate::recovery::RollbackGuidance;
use crate::state::PipelineState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotswap_instances::MigrationReport;
use hotswap_unit::{CompatibilityVerdict, RedefinitionAttempt, RequestId, UnitIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Event emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwapEvent {
    /// A request moved between pipeline states
    StateChanged {
        request_id: RequestId,
        identity: UnitIdentity,
        from: PipelineState,
        to: PipelineState,
        at: DateTime<Utc>,
    },
    /// Validation found violations
    ValidationRejected {
        request_id: RequestId,
        verdict: CompatibilityVerdict,
    },
    /// A runtime call finished
    AttemptRecorded { attempt: RedefinitionAttempt },
    /// Instances were migrated (or skipped)
    MigrationCompleted { report: MigrationReport },
    /// Breaker changed state
    BreakerChanged { transition: BreakerTransition },
    /// Redefinition rejected; operator guidance
    RollbackAdvised {
        request_id: RequestId,
        guidance: RollbackGuidance,
    },
}

impl SwapEvent {
    /// Short event name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::ValidationRejected { .. } => "validation_rejected",
            Self::AttemptRecorded { .. } => "attempt_recorded",
            Self::MigrationCompleted { .. } => "migration_completed",
            Self::BreakerChanged { .. } => "breaker_changed",
            Self::RollbackAdvised { .. } => "rollback_advised",
        }
    }
}

/// Consumer of pipeline events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &SwapEvent);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(&self, _event: &SwapEvent) {}
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, event: &SwapEvent) {
        match event {
            SwapEvent::StateChanged {
                request_id,
                identity,
                from,
                to,
                ..
            } => debug!(%request_id, %identity, %from, %to, "pipeline state changed"),
            SwapEvent::ValidationRejected { request_id, verdict } => {
                info!(%request_id, summary = %verdict.summary(), "change rejected by validator");
            }
            SwapEvent::AttemptRecorded { attempt } => {
                info!(attempt = %attempt.id(), success = attempt.is_success(), "attempt recorded");
            }
            SwapEvent::MigrationCompleted { report } => info!(
                identity = %report.identity(),
                updated = report.updated(),
                failed = report.failed(),
                skipped = report.skipped(),
                "migration completed"
            ),
            SwapEvent::BreakerChanged { transition } => {
                info!(from = %transition.from, to = %transition.to, "breaker changed");
            }
            SwapEvent::RollbackAdvised { guidance, .. } => {
                warn!(identity = %guidance.identity, action = ?guidance.action, "{}", guidance.message);
            }
        }
    }
}

/// Forwards events into a bounded channel
///
/// Waits for capacity, so a slow consumer applies backpressure. A closed
/// receiver is logged once per event and otherwise ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<SwapEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SwapEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: &SwapEvent) {
        if self.sender.send(event.clone()).await.is_err() {
            debug!(kind = event.kind(), "event receiver closed");
        }
    }
}

/// Fans out to several sinks concurrently
#[derive(Clone, Default)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for MultiSink {
    async fn publish(&self, event: &SwapEvent) {
        futures::future::join_all(self.sinks.iter().map(|sink| sink.publish(event))).await;
    }
}

impl std::fmt::Debug for MultiSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSink").field("sinks", &self.sinks.len()).finish()
    }
}
