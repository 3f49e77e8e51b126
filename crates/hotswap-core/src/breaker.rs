//! Process-wide circuit breaker over redefinition attempts
//!
//! ```text
//! CLOSED --N failures within window--> OPEN --cooldown--> HALF_OPEN
//!   ^                                   ^                     |
//!   |                                   +------failure--------+
//!   +----------------------success-----------------------------+
//! ```
//!
//! The breaker is an explicit object with a documented lifecycle: created once
//! per process, injected into the pipeline as a cheap clone, reset only by
//! [`CircuitBreaker::reset`] or a successful half-open trial.
//!
//! Requests take a [`BreakerPermit`] before doing anything. A permit dropped
//! without recording an outcome releases a half-open probe without counting,
//! which is how validation rejections stay out of the failure count.

use crate::config::BreakerConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    #[inline]
    #[must_use]
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// State-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    /// Failures currently counted inside the window
    pub recent_failures: usize,
    /// Remaining cooldown while OPEN
    pub retry_after: Option<Duration>,
    /// Times the breaker has opened
    pub opened_total: u64,
}

/// Rejection issued while the breaker is OPEN
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker open, retry after {retry_after:?}")]
pub struct Degraded {
    pub retry_after: Duration,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: VecDeque<Instant> },
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl Inner {
    fn state(&self) -> BreakerState {
        match self {
            Self::Closed { .. } => BreakerState::Closed,
            Self::Open { .. } => BreakerState::Open,
            Self::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<Inner>,
    opened_total: Mutex<u64>,
    threshold: usize,
    window: Duration,
    cooldown: Duration,
    transitions: broadcast::Sender<BreakerTransition>,
}

/// Circuit breaker handle (clone to share)
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a CLOSED breaker
    #[must_use]
    pub fn new(config: &BreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        metrics::gauge!("hotswap_breaker_state").set(BreakerState::Closed.gauge_value());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner::Closed {
                    failures: VecDeque::new(),
                }),
                opened_total: Mutex::new(0),
                threshold: usize::try_from(config.failure_threshold.max(1)).unwrap_or(usize::MAX),
                window: config.window(),
                cooldown: config.cooldown(),
                transitions,
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.shared.state.lock().state()
    }

    /// Ask for permission to attempt a redefinition
    ///
    /// # Errors
    /// [`Degraded`] while OPEN, or while a half-open trial is already running.
    pub fn try_acquire(&self) -> Result<BreakerPermit, Degraded> {
        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let (probe, transition) = match &mut *guard {
            Inner::Closed { .. } => (false, None),
            Inner::Open { since } => {
                let reopen_at = *since + self.shared.cooldown;
                if now < reopen_at {
                    return Err(Degraded {
                        retry_after: reopen_at - now,
                    });
                }
                *guard = Inner::HalfOpen {
                    probe_in_flight: true,
                };
                (true, Some((BreakerState::Open, BreakerState::HalfOpen)))
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    return Err(Degraded {
                        retry_after: Duration::ZERO,
                    });
                }
                *probe_in_flight = true;
                (true, None)
            }
        };
        drop(guard);
        let opened_trial = transition.map(|(from, to)| self.publish(from, to));
        Ok(BreakerPermit {
            breaker: self.clone(),
            probe,
            opened_trial,
            settled: false,
        })
    }

    /// Record a successful redefinition outside a half-open trial
    ///
    /// Clears the failure count while CLOSED and changes nothing otherwise;
    /// only the trial permit or [`reset`](Self::reset) closes the breaker.
    pub fn record_success(&self) -> Option<BreakerTransition> {
        self.settle_success(false)
    }

    fn settle_success(&self, probe: bool) -> Option<BreakerTransition> {
        let mut guard = self.shared.state.lock();
        let close = match &mut *guard {
            Inner::Closed { failures } => {
                failures.clear();
                false
            }
            Inner::HalfOpen { .. } => probe,
            Inner::Open { .. } => false,
        };
        if !close {
            return None;
        }
        *guard = Inner::Closed {
            failures: VecDeque::new(),
        };
        drop(guard);
        Some(self.publish(BreakerState::HalfOpen, BreakerState::Closed))
    }

    /// Record a failed redefinition (or a migration with failed hooks)
    pub fn record_failure(&self) -> Option<BreakerTransition> {
        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let from = guard.state();
        let open = match &mut *guard {
            Inner::Closed { failures } => {
                failures.push_back(now);
                while failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > self.shared.window)
                {
                    failures.pop_front();
                }
                failures.len() >= self.shared.threshold
            }
            Inner::HalfOpen { .. } => true,
            // Already open: restart the cooldown.
            Inner::Open { since } => {
                *since = now;
                false
            }
        };
        if !open {
            return None;
        }
        *guard = Inner::Open { since: now };
        drop(guard);
        *self.shared.opened_total.lock() += 1;
        Some(self.publish(from, BreakerState::Open))
    }

    /// Operator reset to CLOSED
    pub fn reset(&self) -> Option<BreakerTransition> {
        let mut guard = self.shared.state.lock();
        let from = guard.state();
        *guard = Inner::Closed {
            failures: VecDeque::new(),
        };
        drop(guard);
        (from != BreakerState::Closed).then(|| self.publish(from, BreakerState::Closed))
    }

    /// Point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let guard = self.shared.state.lock();
        let (recent_failures, retry_after) = match &*guard {
            Inner::Closed { failures } => (
                failures
                    .iter()
                    .filter(|t| now.duration_since(**t) <= self.shared.window)
                    .count(),
                None,
            ),
            Inner::Open { since } => (
                0,
                Some((*since + self.shared.cooldown).saturating_duration_since(now)),
            ),
            Inner::HalfOpen { .. } => (0, None),
        };
        let state = guard.state();
        drop(guard);
        BreakerSnapshot {
            state,
            recent_failures,
            retry_after,
            opened_total: *self.shared.opened_total.lock(),
        }
    }

    /// Subscribe to state-change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.shared.transitions.subscribe()
    }

    fn release_probe(&self) {
        let mut guard = self.shared.state.lock();
        if let Inner::HalfOpen { probe_in_flight } = &mut *guard {
            *probe_in_flight = false;
        }
    }

    fn publish(&self, from: BreakerState, to: BreakerState) -> BreakerTransition {
        let transition = BreakerTransition {
            from,
            to,
            at: Utc::now(),
        };
        match to {
            BreakerState::Open => warn!(%from, %to, "circuit breaker opened"),
            BreakerState::HalfOpen => info!(%from, %to, "circuit breaker half-open, allowing one trial"),
            BreakerState::Closed => info!(%from, %to, "circuit breaker closed"),
        }
        metrics::gauge!("hotswap_breaker_state").set(to.gauge_value());
        // No subscribers is fine.
        let _ = self.shared.transitions.send(transition);
        transition
    }
}

/// Permission to run one request through the pipeline
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure);
/// dropping it unsettled records nothing.
#[derive(Debug)]
#[must_use = "a permit must be settled or dropped deliberately"]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    probe: bool,
    opened_trial: Option<BreakerTransition>,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open trial
    #[inline]
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// OPEN -> HALF_OPEN transition caused by issuing this permit
    #[inline]
    #[must_use]
    pub fn opened_trial(&self) -> Option<BreakerTransition> {
        self.opened_trial
    }

    /// Record success
    pub fn success(mut self) -> Option<BreakerTransition> {
        self.settled = true;
        self.breaker.settle_success(self.probe)
    }

    /// Record failure
    pub fn failure(mut self) -> Option<BreakerTransition> {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
