//! Testing utilities for the hotswap workspace
//!
//! Shared fixtures, a scriptable host runtime, a recording event sink and
//! sample instance types.

#![allow(missing_docs)]

use async_trait::async_trait;
use hotswap_core::{EventSink, HostRuntime, PipelineState, RejectionKind, RuntimeRejection, SwapEvent};
use hotswap_instances::{HookError, InstanceRegistry, Tracked};
use hotswap_unit::{CodeUnit, FieldSig, MethodSig, RedefinitionAttempt, StructuralSignature, UnitIdentity};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

pub fn identity(name: &str) -> UnitIdentity {
    UnitIdentity::new(name).unwrap()
}

/// A unit with one `long total` field and one `pay(long)` method
pub fn unit_with_body(name: &str, body: &str) -> Arc<CodeUnit> {
    let signature = StructuralSignature::builder()
        .field("total", FieldSig::new("long"))
        .method(MethodSig::new("pay", ["long"], "boolean").with_body(body))
        .build();
    Arc::new(CodeUnit::new(identity(name), signature, body.as_bytes().to_vec()))
}

/// Old and new versions differing only in a method body
pub fn body_change_pair(name: &str) -> (Arc<CodeUnit>, Arc<CodeUnit>) {
    (unit_with_body(name, "return total > 0;"), unit_with_body(name, "return total >= 0;"))
}

/// Old and new versions where the new one adds an instance field
pub fn field_added_pair(name: &str) -> (Arc<CodeUnit>, Arc<CodeUnit>) {
    let old = unit_with_body(name, "return total > 0;");
    let signature = StructuralSignature::builder()
        .field("total", FieldSig::new("long"))
        .field("discount", FieldSig::new("int"))
        .method(MethodSig::new("pay", ["long"], "boolean").with_body("return total > 0;"))
        .build();
    let new = Arc::new(CodeUnit::new(identity(name), signature, b"with-discount".to_vec()));
    (old, new)
}

pub fn body_change(name: &str) -> hotswap_core::CandidateChange {
    let (old, new) = body_change_pair(name);
    hotswap_core::CandidateChange::new(old, new)
}

pub fn field_added_change(name: &str) -> hotswap_core::CandidateChange {
    let (old, new) = field_added_pair(name);
    hotswap_core::CandidateChange::new(old, new)
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Host runtime replaying a script of outcomes, then accepting everything
///
/// Also records how many calls overlapped.
#[derive(Default)]
pub struct ScriptedRuntime {
    script: Mutex<VecDeque<Result<(), RuntimeRejection>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<UnitIdentity>>,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept every call
    pub fn accepting() -> Arc<Self> {
        Self::new()
    }

    /// Reject the next `n` calls with `kind`
    pub fn rejecting(n: usize, kind: RejectionKind) -> Arc<Self> {
        let runtime = Self::new();
        for i in 0..n {
            runtime.push(Err(RuntimeRejection::new(kind, format!("scripted rejection {}", i + 1))));
        }
        runtime
    }

    pub fn push(&self, outcome: Result<(), RuntimeRejection>) {
        self.script.lock().push_back(outcome);
    }

    /// Block every call for `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Identities in call order
    pub fn seen(&self) -> Vec<UnitIdentity> {
        self.seen.lock().clone()
    }
}

impl HostRuntime for ScriptedRuntime {
    fn redefine(&self, identity: &UnitIdentity, _bytes: &[u8]) -> Result<(), RuntimeRejection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(identity.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Sink keeping every event in memory
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SwapEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SwapEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SwapEvent::kind).collect()
    }

    /// Target states of every `StateChanged` event, in order
    pub fn states(&self) -> Vec<PipelineState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SwapEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|event| event.kind() == kind).count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &SwapEvent) {
        self.events.lock().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// Sample live object
#[derive(Debug, Default)]
pub struct Session {
    pub id: usize,
    pub refreshed: AtomicUsize,
}

impl Session {
    pub fn refreshed(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }
}

/// Create and register `n` sessions for `identity`
pub fn register_sessions(registry: &InstanceRegistry, identity: &UnitIdentity, n: usize) -> Vec<Arc<Session>> {
    (0..n)
        .map(|id| {
            let session = Arc::new(Session {
                id,
                refreshed: AtomicUsize::new(0),
            });
            registry.register(&session, identity);
            session
        })
        .collect()
}

/// Hook bumping `Session::refreshed`, failing for ids below `fail_below`
pub fn session_hook(
    fail_below: usize,
) -> impl Fn(&dyn Tracked, &RedefinitionAttempt) -> Result<(), HookError> + Send + Sync + 'static {
    move |instance: &dyn Tracked, _attempt: &RedefinitionAttempt| {
        let session = instance.downcast_ref::<Session>().ok_or_else(|| HookError::TypeMismatch {
            expected: "Session",
            actual: instance.type_name(),
        })?;
        if session.id < fail_below {
            return Err(HookError::failed(format!("session {} refused refresh", session.id)));
        }
        session.refreshed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
