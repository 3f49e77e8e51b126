//! Host-runtime redefinition seam
//!
//! [`HostRuntime`] is the single narrow interface to whatever managed runtime
//! hosts the target process. It has exactly one blocking method.
//! [`InMemoryRuntime`] is a reference implementation that keeps the current
//! bytes of each loaded unit in memory.

use dashmap::DashMap;
use hotswap_unit::UnitIdentity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Why the runtime refused a redefinition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The runtime detected a schema change the validator missed
    SchemaChange,
    /// The runtime does not support this kind of redefinition
    Unsupported,
    /// The unit is not loaded
    NotLoaded,
    /// Temporarily unable to redefine (locks, safepoints, contention)
    ResourceContention,
    /// Anything else
    Other,
}

/// Raw rejection returned by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct RuntimeRejection {
    pub kind: RejectionKind,
    pub detail: String,
}

impl RuntimeRejection {
    #[must_use]
    pub fn new(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Live-redefinition facility of the host runtime
///
/// `redefine` blocks until the runtime accepts or refuses the new bytes; the
/// coordinator always calls it off the async executor.
pub trait HostRuntime: Send + Sync {
    /// Replace the code of `identity` with `bytes`
    ///
    /// # Errors
    /// Returns the runtime's rejection verbatim.
    fn redefine(&self, identity: &UnitIdentity, bytes: &[u8]) -> Result<(), RuntimeRejection>;
}

impl<R: HostRuntime + ?Sized> HostRuntime for Arc<R> {
    fn redefine(&self, identity: &UnitIdentity, bytes: &[u8]) -> Result<(), RuntimeRejection> {
        (**self).redefine(identity, bytes)
    }
}

/// In-memory reference runtime
///
/// Units must be [`load`](Self::load)ed before they can be redefined.
/// Rejections can be scripted per call or per unit.
#[derive(Default)]
pub struct InMemoryRuntime {
    loaded: DashMap<UnitIdentity, Arc<[u8]>>,
    always_reject: DashMap<UnitIdentity, RuntimeRejection>,
    queued: Mutex<VecDeque<RuntimeRejection>>,
    calls: AtomicUsize,
    accepted: AtomicUsize,
}

impl InMemoryRuntime {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a unit's initial bytes
    pub fn load(&self, identity: UnitIdentity, bytes: impl Into<Arc<[u8]>>) {
        self.loaded.insert(identity, bytes.into());
    }

    /// Unload a unit
    pub fn unload(&self, identity: &UnitIdentity) -> bool {
        self.loaded.remove(identity).is_some()
    }

    /// Bytes currently installed for `identity`
    #[must_use]
    pub fn current(&self, identity: &UnitIdentity) -> Option<Arc<[u8]>> {
        self.loaded.get(identity).map(|b| Arc::clone(b.value()))
    }

    /// Reject every redefinition of `identity`
    pub fn reject_always(&self, identity: UnitIdentity, rejection: RuntimeRejection) {
        self.always_reject.insert(identity, rejection);
    }

    /// Reject the next call, whatever unit it targets
    pub fn reject_next(&self, rejection: RuntimeRejection) {
        self.queued.lock().push_back(rejection);
    }

    /// Total `redefine` calls received
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that installed new bytes
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl HostRuntime for InMemoryRuntime {
    fn redefine(&self, identity: &UnitIdentity, bytes: &[u8]) -> Result<(), RuntimeRejection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(rejection) = self.queued.lock().pop_front() {
            return Err(rejection);
        }
        if let Some(rejection) = self.always_reject.get(identity) {
            return Err(rejection.value().clone());
        }
        let Some(mut current) = self.loaded.get_mut(identity) else {
            return Err(RuntimeRejection::new(
                RejectionKind::NotLoaded,
                format!("{identity} is not loaded"),
            ));
        };
        *current = Arc::from(bytes);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl fmt::Debug for InMemoryRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRuntime")
            .field("loaded", &self.loaded.len())
            .field("calls", &self.calls())
            .field("accepted", &self.accepted())
            .finish_non_exhaustive()
    }
}
