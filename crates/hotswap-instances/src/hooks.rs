//! Per-identity migration callbacks
//!
//! Framework adapters register these; the migrator only invokes them.
//!
//! - [`PostUpdateHook`]: re-initialize derived state of an instance after its
//!   unit was redefined (state-preserving refresh).
//! - [`ExternalRefresher`]: hand the instance back to the container that owns
//!   it (dependency injection, pooling) so the container refreshes it.

use crate::registry::Tracked;
use dashmap::DashMap;
use hotswap_unit::{RedefinitionAttempt, UnitIdentity};
use std::fmt;
use std::sync::Arc;

/// Failure reported by a hook or refresher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// Callback returned an error
    #[error("hook failed: {0}")]
    Failed(String),

    /// Callback panicked
    #[error("hook panicked: {0}")]
    Panicked(String),

    /// Instance was not of the type the callback expects
    #[error("unexpected instance type {actual}, expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The selected strategy needs a refresher that is not registered
    #[error("no external refresher registered for {0}")]
    NoRefresher(UnitIdentity),
}

impl HookError {
    /// Convenience constructor for [`HookError::Failed`]
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// State-preserving refresh callback
pub trait PostUpdateHook: Send + Sync {
    /// Called once per live instance after a successful redefinition
    ///
    /// # Errors
    /// An error marks this instance FAILED; the batch continues.
    fn on_redefined(&self, instance: &dyn Tracked, attempt: &RedefinitionAttempt) -> Result<(), HookError>;
}

impl<F> PostUpdateHook for F
where
    F: Fn(&dyn Tracked, &RedefinitionAttempt) -> Result<(), HookError> + Send + Sync,
{
    fn on_redefined(&self, instance: &dyn Tracked, attempt: &RedefinitionAttempt) -> Result<(), HookError> {
        self(instance, attempt)
    }
}

/// Container-owned refresh callback
pub trait ExternalRefresher: Send + Sync {
    /// Ask the owning container to refresh `instance`
    ///
    /// # Errors
    /// An error marks this instance FAILED; the batch continues.
    fn refresh(&self, instance: &dyn Tracked, attempt: &RedefinitionAttempt) -> Result<(), HookError>;
}

/// Adapter turning a closure into an [`ExternalRefresher`]
struct RefreshFn<F>(F);

impl<F> ExternalRefresher for RefreshFn<F>
where
    F: Fn(&dyn Tracked, &RedefinitionAttempt) -> Result<(), HookError> + Send + Sync,
{
    fn refresh(&self, instance: &dyn Tracked, attempt: &RedefinitionAttempt) -> Result<(), HookError> {
        (self.0)(instance, attempt)
    }
}

/// Registered callbacks, keyed by unit identity
#[derive(Default)]
pub struct MigrationHooks {
    post_update: DashMap<UnitIdentity, Arc<dyn PostUpdateHook>>,
    refreshers: DashMap<UnitIdentity, Arc<dyn ExternalRefresher>>,
}

impl MigrationHooks {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post-update hook (replaces any previous one)
    pub fn set_post_update(&self, identity: UnitIdentity, hook: Arc<dyn PostUpdateHook>) {
        self.post_update.insert(identity, hook);
    }

    /// Register a closure as post-update hook
    pub fn on_post_update<F>(&self, identity: UnitIdentity, hook: F)
    where
        F: Fn(&dyn Tracked, &RedefinitionAttempt) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.set_post_update(identity, Arc::new(hook));
    }

    /// Register an external refresher (replaces any previous one)
    pub fn set_refresher(&self, identity: UnitIdentity, refresher: Arc<dyn ExternalRefresher>) {
        self.refreshers.insert(identity, refresher);
    }

    /// Register a closure as external refresher
    pub fn on_refresh<F>(&self, identity: UnitIdentity, refresher: F)
    where
        F: Fn(&dyn Tracked, &RedefinitionAttempt) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.set_refresher(identity, Arc::new(RefreshFn(refresher)));
    }

    /// Remove every callback for `identity`
    pub fn clear(&self, identity: &UnitIdentity) {
        self.post_update.remove(identity);
        self.refreshers.remove(identity);
    }

    #[must_use]
    pub fn post_update(&self, identity: &UnitIdentity) -> Option<Arc<dyn PostUpdateHook>> {
        self.post_update.get(identity).map(|h| Arc::clone(h.value()))
    }

    #[must_use]
    pub fn refresher(&self, identity: &UnitIdentity) -> Option<Arc<dyn ExternalRefresher>> {
        self.refreshers.get(identity).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn has_post_update(&self, identity: &UnitIdentity) -> bool {
        self.post_update.contains_key(identity)
    }

    #[must_use]
    pub fn has_refresher(&self, identity: &UnitIdentity) -> bool {
        self.refreshers.contains_key(identity)
    }
}

impl fmt::Debug for MigrationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationHooks")
            .field("post_update", &self.post_update.len())
            .field("refreshers", &self.refreshers.len())
            .finish()
    }
}
