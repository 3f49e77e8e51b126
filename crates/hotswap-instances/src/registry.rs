//! Non-owning registry of live instances
//!
//! Provides [`InstanceRegistry`], which tracks allocated objects per
//! [`UnitIdentity`] without ever keeping them alive.
//!
//! # Layout
//!
//! - One shard per identity (`DashMap<UnitIdentity, Arc<Shard>>`), so
//!   registrations for different units never contend.
//! - Each shard is a slot arena behind a `parking_lot::Mutex`. A slot holds a
//!   `Weak` liveness probe, a generation counter, the update status and the
//!   attempt that last touched the instance.
//! - [`InstanceHandle`] is `(identity, slot, generation)`. Pruning a slot bumps
//!   its generation, so old handles stop resolving.
//!
//! Dead entries are pruned lazily while [`InstanceRegistry::find`] walks the
//! arena, or eagerly by [`InstanceRegistry::sweep`].

use crate::status::{can_transition, InstanceStatus};
use dashmap::DashMap;
use hotswap_unit::{AttemptId, UnitIdentity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Anything that can be tracked as a live instance
///
/// Blanket-implemented for every `Send + Sync + 'static` type.
pub trait Tracked: Any + Send + Sync {
    /// Upcast for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Concrete type name, for reports
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> Tracked for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn Tracked {
    /// Downcast to a concrete instance type
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the instance is a `T`
    #[inline]
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Generation-checked handle to a registry slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceHandle {
    identity: UnitIdentity,
    slot: usize,
    generation: u64,
}

impl InstanceHandle {
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    #[inline]
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A live instance yielded by [`InstanceRegistry::find`]
///
/// Holds a temporary strong reference; drop it once processed.
#[derive(Clone)]
pub struct TrackedInstance {
    handle: InstanceHandle,
    status: InstanceStatus,
    last_attempt: Option<AttemptId>,
    instance: Arc<dyn Tracked>,
}

impl TrackedInstance {
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.handle.identity
    }

    /// Status at the time the instance was yielded
    #[inline]
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Attempt that last changed the status
    #[inline]
    #[must_use]
    pub fn last_attempt(&self) -> Option<AttemptId> {
        self.last_attempt
    }

    /// The instance itself
    #[inline]
    #[must_use]
    pub fn instance(&self) -> &dyn Tracked {
        &*self.instance
    }

    /// Downcast to a concrete type
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.instance().downcast_ref::<T>()
    }
}

impl fmt::Debug for TrackedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedInstance")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .field("last_attempt", &self.last_attempt)
            .field("type", &self.instance.type_name())
            .finish()
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Handle no longer refers to a live entry
    #[error("stale instance handle {identity}#{slot}")]
    StaleHandle { identity: UnitIdentity, slot: usize },

    /// Status change not permitted
    #[error("illegal instance status transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Identities with a shard
    pub identities: usize,
    /// Live entries across all shards
    pub live: usize,
    /// Entries pruned since creation
    pub pruned_total: u64,
}

struct Entry {
    instance: Weak<dyn Tracked>,
    addr: usize,
    status: InstanceStatus,
    last_attempt: Option<AttemptId>,
}

impl Entry {
    #[inline]
    fn is_live(&self) -> bool {
        self.instance.strong_count() > 0
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_addr: HashMap<usize, usize>,
}

impl Arena {
    fn insert(&mut self, instance: Weak<dyn Tracked>, addr: usize) -> (usize, u64, bool) {
        let mut pruned = false;
        if let Some(&idx) = self.by_addr.get(&addr) {
            let live = self.slots[idx].entry.as_ref().is_some_and(Entry::is_live);
            if live {
                return (idx, self.slots[idx].generation, false);
            }
            // Address reused by a new allocation after the old one died.
            pruned = self.prune(idx);
        }

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        self.slots[idx].entry = Some(Entry {
            instance,
            addr,
            status: InstanceStatus::Pending,
            last_attempt: None,
        });
        self.by_addr.insert(addr, idx);
        (idx, self.slots[idx].generation, pruned)
    }

    fn prune(&mut self, idx: usize) -> bool {
        let Some(slot) = self.slots.get_mut(idx) else {
            return false;
        };
        let Some(entry) = slot.entry.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        if self.by_addr.get(&entry.addr) == Some(&idx) {
            self.by_addr.remove(&entry.addr);
        }
        self.free.push(idx);
        true
    }

    fn prune_dead(&mut self) -> usize {
        let dead: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.as_ref().is_some_and(|e| !e.is_live()))
            .map(|(idx, _)| idx)
            .collect();
        dead.into_iter().filter(|&idx| self.prune(idx)).count()
    }

    fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.entry.as_ref().is_some_and(Entry::is_live))
            .count()
    }

    fn entry(&self, handle: &InstanceHandle) -> Option<&Entry> {
        let slot = self.slots.get(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().filter(|e| e.is_live())
    }

    fn entry_mut(&mut self, handle: &InstanceHandle) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut().filter(|e| e.is_live())
    }
}

#[derive(Default)]
struct Shard {
    arena: Mutex<Arena>,
}

/// Concurrent, non-owning instance registry
///
/// Safe to share across tasks; callers never need external locking.
#[derive(Default)]
pub struct InstanceRegistry {
    shards: DashMap<UnitIdentity, Arc<Shard>>,
    pruned: Arc<AtomicU64>,
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("identities", &self.shards.len())
            .field("pruned_total", &self.pruned.load(Ordering::Relaxed))
            .finish()
    }
}

impl InstanceRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance of `identity`
    ///
    /// Idempotent per object: registering the same live object twice returns
    /// the same handle. Only a `Weak` reference is kept.
    pub fn register<T: Tracked>(&self, instance: &Arc<T>, identity: &UnitIdentity) -> InstanceHandle {
        let weak: Weak<T> = Arc::downgrade(instance);
        let weak: Weak<dyn Tracked> = weak;
        self.insert(identity, weak, address_of(instance))
    }

    /// Register an already type-erased instance
    pub fn register_dyn(&self, instance: &Arc<dyn Tracked>, identity: &UnitIdentity) -> InstanceHandle {
        self.insert(identity, Arc::downgrade(instance), address_of(instance))
    }

    /// Allocation-site spelling of [`register`](Self::register)
    #[inline]
    pub fn track<T: Tracked>(&self, identity: &UnitIdentity, instance: &Arc<T>) -> InstanceHandle {
        self.register(instance, identity)
    }

    fn insert(&self, identity: &UnitIdentity, instance: Weak<dyn Tracked>, addr: usize) -> InstanceHandle {
        let shard = self.shard_or_create(identity);
        let (slot, generation, pruned) = shard.arena.lock().insert(instance, addr);
        if pruned {
            self.pruned.fetch_add(1, Ordering::Relaxed);
        }
        trace!(%identity, slot, generation, "instance registered");
        InstanceHandle {
            identity: identity.clone(),
            slot,
            generation,
        }
    }

    /// Lazily enumerate live instances of `identity`
    ///
    /// Reclaimed entries are pruned as the enumeration passes them and are
    /// never yielded. The enumeration is finite and can be restarted with
    /// [`Instances::rewind`].
    #[must_use]
    pub fn find(&self, identity: &UnitIdentity) -> Instances {
        Instances {
            identity: identity.clone(),
            shard: self.shard(identity),
            pruned: Arc::clone(&self.pruned),
            cursor: 0,
        }
    }

    /// Number of live instances of `identity`, without materializing them
    #[must_use]
    pub fn count(&self, identity: &UnitIdentity) -> usize {
        self.shard(identity)
            .map_or(0, |shard| shard.arena.lock().live_count())
    }

    /// Current status of the entry behind `handle`
    #[must_use]
    pub fn status(&self, handle: &InstanceHandle) -> Option<InstanceStatus> {
        let shard = self.shard(&handle.identity)?;
        let arena = shard.arena.lock();
        arena.entry(handle).map(|e| e.status)
    }

    /// Resolve a handle to its instance, if still alive
    #[must_use]
    pub fn get(&self, handle: &InstanceHandle) -> Option<Arc<dyn Tracked>> {
        let shard = self.shard(&handle.identity)?;
        let arena = shard.arena.lock();
        arena.entry(handle).and_then(|e| e.instance.upgrade())
    }

    /// Change the status of a tracked instance
    pub(crate) fn transition(
        &self,
        handle: &InstanceHandle,
        to: InstanceStatus,
        attempt: AttemptId,
    ) -> Result<InstanceStatus, RegistryError> {
        let stale = || RegistryError::StaleHandle {
            identity: handle.identity.clone(),
            slot: handle.slot,
        };
        let shard = self.shard(&handle.identity).ok_or_else(stale)?;
        let mut arena = shard.arena.lock();
        let entry = arena.entry_mut(handle).ok_or_else(stale)?;
        let from = entry.status;
        if !can_transition(from, to) {
            return Err(RegistryError::IllegalTransition { from, to });
        }
        entry.status = to;
        entry.last_attempt = Some(attempt);
        Ok(from)
    }

    /// Prune dead entries in every shard, returning how many were removed
    pub fn sweep(&self) -> usize {
        let shards: Vec<Arc<Shard>> = self.shards.iter().map(|s| Arc::clone(s.value())).collect();
        let pruned: usize = shards.iter().map(|s| s.arena.lock().prune_dead()).sum();
        if pruned > 0 {
            self.pruned.fetch_add(pruned as u64, Ordering::Relaxed);
            debug!(pruned, "registry sweep");
        }
        pruned
    }

    /// Drop all bookkeeping for `identity`, returning the live entries dropped
    pub fn forget(&self, identity: &UnitIdentity) -> usize {
        self.shards
            .remove(identity)
            .map_or(0, |(_, shard)| shard.arena.lock().live_count())
    }

    /// Identities with at least one registration
    #[must_use]
    pub fn identities(&self) -> Vec<UnitIdentity> {
        let mut ids: Vec<UnitIdentity> = self.shards.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Aggregate statistics
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let shards: Vec<Arc<Shard>> = self.shards.iter().map(|s| Arc::clone(s.value())).collect();
        RegistryStats {
            identities: shards.len(),
            live: shards.iter().map(|s| s.arena.lock().live_count()).sum(),
            pruned_total: self.pruned.load(Ordering::Relaxed),
        }
    }

    fn shard(&self, identity: &UnitIdentity) -> Option<Arc<Shard>> {
        self.shards.get(identity).map(|s| Arc::clone(s.value()))
    }

    fn shard_or_create(&self, identity: &UnitIdentity) -> Arc<Shard> {
        Arc::clone(self.shards.entry(identity.clone()).or_default().value())
    }
}

fn address_of<T: ?Sized>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance).cast::<()>() as usize
}

/// Lazy enumeration of live instances of one identity
pub struct Instances {
    identity: UnitIdentity,
    shard: Option<Arc<Shard>>,
    pruned: Arc<AtomicU64>,
    cursor: usize,
}

impl Instances {
    /// Identity being enumerated
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// Restart from the first slot
    #[inline]
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for Instances {
    type Item = TrackedInstance;

    fn next(&mut self) -> Option<TrackedInstance> {
        let shard = self.shard.as_ref()?;
        loop {
            // Lock per step so registrations interleave with long scans.
            let mut arena = shard.arena.lock();
            let idx = self.cursor;
            let slot = arena.slots.get(idx)?;
            self.cursor += 1;

            let generation = slot.generation;
            let Some(entry) = slot.entry.as_ref() else {
                continue;
            };
            let (status, last_attempt) = (entry.status, entry.last_attempt);
            match entry.instance.upgrade() {
                Some(instance) => {
                    return Some(TrackedInstance {
                        handle: InstanceHandle {
                            identity: self.identity.clone(),
                            slot: idx,
                            generation,
                        },
                        status,
                        last_attempt,
                        instance,
                    });
                }
                None => {
                    if arena.prune(idx) {
                        self.pruned.fetch_add(1, Ordering::Relaxed);
                        trace!(identity = %self.identity, slot = idx, "pruned reclaimed instance");
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Instances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instances")
            .field("identity", &self.identity)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

/// Periodically sweep dead entries until the registry is dropped
pub fn spawn_sweeper(registry: &Arc<InstanceRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let registry = Arc::downgrade(registry);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                debug!("registry dropped, sweeper exiting");
                break;
            };
            registry.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Widget(u32);

    fn id(name: &str) -> UnitIdentity {
        UnitIdentity::new(name).unwrap()
    }

    #[test]
    fn register_find_count() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let objects: Vec<Arc<Widget>> = (0..3).map(|i| Arc::new(Widget(i))).collect();
        for o in &objects {
            registry.register(o, &unit);
        }

        assert_eq!(registry.count(&unit), 3);
        let mut seen: Vec<u32> = registry
            .find(&unit)
            .map(|t| t.downcast_ref::<Widget>().unwrap().0)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(registry.count(&id("com.acme.Other")), 0);
        assert_eq!(registry.find(&id("com.acme.Other")).count(), 0);
    }

    #[derive(Debug)]
    struct Gadget(u8);

    #[test]
    fn concrete_types_share_an_identity() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let widget = Arc::new(Widget(3));
        let gadget = Arc::new(Gadget(1));
        registry.register(&widget, &unit);
        registry.register(&gadget, &unit);

        assert_eq!(registry.count(&unit), 2);
        let gadgets: Vec<u8> = registry
            .find(&unit)
            .filter_map(|t| t.downcast_ref::<Gadget>().map(|g| g.0))
            .collect();
        assert_eq!(gadgets, vec![1]);
        assert_eq!(Arc::strong_count(&widget), 1);
    }

    #[test]
    fn registry_does_not_keep_instances_alive() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let object = Arc::new(Widget(7));
        registry.register(&object, &unit);

        assert_eq!(Arc::strong_count(&object), 1);
        let weak = Arc::downgrade(&object);
        drop(object);
        assert!(weak.upgrade().is_none());

        assert_eq!(registry.count(&unit), 0);
        assert_eq!(registry.find(&unit).count(), 0);
        assert_eq!(registry.stats().pruned_total, 1);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let object = Arc::new(Widget(1));
        let a = registry.register(&object, &unit);
        let b = registry.track(&unit, &object);
        assert_eq!(a, b);
        assert_eq!(registry.count(&unit), 1);
    }

    #[test]
    fn pruned_handle_goes_stale() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let object = Arc::new(Widget(1));
        let handle = registry.register(&object, &unit);
        assert_eq!(registry.status(&handle), Some(InstanceStatus::Pending));
        assert!(registry.get(&handle).is_some());

        drop(object);
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.status(&handle), None);

        let replacement = Arc::new(Widget(2));
        let new_handle = registry.register(&replacement, &unit);
        assert_eq!(new_handle.slot(), handle.slot());
        assert_ne!(new_handle.generation(), handle.generation());
        assert!(registry.get(&handle).is_none());
    }

    #[test]
    fn rewind_restarts_enumeration() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let objects: Vec<Arc<Widget>> = (0..4).map(|i| Arc::new(Widget(i))).collect();
        for o in &objects {
            registry.register(o, &unit);
        }

        let mut instances = registry.find(&unit);
        assert_eq!(instances.by_ref().take(2).count(), 2);
        instances.rewind();
        assert_eq!(instances.count(), 4);
    }

    #[test]
    fn transition_enforces_status_rules() {
        let registry = InstanceRegistry::new();
        let unit = id("com.acme.Widget");
        let object = Arc::new(Widget(1));
        let handle = registry.register(&object, &unit);
        let attempt = AttemptId::new();

        assert_eq!(
            registry.transition(&handle, InstanceStatus::Updated, attempt),
            Ok(InstanceStatus::Pending)
        );
        assert_eq!(
            registry.transition(&handle, InstanceStatus::Updated, attempt),
            Err(RegistryError::IllegalTransition {
                from: InstanceStatus::Updated,
                to: InstanceStatus::Updated
            })
        );
        let tracked = registry.find(&unit).next().unwrap();
        assert_eq!(tracked.last_attempt(), Some(attempt));
    }

    #[test]
    fn forget_and_identities() {
        let registry = InstanceRegistry::new();
        let a = Arc::new(Widget(1));
        let b = Arc::new(Widget(2));
        registry.register(&a, &id("com.acme.B"));
        registry.register(&b, &id("com.acme.A"));

        assert_eq!(registry.identities(), vec![id("com.acme.A"), id("com.acme.B")]);
        assert_eq!(registry.forget(&id("com.acme.A")), 1);
        assert_eq!(registry.stats().identities, 1);
        assert_eq!(registry.stats().live, 1);
    }

    #[test]
    fn concurrent_registration_without_external_locking() {
        let registry = Arc::new(InstanceRegistry::new());
        let unit = id("com.acme.Widget");

        let keep: Vec<Vec<Arc<Widget>>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|t| {
                    let registry = Arc::clone(&registry);
                    let unit = unit.clone();
                    scope.spawn(move || {
                        let objects: Vec<Arc<Widget>> =
                            (0..50).map(|i| Arc::new(Widget(t * 100 + i))).collect();
                        for o in &objects {
                            registry.register(o, &unit);
                            let _ = registry.find(&unit).count();
                        }
                        objects
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(registry.count(&unit), 200);
        drop(keep);
        assert_eq!(registry.count(&unit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_prunes_in_background() {
        let registry = Arc::new(InstanceRegistry::new());
        let unit = id("com.acme.Widget");
        let object = Arc::new(Widget(1));
        registry.register(&object, &unit);
        drop(object);

        let handle = spawn_sweeper(&registry, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.stats().pruned_total, 1);

        drop(registry);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.await.is_ok());
    }
}
