use hotswap_instances::{InstanceRegistry, InstanceStatus};
use hotswap_unit::UnitIdentity;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug)]
struct Probe(usize);

fn unit() -> UnitIdentity {
    UnitIdentity::new("com.acme.Probe").unwrap()
}

proptest! {
    #[test]
    fn reclaimed_objects_are_never_yielded(
        alive in prop::collection::vec(any::<bool>(), 1..64),
    ) {
        let registry = InstanceRegistry::new();
        let mut objects: Vec<Option<Arc<Probe>>> = alive
            .iter()
            .enumerate()
            .map(|(i, _)| Some(Arc::new(Probe(i))))
            .collect();
        for o in objects.iter().flatten() {
            registry.register(o, &unit());
        }

        for (slot, keep) in objects.iter_mut().zip(&alive) {
            if !keep {
                *slot = None;
            }
        }

        let expected: Vec<usize> = alive
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();

        prop_assert_eq!(registry.count(&unit()), expected.len());

        let mut yielded: Vec<usize> = registry
            .find(&unit())
            .map(|t| t.downcast_ref::<Probe>().map(|p| p.0).unwrap())
            .collect();
        yielded.sort_unstable();
        prop_assert_eq!(&yielded, &expected);

        // Second scan sees the same live set and prunes nothing more.
        let pruned = registry.stats().pruned_total;
        prop_assert_eq!(registry.find(&unit()).count(), expected.len());
        prop_assert_eq!(registry.stats().pruned_total, pruned);
        prop_assert_eq!(pruned as usize, alive.len() - expected.len());
    }

    #[test]
    fn reregistration_never_duplicates(repeats in 1usize..8) {
        let registry = InstanceRegistry::new();
        let object = Arc::new(Probe(0));
        let first = registry.register(&object, &unit());
        for _ in 0..repeats {
            prop_assert_eq!(&registry.register(&object, &unit()), &first);
        }
        prop_assert_eq!(registry.count(&unit()), 1);
        prop_assert_eq!(registry.status(&first), Some(InstanceStatus::Pending));
    }
}

#[test]
fn freed_slots_are_recycled_after_pruning() {
    let registry = InstanceRegistry::new();
    let first: Vec<Arc<Probe>> = (0..10).map(|i| Arc::new(Probe(i))).collect();
    for o in &first {
        registry.register(o, &unit());
    }
    drop(first);
    assert_eq!(registry.sweep(), 10);

    let second: Vec<Arc<Probe>> = (0..10).map(|i| Arc::new(Probe(i))).collect();
    let handles: Vec<_> = second.iter().map(|o| registry.register(o, &unit())).collect();
    assert!(handles.iter().all(|h| h.slot() < 10));
    assert_eq!(registry.count(&unit()), 10);
}
