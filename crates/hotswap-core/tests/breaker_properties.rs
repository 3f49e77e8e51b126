//! Circuit breaker properties (all events inside one window)

use hotswap_core::{BreakerConfig, BreakerState, CircuitBreaker};
use proptest::prelude::*;

proptest! {
    #[test]
    fn opens_exactly_at_threshold(threshold in 1u32..6, outcomes in prop::collection::vec(any::<bool>(), 0..40)) {
        let breaker = CircuitBreaker::new(&BreakerConfig::default().with_threshold(threshold));
        let mut consecutive = 0u32;
        let mut open = false;
        let mut opened = 0u64;

        for success in outcomes {
            if success {
                // Outside a half-open trial a success never closes the breaker.
                prop_assert!(breaker.record_success().is_none());
                if !open {
                    consecutive = 0;
                }
            } else {
                let transition = breaker.record_failure();
                if !open {
                    consecutive += 1;
                    if consecutive >= threshold {
                        open = true;
                        opened += 1;
                        prop_assert_eq!(transition.map(|t| t.to), Some(BreakerState::Open));
                    } else {
                        prop_assert!(transition.is_none());
                    }
                }
            }
            let expected = if open { BreakerState::Open } else { BreakerState::Closed };
            prop_assert_eq!(breaker.state(), expected);
        }
        prop_assert_eq!(breaker.snapshot().opened_total, opened);
    }

    #[test]
    fn open_breaker_refuses_permits(threshold in 1u32..4) {
        let breaker = CircuitBreaker::new(&BreakerConfig::default().with_threshold(threshold));
        for _ in 0..threshold {
            breaker.record_failure();
        }
        let degraded = breaker.try_acquire().unwrap_err();
        prop_assert!(degraded.retry_after.as_secs() <= 30);
    }

    #[test]
    fn successes_from_closed_permits_never_close(threshold in 1u32..4, permits in 1usize..5) {
        let breaker = CircuitBreaker::new(&BreakerConfig::default().with_threshold(threshold));
        let held: Vec<_> = (0..permits).map(|_| breaker.try_acquire().unwrap()).collect();
        for _ in 0..threshold {
            breaker.record_failure();
        }
        for permit in held {
            prop_assert!(permit.success().is_none());
        }
        prop_assert_eq!(breaker.state(), BreakerState::Open);
        prop_assert!(breaker.try_acquire().is_err());
    }
}
