//! Property-based tests for backoff timing.

use std::time::Duration;

use gridlet_delivery::{backoff, RetryDecision, RetryPolicy};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        fork: false,
        failure_persistence: None,
        source_file: None,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn backoff_stays_within_bounds(n in 0u32..64, base in 2u64..16, max in 1u64..3600) {
        let delay = backoff(n, base, max);

        prop_assert!(delay >= Duration::from_secs(1));
        prop_assert!(delay <= Duration::from_secs(max));
        prop_assert_eq!(delay.subsec_nanos(), 0);
    }

    #[test]
    fn backoff_is_monotonic(n in 0u32..63, base in 2u64..16, max in 1u64..3600) {
        prop_assert!(backoff(n, base, max) <= backoff(n + 1, base, max));
    }

    #[test]
    fn retries_stop_exactly_at_max_attempts(max_attempts in 1u32..20, attempt in 1u32..40) {
        let policy = RetryPolicy { max_attempts, ..RetryPolicy::default() };

        match policy.decide(attempt) {
            RetryDecision::Retry { delay } => {
                prop_assert!(attempt < max_attempts);
                prop_assert_eq!(delay, policy.retry_delay(attempt));
            },
            RetryDecision::GiveUp { .. } => prop_assert!(attempt >= max_attempts),
        }
    }
}
