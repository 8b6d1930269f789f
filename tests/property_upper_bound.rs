//! Property tests for the counter invariants.

mod common;

use common::{init_test_logging, run, test_proptest_config};
use proptest::prelude::*;
use racelab::{AccessStrategy, HarnessConfig, Substrate};

proptest! {
    #![proptest_config(test_proptest_config(32))]

    #[test]
    fn unsynchronized_counter_never_exceeds_serial_result(
        workers in 1usize..=4,
        iterations in 1u32..=800,
        delay in 0u64..=4,
        seed in any::<u64>(),
    ) {
        init_test_logging();
        let (report, _) = run(
            HarnessConfig::counter()
                .with_workers(workers)
                .with_iterations(iterations)
                .with_interleave_delay_micros(delay)
                .with_substrate(Substrate::stepped(seed)),
        );
        let serial = workers as u32 * iterations;
        prop_assert!(report.outcome.actual <= serial);
        prop_assert!(report.outcome.actual >= 1);
    }

    #[test]
    fn single_worker_never_races(
        iterations in 1u32..=800,
        delay in 0u64..=4,
        seed in any::<u64>(),
    ) {
        init_test_logging();
        let (report, _) = run(
            HarnessConfig::counter()
                .with_workers(1)
                .with_iterations(iterations)
                .with_interleave_delay_micros(delay)
                .with_substrate(Substrate::stepped(seed)),
        );
        prop_assert_eq!(report.outcome.actual, iterations);
    }

    #[test]
    fn atomic_counter_is_always_exact(
        workers in 1usize..=4,
        iterations in 1u32..=800,
        seed in any::<u64>(),
    ) {
        init_test_logging();
        let (report, _) = run(
            HarnessConfig::counter()
                .with_workers(workers)
                .with_iterations(iterations)
                .with_strategy(AccessStrategy::Atomic)
                .with_substrate(Substrate::stepped(seed)),
        );
        prop_assert_eq!(report.outcome.actual, workers as u32 * iterations);
    }
}
