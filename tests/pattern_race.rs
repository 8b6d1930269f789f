//! Torn snapshots in the LED pattern variant.

mod common;

use std::collections::BTreeSet;

use common::{init_test_logging, run};
use racelab::{Expected, Frame, HarnessConfig, Sampling, Substrate, Verdict};

const WRITTEN: [u32; 4] = [0x00, 0x01, 0x02, 0x04];
const SEEDS: u64 = 16;

fn pattern(seed: u64, sampling: Sampling) -> HarnessConfig {
    HarnessConfig::pattern()
        .with_substrate(Substrate::stepped(seed))
        .with_sampling(sampling)
}

#[test]
fn independent_sampling_publishes_torn_frames() {
    init_test_logging();
    for seed in 0..SEEDS {
        let (report, sink) = run(pattern(seed, Sampling::Independent));
        assert_eq!(report.outcome.expected, Expected::AnyOf(WRITTEN.to_vec()));
        // 2 workers × 40 iterations × 2 steps
        assert_eq!(sink.frames().len(), 160);

        let torn: BTreeSet<Frame> = report
            .frames()
            .filter(|frame| !WRITTEN.contains(&frame.bits()))
            .collect();
        assert!(!torn.is_empty(), "seed {seed}: no torn frame");
        assert_eq!(
            report.outcome.torn_frames.iter().copied().collect::<BTreeSet<_>>(),
            torn
        );
        assert_eq!(report.outcome.verdict, Verdict::RaceDetected);
    }
}

#[test]
fn atomic_sampling_only_publishes_written_frames() {
    init_test_logging();
    for seed in 0..SEEDS {
        let (report, sink) = run(pattern(seed, Sampling::Atomic));
        assert!(
            sink.frames().iter().all(|f| WRITTEN.contains(&f.bits())),
            "seed {seed}: {:?}",
            sink.frames()
        );
        assert!(report.outcome.torn_frames.is_empty());
        assert_eq!(report.outcome.verdict, Verdict::RaceNotObservedThisRun);
    }
}

#[test]
fn finale_leaves_blue_steady() {
    init_test_logging();
    let (report, sink) = run(pattern(3, Sampling::Atomic));
    assert_eq!(sink.levels(), Frame::from_bits(0x04));
    // The outcome is taken before the finale overwrites the cell.
    assert!(WRITTEN.contains(&report.outcome.actual));
}

#[test]
fn each_worker_publishes_its_own_passes() {
    init_test_logging();
    let (report, sink) = run(pattern(5, Sampling::Atomic).with_iterations(4));
    assert_eq!(report.workers.len(), 2);
    for worker in &report.workers {
        assert_eq!(worker.frames.len(), 8);
        assert_eq!(sink.frames_of(worker.id), worker.frames);
        assert_eq!(worker.operations, 8);
    }
}
