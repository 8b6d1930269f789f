//! Shared helpers for the scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use proptest::prelude::ProptestConfig;
use racelab::{Harness, HarnessConfig, RecordingSink, RunReport};

static INIT_LOGGING: Once = Once::new();

/// Route harness logs to the test writer, once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Proptest config with a fixed case count and no persistence files.
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

/// Run `config` against a fresh recording sink.
pub fn run(config: HarnessConfig) -> (RunReport, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let report = Harness::new(config, sink.clone())
        .run()
        .expect("harness failed to start");
    (report, sink)
}
