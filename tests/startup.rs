//! Startup failures: nothing may run when the harness refuses to start.

mod common;

use std::sync::Arc;

use common::init_test_logging;
use racelab::{
    Channel, Frame, Harness, HarnessConfig, HarnessError, OutputSink, RecordingSink, TraceSink,
};

#[test]
fn unready_channel_aborts_before_any_worker_exists() {
    init_test_logging();
    let sink = Arc::new(RecordingSink::with_fault(Channel::BLUE));
    let err = Harness::new(HarnessConfig::pattern(), sink.clone())
        .run()
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::ResourceNotReady { channel: Channel::BLUE, .. }
    ));
    assert_eq!(sink.writes(), 0);
    assert!(sink.frames().is_empty());
}

#[test]
fn unwired_channel_is_reported_with_its_cause() {
    init_test_logging();
    let sink: Arc<dyn OutputSink> = Arc::new(TraceSink::with_wiring(Frame::from_bits(0x05)));
    let err = Harness::new(HarnessConfig::counter(), sink).run().unwrap_err();
    let chain = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(err.to_string(), "output channel green is not ready");
    assert_eq!(chain.as_deref(), Some("channel green is not wired"));
}

#[test]
fn invalid_worker_count_is_rejected() {
    init_test_logging();
    let sink = Arc::new(RecordingSink::new());
    let err = Harness::new(HarnessConfig::counter().with_workers(64), sink.clone())
        .run()
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidConfig { .. }));
    assert_eq!(sink.writes(), 0);
}
