//! # Event Hub Integration Tests
//!
//! Reconnection, replay monotonicity, registration deadlines, gap
//! surfacing, and the malformed-block fatal path, over a scripted
//! block source:
//!
//! | Test | Focus |
//! |------|-------|
//! | `reconnect_resumes_after_last_block` | replay cursor = last + 1, no gaps, no duplicates |
//! | `registration_timeout_forces_reconnect` | missing ack counts as a failure |
//! | `rejected_connections_eventually_recover` | backoff loop keeps trying |
//! | `gap_is_surfaced_and_stream_continues` | BlockGap event, delivery goes on |
//! | `duplicate_blocks_are_dropped` | at-least-once upstream, exactly-once dispatch |
//! | `malformed_block_is_fatal` | disconnect + alarm, no reconnect |

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use parking_lot::Mutex;

use fabric_client::event_hub::{BlockListener, EventHub, HubState, ReplayPosition};
use fabric_common::SdkConfig;
use fabric_proto::block;
use fabric_proto::common::Block;

/// Records every dispatch for later assertions.
#[derive(Default)]
struct RecordingListener {
    blocks: Mutex<Vec<u64>>,
    gaps: Mutex<Vec<(u64, u64)>>,
    fatals: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn block_numbers(&self) -> Vec<u64> {
        self.blocks.lock().clone()
    }
}

impl BlockListener for RecordingListener {
    fn on_block(&self, committed: &Block) {
        if let Ok(number) = block::block_number(committed) {
            self.blocks.lock().push(number);
        }
    }

    fn on_gap(&self, expected: u64, received: u64) {
        self.gaps.lock().push((expected, received));
    }

    fn on_fatal(&self, reason: &str) {
        self.fatals.lock().push(reason.to_string());
    }
}

fn hub_config() -> SdkConfig {
    SdkConfig {
        peer_event_registration_wait_time: 150,
        peer_retry_wait_time: 20,
        eventhub_reconnection_warning_rate: 2,
        ..SdkConfig::default()
    }
}

fn build_hub(source: &Arc<MockBlockSource>) -> (EventHub, Arc<RecordingListener>) {
    let block_source_concrete = Arc::clone(source);
    let block_source: Arc<dyn fabric_client::BlockSource> = block_source_concrete;
    let hub = EventHub::with_source("hub0", "grpc://peer0:7053", block_source);
    let listener = RecordingListener::new();
    let sink_concrete = Arc::clone(&listener);
    let sink: Arc<dyn BlockListener> = sink_concrete;
    hub.subscribe(sink);
    (hub, listener)
}

fn hub_identity() -> Arc<fabric_client::SigningIdentity> {
    let suite = Arc::new(fabric_common::CryptoSuite::default_suite());
    let user = test_user("events");
    suite
        .trust_store()
        .add_pem(&user.enrollment.cert_pem)
        .expect("anchor");
    Arc::new(fabric_client::SigningIdentity::bind(user, suite).expect("bind"))
}

async fn wait_connected(hub: &EventHub) {
    assert!(
        wait_until(Duration::from_secs(2), || hub.state() == HubState::Connected).await,
        "hub never connected (state {:?})",
        hub.state()
    );
}

// ── Scenario 4: reconnect resumes at last + 1 ───────────────────────────

#[tokio::test]
async fn reconnect_resumes_after_last_block() {
    let source = MockBlockSource::new([Session::Live, Session::Live]);
    let (hub, listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");
    wait_connected(&hub).await;

    for number in 1..=7u64 {
        source
            .feed(block_event(make_block(number, &[("tx", 0)])))
            .await;
    }
    assert!(
        wait_until(Duration::from_secs(2), || hub.last_block() == Some(7)).await,
        "blocks 1..=7 not dispatched"
    );

    // Stream drop forces a reconnect.
    source.drop_session();
    assert!(
        wait_until(Duration::from_secs(2), || source.starts.lock().len() == 2).await,
        "no reconnect happened"
    );
    wait_connected(&hub).await;

    {
        let starts = source.starts.lock();
        assert_eq!(starts[0], ReplayPosition::Newest, "first connect has no cursor");
        assert_eq!(starts[1], ReplayPosition::From(8), "resume strictly after last block");
    }

    for number in 8..=9u64 {
        source
            .feed(block_event(make_block(number, &[("tx", 0)])))
            .await;
    }
    assert!(
        wait_until(Duration::from_secs(2), || hub.last_block() == Some(9)).await,
        "blocks 8..=9 not dispatched"
    );

    // Strictly increasing, no gaps, no duplicates.
    assert_eq!(listener.block_numbers(), (1..=9).collect::<Vec<u64>>());
    assert!(listener.gaps.lock().is_empty());

    hub.shutdown().await;
    assert_eq!(hub.state(), HubState::Shutdown);
}

// ── Registration deadline ───────────────────────────────────────────────

#[tokio::test]
async fn registration_timeout_forces_reconnect() {
    let source = MockBlockSource::new([Session::NeverAcks, Session::Live]);
    let (hub, _listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");

    wait_connected(&hub).await;
    assert!(source.connects.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    assert!(hub.reconnect_attempts() >= 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn rejected_connections_eventually_recover() {
    let source = MockBlockSource::new([Session::Reject, Session::Reject, Session::Live]);
    let (hub, listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");

    wait_connected(&hub).await;
    assert!(hub.reconnect_attempts() >= 2);

    source.feed(block_event(make_block(1, &[("tx", 0)]))).await;
    assert!(wait_until(Duration::from_secs(2), || hub.blocks_delivered() == 1).await);
    assert_eq!(listener.block_numbers(), vec![1]);

    hub.shutdown().await;
}

// ── Gaps and duplicates ─────────────────────────────────────────────────

#[tokio::test]
async fn gap_is_surfaced_and_stream_continues() {
    let source = MockBlockSource::new([Session::Live]);
    let (hub, listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");
    wait_connected(&hub).await;

    source.feed(block_event(make_block(1, &[("tx", 0)]))).await;
    source.feed(block_event(make_block(5, &[("tx", 0)]))).await;
    assert!(wait_until(Duration::from_secs(2), || hub.last_block() == Some(5)).await);

    assert_eq!(listener.block_numbers(), vec![1, 5], "delivery continued past the gap");
    assert_eq!(listener.gaps.lock().clone(), vec![(2, 5)]);
    assert_eq!(hub.state(), HubState::Connected);

    hub.shutdown().await;
}

#[tokio::test]
async fn duplicate_blocks_are_dropped() {
    let source = MockBlockSource::new([Session::Live]);
    let (hub, listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");
    wait_connected(&hub).await;

    source.feed(block_event(make_block(1, &[("tx", 0)]))).await;
    source.feed(block_event(make_block(2, &[("tx", 0)]))).await;
    source.feed(block_event(make_block(2, &[("tx", 0)]))).await;
    source.feed(block_event(make_block(3, &[("tx", 0)]))).await;
    assert!(wait_until(Duration::from_secs(2), || hub.last_block() == Some(3)).await);

    assert_eq!(listener.block_numbers(), vec![1, 2, 3]);
    assert_eq!(hub.blocks_delivered(), 3);

    hub.shutdown().await;
}

// ── Malformed block is fatal ────────────────────────────────────────────

#[tokio::test]
async fn malformed_block_is_fatal() {
    let source = MockBlockSource::new([Session::Live]);
    let (hub, listener) = build_hub(&source);
    hub.connect(hub_identity(), &hub_config()).expect("connect");
    wait_connected(&hub).await;

    source.feed(block_event(make_block(1, &[("tx", 0)]))).await;
    assert!(wait_until(Duration::from_secs(2), || hub.blocks_delivered() == 1).await);

    // Two envelopes but a single-entry transactions filter.
    let mut broken = make_block(2, &[("tx-a", 0)]);
    if let Some(data) = broken.data.as_mut() {
        data.data.push(make_envelope("testchannel", "tx-b"));
    }
    source.feed(block_event(broken)).await;

    assert!(
        wait_until(Duration::from_secs(2), || hub.state() == HubState::Disconnected).await,
        "hub did not disconnect"
    );
    assert_eq!(listener.fatals.lock().len(), 1, "alarm raised once");

    // Fatal means no reconnect: the connection count stays put.
    let connects = source.connects.load(std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.connects.load(std::sync::atomic::Ordering::SeqCst), connects);
    assert_eq!(listener.block_numbers(), vec![1], "broken block was not dispatched");
}
