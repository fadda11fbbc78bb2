//! # Transaction Pipeline Integration Tests
//!
//! End-to-end endorse → order → commit flows over scripted transports:
//!
//! | Test | Scenario |
//! |------|----------|
//! | `happy_invoke_commits` | 2 consistent endorsements, broadcast, commit VALID |
//! | `divergent_endorsements_block_submission` | inconsistent payloads, no broadcast |
//! | `commit_timeout_cleans_listener` | broadcast ok, no commit within budget |
//! | `broadcast_retries_until_accepted` | orderer refuses once, then accepts |
//! | `broadcast_budget_exhaustion_fails` | orderer never accepts |
//! | `commit_listener_survives_instant_commit` | block delivered during broadcast |
//! | `shutdown_surfaces_shutting_down` | pending commit waiters drained |
//! | `channel_snapshot_round_trip` | serialize → deserialize preserves shape |

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tokio::sync::mpsc;

use fabric_client::channel::{SubmitOptions, TransactionProposalRequest};
use fabric_client::error::Error;
use fabric_client::event_hub::EventHub;
use fabric_client::orderer::Orderer;
use fabric_client::peer::{Peer, PeerRole};
use fabric_client::proposal::{ChaincodeDescriptor, ChaincodeLanguage};
use fabric_client::{Channel, ChannelState, EndpointConfig, HfClient, HubState};
use fabric_proto::common::Status;

fn chaincode() -> ChaincodeDescriptor {
    ChaincodeDescriptor {
        name: "asset-transfer".to_string(),
        version: "1.0".to_string(),
        path: "github.com/example/asset".to_string(),
        language: ChaincodeLanguage::Golang,
    }
}

/// Channel wired to scripted transports: two endorsers, one orderer,
/// one event hub.
struct Harness {
    client: HfClient,
    channel: Arc<Channel>,
    orderer: Arc<ScriptedOrderer>,
    source: Arc<MockBlockSource>,
}

async fn build_harness(endorsers: Vec<Arc<ScriptedEndorser>>) -> Harness {
    let client = test_client();
    let channel = client.new_channel("testchannel").expect("channel");

    for (index, endorser) in endorsers.into_iter().enumerate() {
        let peer = Arc::new(Peer::with_service(
            format!("peer{index}"),
            format!("grpc://peer{index}.org1:7051"),
            endorser,
        ));
        channel.add_peer(peer).expect("add peer");
    }

    let orderer = ScriptedOrderer::new();
    let orderer_service_concrete = Arc::clone(&orderer);
    let orderer_service: Arc<dyn fabric_client::BroadcastService> = orderer_service_concrete;
    channel
        .add_orderer(Arc::new(Orderer::with_service(
            "orderer0",
            "grpc://orderer0:7050",
            orderer_service,
        )))
        .expect("add orderer");

    let source = MockBlockSource::new([Session::Live]);
    let block_source_concrete = Arc::clone(&source);
    let block_source: Arc<dyn fabric_client::BlockSource> = block_source_concrete;
    channel
        .add_event_hub(Arc::new(EventHub::with_source(
            "hub0",
            "grpc://peer0.org1:7053",
            block_source,
        )))
        .expect("add hub");

    channel.initialize().await.expect("initialize");
    assert_eq!(channel.state(), ChannelState::Initialized);

    let hubs = channel.event_hubs();
    assert!(
        wait_until(Duration::from_secs(2), || hubs[0].state() == HubState::Connected).await,
        "event hub never connected"
    );

    Harness { client, channel, orderer, source }
}

/// Spawns a committer: every accepted envelope becomes a block with
/// the envelope's TxID marked with `validation_code`.
fn spawn_committer(harness: &Harness, validation_code: u8) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    harness.orderer.on_accepted(tx);
    let source = Arc::clone(&harness.source);
    tokio::spawn(async move {
        let mut next_block = 1u64;
        while let Some(envelope) = rx.recv().await {
            let tx_id = envelope_tx_id(&envelope);
            source
                .feed(block_event(make_block(next_block, &[(&tx_id, validation_code)])))
                .await;
            next_block += 1;
        }
    });
}

// ── Scenario 1: happy invoke ────────────────────────────────────────────

#[tokio::test]
async fn happy_invoke_commits() {
    let harness = build_harness(vec![
        ScriptedEndorser::new(200, b"OK", b"hash-1"),
        ScriptedEndorser::new(200, b"OK", b"hash-1"),
    ])
    .await;
    spawn_committer(&harness, 0);

    let request = TransactionProposalRequest::new(chaincode(), "move")
        .arg(b"a".to_vec())
        .arg(b"b".to_vec());
    let endorsed = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect("endorsement");
    assert_eq!(endorsed.responses.len(), 2);
    assert_eq!(endorsed.payload(), b"OK");

    let result = harness
        .channel
        .send_transaction(
            &endorsed,
            SubmitOptions { commit_timeout: Some(Duration::from_secs(2)), ..Default::default() },
        )
        .await
        .expect("commit");

    assert!(result.is_valid());
    assert_eq!(result.payload, b"OK");
    assert_eq!(result.tx_id, endorsed.tx_id());
    assert_eq!(harness.orderer.sent_count(), 1);
}

// ── Scenario 2: divergent endorsements ──────────────────────────────────

#[tokio::test]
async fn divergent_endorsements_block_submission() {
    let harness = build_harness(vec![
        ScriptedEndorser::new(200, b"10", b"hash-a"),
        ScriptedEndorser::new(200, b"11", b"hash-b"),
    ])
    .await;

    let request = TransactionProposalRequest::new(chaincode(), "query");
    let err = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect_err("inconsistent");

    let Error::Consistency { details } = err else {
        panic!("expected ConsistencyError, got {err:?}");
    };
    assert_eq!(details.len(), 2);
    let payloads: Vec<&[u8]> = details
        .iter()
        .flatten()
        .map(|d| d.payload.as_slice())
        .collect();
    assert!(payloads.contains(&&b"10"[..]));
    assert!(payloads.contains(&&b"11"[..]));

    // Nothing reached the ordering service.
    assert_eq!(harness.orderer.sent_count(), 0);
}

// ── Scenario 3: commit timeout ──────────────────────────────────────────

#[tokio::test]
async fn commit_timeout_cleans_listener() {
    let harness = build_harness(vec![ScriptedEndorser::new(200, b"OK", b"hash-1")]).await;
    // No committer: the block never arrives.

    let request = TransactionProposalRequest::new(chaincode(), "move");
    let endorsed = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect("endorsement");

    let err = harness
        .channel
        .send_transaction(
            &endorsed,
            SubmitOptions {
                commit_timeout: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await
        .expect_err("timeout");

    match err {
        Error::TransactionTimeout { tx_id, .. } => assert_eq!(tx_id, endorsed.tx_id()),
        other => panic!("expected TransactionTimeoutError, got {other:?}"),
    }
    assert!(err_is_timeout_kind(&harness, endorsed.tx_id()).await);
}

/// The timed-out listener is gone: a late block for the TxID dispatches
/// without waking anyone, and the channel stays usable.
async fn err_is_timeout_kind(harness: &Harness, tx_id: &str) -> bool {
    harness
        .source
        .feed(block_event(make_block(1, &[(tx_id, 0)])))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.channel.state() == ChannelState::Initialized
}

// ── Broadcast retry budget ──────────────────────────────────────────────

#[tokio::test]
async fn broadcast_retries_until_accepted() {
    let harness = build_harness(vec![ScriptedEndorser::new(200, b"OK", b"hash-1")]).await;
    harness.orderer.push_status(Status::ServiceUnavailable as i32);
    spawn_committer(&harness, 0);

    let request = TransactionProposalRequest::new(chaincode(), "move");
    let endorsed = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect("endorsement");

    let result = harness
        .channel
        .send_transaction(
            &endorsed,
            SubmitOptions { commit_timeout: Some(Duration::from_secs(2)), ..Default::default() },
        )
        .await
        .expect("commit after retry");

    assert!(result.is_valid());
    assert_eq!(harness.orderer.sent_count(), 2, "one refusal, one acceptance");
}

#[tokio::test]
async fn broadcast_budget_exhaustion_fails() {
    let harness = build_harness(vec![ScriptedEndorser::new(200, b"OK", b"hash-1")]).await;
    for _ in 0..3 {
        harness.orderer.push_status(Status::ServiceUnavailable as i32);
    }

    let request = TransactionProposalRequest::new(chaincode(), "move");
    let endorsed = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect("endorsement");

    let err = harness
        .channel
        .send_transaction(
            &endorsed,
            SubmitOptions { broadcast_attempts: 3, ..Default::default() },
        )
        .await
        .expect_err("refused");

    assert!(matches!(err, Error::Transaction { .. }));
    assert_eq!(harness.orderer.sent_count(), 3);
}

// ── Listener-before-broadcast ordering ──────────────────────────────────

#[tokio::test]
async fn commit_listener_survives_instant_commit() {
    let harness = build_harness(vec![ScriptedEndorser::new(200, b"OK", b"hash-1")]).await;
    spawn_committer(&harness, 0);

    // The committer races the submission path; registration strictly
    // before broadcast means no commit can slip past the listener.
    for _ in 0..3 {
        let request = TransactionProposalRequest::new(chaincode(), "move");
        let endorsed = harness
            .channel
            .send_transaction_proposal(&request, None)
            .await
            .expect("endorsement");
        let result = harness
            .channel
            .send_transaction(
                &endorsed,
                SubmitOptions {
                    commit_timeout: Some(Duration::from_secs(2)),
                    ..Default::default()
                },
            )
            .await
            .expect("commit");
        assert!(result.is_valid());
    }
}

// ── Shutdown drains waiters ─────────────────────────────────────────────

#[tokio::test]
async fn shutdown_surfaces_shutting_down() {
    let harness = build_harness(vec![ScriptedEndorser::new(200, b"OK", b"hash-1")]).await;
    // Broadcast is accepted, but no commit ever arrives.

    let request = TransactionProposalRequest::new(chaincode(), "move");
    let endorsed = harness
        .channel
        .send_transaction_proposal(&request, None)
        .await
        .expect("endorsement");

    let channel = Arc::clone(&harness.channel);
    let waiter = tokio::spawn(async move {
        channel
            .send_transaction(&endorsed, SubmitOptions::default())
            .await
    });

    // Let the submission register and broadcast.
    assert!(
        wait_until(Duration::from_secs(2), || harness.orderer.sent_count() == 1).await,
        "broadcast never happened"
    );

    harness.channel.shutdown().await;
    let result = waiter.await.expect("join");
    assert!(matches!(result, Err(Error::ShuttingDown { .. })));
    assert_eq!(harness.channel.state(), ChannelState::Shutdown);

    // Operations after shutdown are refused.
    let late = harness
        .channel
        .send_transaction_proposal(&TransactionProposalRequest::new(chaincode(), "move"), None)
        .await;
    assert!(matches!(late, Err(Error::ShuttingDown { .. })));
}

// ── Lifecycle guards ────────────────────────────────────────────────────

#[tokio::test]
async fn proposals_require_initialization() {
    let client = test_client();
    let channel = client.new_channel("earlychannel").expect("channel");
    let peer = Arc::new(Peer::with_service(
        "peer0",
        "grpc://peer0:7051",
        ScriptedEndorser::new(200, b"OK", b"h"),
    ));
    channel.add_peer(peer).expect("add peer");

    let err = channel
        .send_transaction_proposal(&TransactionProposalRequest::new(chaincode(), "move"), None)
        .await
        .expect_err("not initialized");
    assert!(matches!(err, Error::Argument(_)));
}

#[tokio::test]
async fn initialize_requires_members() {
    let client = test_client();
    let channel = client.new_channel("emptychannel").expect("channel");
    let err = channel.initialize().await.expect_err("no members");
    assert!(matches!(err, Error::Argument(_)));
}

// ── Snapshot round trip ─────────────────────────────────────────────────

#[tokio::test]
async fn channel_snapshot_round_trip() {
    let client = test_client();
    let channel = client.new_channel("snapchannel").expect("channel");

    let peer = client
        .new_peer("peer0", "grpc://peer0.org1:7051", EndpointConfig::default())
        .expect("peer");
    peer.set_roles([PeerRole::Endorsing, PeerRole::LedgerQuery].into_iter().collect());
    channel.add_peer(peer).expect("add peer");
    channel
        .add_orderer(
            client
                .new_orderer("orderer0", "grpc://orderer0:7050", EndpointConfig::default())
                .expect("orderer"),
        )
        .expect("add orderer");
    channel
        .add_event_hub(
            client
                .new_event_hub("hub0", "grpc://peer0.org1:7053", EndpointConfig::default())
                .expect("hub"),
        )
        .expect("add hub");

    let blob = channel.serialize().expect("serialize");

    let restored_client = test_client();
    let restored = restored_client.deserialize_channel(&blob).expect("deserialize");

    assert_eq!(restored.name(), "snapchannel");
    let peers = restored.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].name(), "peer0");
    assert_eq!(peers[0].url(), "grpc://peer0.org1:7051");
    assert_eq!(
        peers[0].roles(),
        [PeerRole::Endorsing, PeerRole::LedgerQuery].into_iter().collect()
    );
    let orderers = restored.orderers();
    assert_eq!(orderers.len(), 1);
    assert_eq!(orderers[0].url(), "grpc://orderer0:7050");
    let hubs = restored.event_hubs();
    assert_eq!(hubs.len(), 1);
    assert_eq!(hubs[0].url(), "grpc://peer0.org1:7053");

    // Garbage is rejected, not misread.
    assert!(matches!(
        restored_client.deserialize_channel(&[9, 9, 9]),
        Err(Error::Argument(_))
    ));
}

// ── Queries ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_short_circuits_on_first_success() {
    // First peer refuses, second answers.
    let refusing = ScriptedEndorser::new(500, b"boom", b"h");
    let answering = ScriptedEndorser::new(200, b"value=42", b"h");
    let harness =
        build_harness(vec![Arc::clone(&refusing), Arc::clone(&answering)]).await;

    let request = TransactionProposalRequest::new(chaincode(), "read").arg(b"key".to_vec());
    let payload = harness.channel.query_by_chaincode(&request).await.expect("query");
    assert_eq!(payload, b"value=42");
    assert_eq!(refusing.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(answering.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn install_fans_out_to_targets() {
    let client = test_client();
    let peers: Vec<Arc<Peer>> = (0..2)
        .map(|i| {
            Arc::new(Peer::with_service(
                format!("peer{i}"),
                format!("grpc://peer{i}:7051"),
                ScriptedEndorser::new(200, b"installed", b"h"),
            ))
        })
        .collect();

    let responses = client
        .send_install_proposal(&chaincode(), b"fake-targz".to_vec(), &peers)
        .await
        .expect("install");
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.is_successful()));
}
