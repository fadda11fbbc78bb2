//! Shared fixtures: identities from generated certificates, scripted
//! mock transports for the endorser, orderer, and event-stream seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use fabric_client::error::Error;
use fabric_client::event_hub::{BlockSource, BlockStream, ReplayPosition};
use fabric_client::orderer::BroadcastService;
use fabric_client::peer::EndorserService;
use fabric_client::{Enrollment, HfClient, User};
use fabric_common::crypto::{EcCurve, EcKeyPair};
use fabric_common::SdkConfig;
use fabric_proto::common::{
    Block, BlockData, BlockHeader, BlockMetadata, ChannelHeader, Envelope, Header, Payload, Status,
};
use fabric_proto::discovery::{DiscoveryRequest, DiscoveryResponse};
use fabric_proto::events::{event, Event, SignedEvent};
use fabric_proto::orderer::BroadcastResponse;
use fabric_proto::proposal::{
    Endorsement, ProposalResponse, ProposalResponsePayload, Response, SignedProposal,
};

// ════════════════════════════════════════════════════════════════════════════
// IDENTITY FIXTURES
// ════════════════════════════════════════════════════════════════════════════

pub fn test_user(name: &str) -> User {
    let key = EcKeyPair::generate(EcCurve::P256);
    let pkcs8 = key.to_pkcs8_pem().expect("pkcs8");
    let rc_key = rcgen::KeyPair::from_pem(&pkcs8).expect("rcgen key");
    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        rcgen::DnValue::Utf8String(name.to_string()),
    );
    let cert_pem = params.self_signed(&rc_key).expect("cert").pem();
    User::new(name, "Org1MSP", Enrollment { cert_pem, key })
}

/// Client with fast test timings and a bound admin identity whose
/// certificate is anchored in the suite's trust store.
pub fn test_client() -> HfClient {
    let config = SdkConfig {
        proposal_wait_time: 1_000,
        orderer_wait_time: 1_000,
        orderer_retry_wait_time: 10,
        peer_event_registration_wait_time: 200,
        peer_retry_wait_time: 20,
        channel_config_wait_time: 1_000,
        genesis_block_wait_time: 1_000,
        ..SdkConfig::default()
    };
    let client = HfClient::new(config).expect("client");
    let user = test_user("admin");
    client
        .crypto_suite()
        .trust_store()
        .add_pem(&user.enrollment.cert_pem)
        .expect("anchor");
    client.set_user_context(user).expect("user context");
    client
}

// ════════════════════════════════════════════════════════════════════════════
// BLOCK FIXTURES
// ════════════════════════════════════════════════════════════════════════════

pub fn make_envelope(channel_id: &str, tx_id: &str) -> Vec<u8> {
    let channel_header = ChannelHeader {
        channel_id: channel_id.to_string(),
        tx_id: tx_id.to_string(),
        ..Default::default()
    };
    Envelope {
        payload: Payload {
            header: Some(Header {
                channel_header: channel_header.encode_to_vec(),
                signature_header: Vec::new(),
            }),
            data: Vec::new(),
        }
        .encode_to_vec(),
        signature: Vec::new(),
    }
    .encode_to_vec()
}

pub fn make_block(number: u64, txs: &[(&str, u8)]) -> Block {
    let data: Vec<Vec<u8>> = txs
        .iter()
        .map(|(tx_id, _)| make_envelope("testchannel", tx_id))
        .collect();
    let filter: Vec<u8> = txs.iter().map(|(_, code)| *code).collect();
    let mut metadata = vec![Vec::new(); 4];
    metadata[2] = filter;
    Block {
        header: Some(BlockHeader { number, ..Default::default() }),
        data: Some(BlockData { data }),
        metadata: Some(BlockMetadata { metadata }),
    }
}

pub fn block_event(block: Block) -> Event {
    Event { event: Some(event::Event::Block(block)), ..Default::default() }
}

pub fn register_ack() -> Event {
    Event {
        event: Some(event::Event::Register(Default::default())),
        ..Default::default()
    }
}

/// TxID recorded in a broadcast envelope's channel header.
pub fn envelope_tx_id(envelope: &Envelope) -> String {
    let payload = Payload::decode(envelope.payload.as_slice()).expect("payload");
    let header = payload.header.expect("header");
    ChannelHeader::decode(header.channel_header.as_slice())
        .expect("channel header")
        .tx_id
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK ENDORSER
// ════════════════════════════════════════════════════════════════════════════

/// Endorser returning one configured response for every proposal.
pub struct ScriptedEndorser {
    status: i32,
    payload: Vec<u8>,
    proposal_hash: Vec<u8>,
    pub calls: AtomicU64,
}

impl ScriptedEndorser {
    pub fn new(status: i32, payload: &[u8], proposal_hash: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            status,
            payload: payload.to_vec(),
            proposal_hash: proposal_hash.to_vec(),
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl EndorserService for ScriptedEndorser {
    async fn process_proposal(
        &self,
        _proposal: SignedProposal,
    ) -> Result<ProposalResponse, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response_payload = ProposalResponsePayload {
            proposal_hash: self.proposal_hash.clone(),
            extension: Vec::new(),
        };
        Ok(ProposalResponse {
            response: Some(Response {
                status: self.status,
                message: String::new(),
                payload: self.payload.clone(),
            }),
            payload: response_payload.encode_to_vec(),
            endorsement: Some(Endorsement {
                endorser: b"peer-identity".to_vec(),
                signature: b"endorsement-signature".to_vec(),
            }),
            ..Default::default()
        })
    }

    async fn discover(&self, _request: DiscoveryRequest) -> Result<DiscoveryResponse, Error> {
        Ok(DiscoveryResponse::default())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK ORDERER
// ════════════════════════════════════════════════════════════════════════════

/// Orderer recording envelopes; statuses are scripted FIFO and default
/// to SUCCESS when the script runs dry. An optional hook receives each
/// accepted envelope before `broadcast` returns.
pub struct ScriptedOrderer {
    statuses: Mutex<VecDeque<i32>>,
    pub sent: Mutex<Vec<Envelope>>,
    pub accepted_hook: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    deliver_blocks: Mutex<Vec<Block>>,
}

impl ScriptedOrderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            accepted_hook: Mutex::new(None),
            deliver_blocks: Mutex::new(vec![make_block(0, &[("genesis", 0)])]),
        })
    }

    pub fn push_status(&self, status: i32) {
        self.statuses.lock().push_back(status);
    }

    pub fn on_accepted(&self, sender: mpsc::UnboundedSender<Envelope>) {
        *self.accepted_hook.lock() = Some(sender);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl BroadcastService for ScriptedOrderer {
    async fn broadcast(&self, envelope: Envelope) -> Result<BroadcastResponse, Error> {
        self.sent.lock().push(envelope.clone());
        let status = self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(Status::Success as i32);
        if status == Status::Success as i32 {
            let hook = self.accepted_hook.lock().clone();
            if let Some(hook) = hook {
                let _ = hook.send(envelope);
            }
        }
        Ok(BroadcastResponse { status, info: String::new() })
    }

    async fn deliver(&self, _seek: Envelope) -> Result<Vec<Block>, Error> {
        Ok(self.deliver_blocks.lock().clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK BLOCK SOURCE
// ════════════════════════════════════════════════════════════════════════════

/// One scripted connection attempt of a [`MockBlockSource`].
pub enum Session {
    /// Connect fails outright.
    Reject,
    /// Stream opens but never acknowledges the registration.
    NeverAcks,
    /// Stream acknowledges, then relays whatever the test feeds.
    Live,
}

/// Block source whose connection attempts follow a script. Feeding an
/// event reaches the most recent live session.
pub struct MockBlockSource {
    sessions: Mutex<VecDeque<Session>>,
    live: Mutex<Option<mpsc::Sender<Result<Event, Error>>>>,
    /// Senders kept alive so a `NeverAcks` stream stays pending.
    parked: Mutex<Vec<mpsc::Sender<Result<Event, Error>>>>,
    pub connects: AtomicU64,
    pub starts: Mutex<Vec<ReplayPosition>>,
}

impl MockBlockSource {
    pub fn new(sessions: impl IntoIterator<Item = Session>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into_iter().collect()),
            live: Mutex::new(None),
            parked: Mutex::new(Vec::new()),
            connects: AtomicU64::new(0),
            starts: Mutex::new(Vec::new()),
        })
    }

    /// Feeds an event into the current live session.
    pub async fn feed(&self, event: Event) {
        let sender = self.live.lock().clone().expect("no live session");
        sender.send(Ok(event)).await.expect("session closed");
    }

    /// Drops the live session, ending its stream.
    pub fn drop_session(&self) {
        *self.live.lock() = None;
    }

    pub fn has_live_session(&self) -> bool {
        self.live.lock().is_some()
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn connect(
        &self,
        _registration: SignedEvent,
        start: ReplayPosition,
    ) -> Result<BlockStream, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().push(start);

        let session = self.sessions.lock().pop_front().unwrap_or(Session::Live);
        match session {
            Session::Reject => Err(Error::EventHub {
                endpoint: "mock".to_string(),
                message: "connection refused".to_string(),
            }),
            Session::NeverAcks => {
                let (tx, rx) = mpsc::channel(8);
                self.parked.lock().push(tx);
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
            Session::Live => {
                let (tx, rx) = mpsc::channel(64);
                tx.send(Ok(register_ack())).await.expect("ack send");
                *self.live.lock() = Some(tx);
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WAITING
// ════════════════════════════════════════════════════════════════════════════

/// Polls `predicate` until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
