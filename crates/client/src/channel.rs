//! Channel orchestrator: the state machine driving the
//! endorse → order → commit pipeline.
//!
//! ## Lifecycle
//!
//! ```text
//! CREATED ──initialize()──▶ INITIALIZED ──shutdown()──▶ SHUTDOWN
//!    │                           │
//!    │  requires ≥1 peer,        │  endorsement fan-out
//!    │  ≥1 orderer; fetches      │  transaction submission
//!    │  config block, starts     │  ledger queries
//!    │  event hubs + discovery   │  commit tracking
//! ```
//!
//! ## Submission Ordering
//!
//! For every transaction the commit listener is registered strictly
//! before the envelope reaches an orderer, so a block that commits the
//! TxID can never race past an unregistered listener. The client does
//! not order concurrent transactions; the ledger does.
//!
//! ## Shutdown
//!
//! `shutdown()` drains outstanding commit listeners (their waiters get
//! `ShuttingDown`), then closes peers, orderers, and event hubs in
//! parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use prost::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fabric_proto::block;
use fabric_proto::common::{
    Block, ChannelHeader, ConfigSignature, ConfigUpdateEnvelope, Envelope, Header, HeaderType,
    Payload, SignatureHeader, Status,
};
use fabric_proto::discovery::{DiscoveredPeer, DiscoveryRequest};
use fabric_proto::orderer::{seek_info, SeekInfo, SeekPosition};
use fabric_proto::proposal::{
    ChaincodeProposalPayload, Proposal, ProposalResponse, ProposalResponsePayload, SignedProposal,
};
use fabric_proto::transaction::{
    ChaincodeActionPayload, ChaincodeEndorsedAction, Transaction, TransactionAction,
};

use crate::client::ClientContext;
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::{EndorserDetail, Error};
use crate::event_hub::{BlockListener, EventHub};
use crate::identity::SigningIdentity;
use crate::orderer::Orderer;
use crate::peer::{Peer, PeerRole};
use crate::proposal::{
    now_timestamp, ChaincodeDescriptor, ChaincodeLanguage, LifecycleArgs, ProposalBuilder,
    ProposalKind, TransactionContext, QSCC,
};

// ════════════════════════════════════════════════════════════════════════════
// STATE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Initialized,
    Shutdown,
}

const STATE_CREATED: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

fn channel_state(raw: u8) -> ChannelState {
    match raw {
        STATE_INITIALIZED => ChannelState::Initialized,
        STATE_SHUTDOWN => ChannelState::Shutdown,
        _ => ChannelState::Created,
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REQUESTS AND RESULTS
// ════════════════════════════════════════════════════════════════════════════

/// A chaincode invocation to be endorsed.
#[derive(Debug, Clone)]
pub struct TransactionProposalRequest {
    pub chaincode: ChaincodeDescriptor,
    pub fcn: String,
    pub args: Vec<Vec<u8>>,
    pub transient: HashMap<String, Vec<u8>>,
    /// Override of `proposal.wait.time`.
    pub proposal_wait: Option<Duration>,
    /// Override of `proposal.consistency_validation`.
    pub consistency_validation: Option<bool>,
}

impl TransactionProposalRequest {
    pub fn new(chaincode: ChaincodeDescriptor, fcn: impl Into<String>) -> Self {
        Self {
            chaincode,
            fcn: fcn.into(),
            args: Vec::new(),
            transient: HashMap::new(),
            proposal_wait: None,
            consistency_validation: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// One peer's endorsement of a proposal.
#[derive(Debug, Clone)]
pub struct PeerResponse {
    pub peer: String,
    pub endpoint: String,
    pub response: ProposalResponse,
}

impl PeerResponse {
    /// Endorsement success window: status ∈ [200, 400).
    pub fn is_successful(&self) -> bool {
        let status = self.response.response.as_ref().map(|r| r.status).unwrap_or(0);
        (200..400).contains(&status)
    }

    fn chaincode_payload(&self) -> Vec<u8> {
        self.response
            .response
            .as_ref()
            .map(|r| r.payload.clone())
            .unwrap_or_default()
    }
}

/// The outcome of an endorsement fan-out, ready for submission.
#[derive(Debug, Clone)]
pub struct EndorsedProposal {
    pub context: TransactionContext,
    pub proposal: Proposal,
    /// Successful responses, consistency-validated when enabled.
    pub responses: Vec<PeerResponse>,
}

impl EndorsedProposal {
    pub fn tx_id(&self) -> &str {
        &self.context.tx_id
    }

    /// The chaincode result carried by the endorsements.
    pub fn payload(&self) -> Vec<u8> {
        self.responses
            .first()
            .map(PeerResponse::chaincode_payload)
            .unwrap_or_default()
    }
}

/// Knobs of one submission.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Target orderers; defaults to the channel's.
    pub orderers: Option<Vec<Arc<Orderer>>>,
    /// Broadcast attempts across the orderer set.
    pub broadcast_attempts: u32,
    /// Override of `transaction_cleanup_timeout`.
    pub commit_timeout: Option<Duration>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self { orderers: None, broadcast_attempts: 3, commit_timeout: None }
    }
}

/// A committed transaction as observed through the event hubs.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub tx_id: String,
    pub block_number: u64,
    pub validation_code: i32,
    /// Chaincode result from the endorsement round.
    pub payload: Vec<u8>,
}

impl TransactionResult {
    pub fn is_valid(&self) -> bool {
        self.validation_code == fabric_proto::transaction::TxValidationCode::Valid as i32
    }
}

/// Caller-supplied channel-creation material: the marshaled
/// `ConfigUpdate` plus the admin signatures collected for it.
#[derive(Debug, Clone)]
pub struct ChannelConfiguration {
    pub config_update: Vec<u8>,
}

/// Signs a channel configuration update as one admin. The signature
/// covers `signature_header || config_update`.
pub fn sign_channel_configuration(
    identity: &SigningIdentity,
    config_update: &[u8],
) -> Result<ConfigSignature, Error> {
    if config_update.is_empty() {
        return Err(Error::argument("config update must not be empty"));
    }
    let context = TransactionContext::new(identity);
    let signature_header = SignatureHeader {
        creator: context.creator.clone(),
        nonce: context.nonce.clone(),
    }
    .encode_to_vec();

    let mut signed_bytes = signature_header.clone();
    signed_bytes.extend_from_slice(config_update);
    let signature = identity.sign(&signed_bytes)?;

    Ok(ConfigSignature { signature_header, signature })
}

// ════════════════════════════════════════════════════════════════════════════
// COMMIT TRACKER
// ════════════════════════════════════════════════════════════════════════════

/// A transaction's fate as recorded in a committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitNotice {
    pub block_number: u64,
    pub validation_code: i32,
}

/// Commit listeners keyed by TxID. Dispatch is exactly-once: the
/// listener is removed before its notice is sent, so a replayed block
/// cannot fire it twice.
pub(crate) struct CommitTracker {
    channel: String,
    listeners: Mutex<HashMap<String, oneshot::Sender<CommitNotice>>>,
}

impl CommitTracker {
    fn new(channel: String) -> Self {
        Self { channel, listeners: Mutex::new(HashMap::new()) }
    }

    fn register(&self, tx_id: &str) -> oneshot::Receiver<CommitNotice> {
        let (tx, rx) = oneshot::channel();
        let previous = self.listeners.lock().insert(tx_id.to_string(), tx);
        if previous.is_some() {
            warn!(channel = %self.channel, tx = %tx_id, "replaced pending commit listener");
        }
        rx
    }

    fn remove(&self, tx_id: &str) {
        self.listeners.lock().remove(tx_id);
    }

    /// Drops every pending listener; their waiters observe a closed
    /// channel and surface `ShuttingDown`.
    fn drain(&self) {
        let drained: Vec<String> = {
            let mut listeners = self.listeners.lock();
            let keys = listeners.keys().cloned().collect();
            listeners.clear();
            keys
        };
        for tx_id in drained {
            debug!(channel = %self.channel, tx = %tx_id, "commit listener drained");
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl BlockListener for CommitTracker {
    fn on_block(&self, committed: &Block) {
        let Ok(number) = block::block_number(committed) else { return };
        let Ok(transactions) = block::block_transactions(committed) else { return };

        for tx in transactions {
            let sender = self.listeners.lock().remove(&tx.tx_id);
            if let Some(sender) = sender {
                debug!(
                    channel = %self.channel,
                    tx = %tx.tx_id,
                    block = number,
                    code = tx.validation_code,
                    "commit observed"
                );
                let _ = sender.send(CommitNotice {
                    block_number: number,
                    validation_code: tx.validation_code,
                });
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════

const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct NodeSnapshot {
    name: String,
    url: String,
    config: EndpointConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeerSnapshot {
    name: String,
    url: String,
    config: EndpointConfig,
    roles: Vec<PeerRole>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelSnapshot {
    name: String,
    peers: Vec<PeerSnapshot>,
    orderers: Vec<NodeSnapshot>,
    event_hubs: Vec<NodeSnapshot>,
}

// ════════════════════════════════════════════════════════════════════════════
// CHANNEL
// ════════════════════════════════════════════════════════════════════════════

pub struct Channel {
    name: String,
    ctx: Arc<ClientContext>,
    state: AtomicU8,
    peers: RwLock<Vec<Arc<Peer>>>,
    orderers: RwLock<Vec<Arc<Orderer>>>,
    event_hubs: RwLock<Vec<Arc<EventHub>>>,
    commit_tracker: Arc<CommitTracker>,
    last_config_block: RwLock<Option<Block>>,
    discovered: Arc<RwLock<Vec<DiscoveredPeer>>>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_notify: Arc<Notify>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(name: impl Into<String>, ctx: Arc<ClientContext>) -> Result<Self, Error> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::argument("channel name must not be blank"));
        }
        Ok(Self {
            commit_tracker: Arc::new(CommitTracker::new(name.clone())),
            name,
            ctx,
            state: AtomicU8::new(STATE_CREATED),
            peers: RwLock::new(Vec::new()),
            orderers: RwLock::new(Vec::new()),
            event_hubs: RwLock::new(Vec::new()),
            last_config_block: RwLock::new(None),
            discovered: Arc::new(RwLock::new(Vec::new())),
            discovery_task: Mutex::new(None),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Joins a brand-new channel: broadcasts the signed configuration
    /// update to `orderer`, then fetches the genesis block.
    pub(crate) async fn create(
        name: impl Into<String>,
        ctx: Arc<ClientContext>,
        orderer: Arc<Orderer>,
        configuration: ChannelConfiguration,
        signatures: Vec<ConfigSignature>,
    ) -> Result<Self, Error> {
        if configuration.config_update.is_empty() {
            return Err(Error::argument("channel configuration must not be empty"));
        }
        if signatures.is_empty() {
            return Err(Error::argument("channel creation requires admin signatures"));
        }

        let channel = Self::new(name, ctx)?;
        let identity = channel.ctx.identity()?;

        let update_envelope = ConfigUpdateEnvelope {
            config_update: configuration.config_update,
            signatures,
        };
        let envelope = channel.wrap_payload(
            &identity,
            HeaderType::ConfigUpdate,
            update_envelope.encode_to_vec(),
        )?;

        let response = orderer
            .broadcast(envelope, channel.ctx.config.orderer_wait())
            .await?;
        if response.status != Status::Success as i32 {
            return Err(Error::Transaction {
                tx_id: None,
                endpoint: Some(orderer.url().to_string()),
                message: format!(
                    "channel creation rejected with status {}: {}",
                    response.status, response.info
                ),
            });
        }

        let genesis = channel
            .fetch_block(
                &identity,
                &orderer,
                SeekPosition::specified(0),
                SeekPosition::specified(0),
                channel.ctx.config.genesis_block_wait(),
            )
            .await?;
        *channel.last_config_block.write() = Some(genesis);
        channel.orderers.write().push(orderer);

        info!(channel = %channel.name, "channel created");
        Ok(channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        channel_state(self.state.load(AtomicOrdering::SeqCst))
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.read().clone()
    }

    pub fn orderers(&self) -> Vec<Arc<Orderer>> {
        self.orderers.read().clone()
    }

    pub fn event_hubs(&self) -> Vec<Arc<EventHub>> {
        self.event_hubs.read().clone()
    }

    /// Latest channel configuration block, once initialized.
    pub fn last_config_block(&self) -> Option<Block> {
        self.last_config_block.read().clone()
    }

    /// Peers last reported by service discovery.
    pub fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        self.discovered.read().clone()
    }

    pub fn add_peer(&self, peer: Arc<Peer>) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        let mut peers = self.peers.write();
        if peers.iter().any(|p| p.name() == peer.name()) {
            return Err(Error::argument(format!("peer {} already on channel", peer.name())));
        }
        peers.push(peer);
        Ok(())
    }

    pub fn add_orderer(&self, orderer: Arc<Orderer>) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        let mut orderers = self.orderers.write();
        if orderers.iter().any(|o| o.name() == orderer.name()) {
            return Err(Error::argument(format!(
                "orderer {} already on channel",
                orderer.name()
            )));
        }
        orderers.push(orderer);
        Ok(())
    }

    /// Adds an event hub; when the channel is already initialized the
    /// hub is wired up and connected immediately.
    pub fn add_event_hub(&self, hub: Arc<EventHub>) -> Result<(), Error> {
        self.ensure_not_shutdown()?;
        {
            let mut hubs = self.event_hubs.write();
            if hubs.iter().any(|h| h.name() == hub.name()) {
                return Err(Error::argument(format!(
                    "event hub {} already on channel",
                    hub.name()
                )));
            }
            hubs.push(Arc::clone(&hub));
        }
        if self.state() == ChannelState::Initialized {
            let tracker_concrete = Arc::clone(&self.commit_tracker);
            let tracker: Arc<dyn BlockListener> = tracker_concrete;
            hub.subscribe(tracker);
            hub.connect(self.ctx.identity()?, &self.ctx.config)?;
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // LIFECYCLE
    // ────────────────────────────────────────────────────────────────────

    /// Moves `Created → Initialized`: verifies membership, reads the
    /// latest config block, starts event hubs, and schedules service
    /// discovery.
    pub async fn initialize(&self) -> Result<(), Error> {
        match self.state() {
            ChannelState::Shutdown => {
                return Err(Error::ShuttingDown { channel: self.name.clone() })
            }
            ChannelState::Initialized => {
                return Err(Error::argument(format!("channel {} already initialized", self.name)))
            }
            ChannelState::Created => {}
        }
        if self.peers.read().is_empty() {
            return Err(Error::argument("channel has no peers"));
        }
        if self.orderers.read().is_empty() {
            return Err(Error::argument("channel has no orderers"));
        }
        let identity = self.ctx.identity()?;

        // Latest config block; genesis when the chain is fresh.
        let config_block = self.fetch_latest_config_block(&identity).await?;
        *self.last_config_block.write() = Some(config_block);

        for hub in self.event_hubs.read().iter() {
            let tracker_concrete = Arc::clone(&self.commit_tracker);
            let tracker: Arc<dyn BlockListener> = tracker_concrete;
            hub.subscribe(tracker);
            hub.connect(Arc::clone(&identity), &self.ctx.config)?;
        }

        self.spawn_discovery(&identity);

        self.state.store(STATE_INITIALIZED, AtomicOrdering::SeqCst);
        info!(channel = %self.name, "channel initialized");
        Ok(())
    }

    /// Drains commit listeners, then closes every attached component
    /// in parallel. Idempotent.
    pub async fn shutdown(&self) {
        let previous = self.state.swap(STATE_SHUTDOWN, AtomicOrdering::SeqCst);
        if previous == STATE_SHUTDOWN {
            return;
        }
        info!(channel = %self.name, "channel shutting down");

        self.shutdown_notify.notify_waiters();
        let discovery = self.discovery_task.lock().take();
        if let Some(task) = discovery {
            // The tick task may be mid-call and miss the notification;
            // aborting is safe for a poller.
            task.abort();
            let _ = task.await;
        }

        self.commit_tracker.drain();

        let hubs = self.event_hubs();
        let peers = self.peers();
        let orderers = self.orderers();
        futures::future::join_all(hubs.iter().map(|h| h.shutdown())).await;
        futures::future::join_all(peers.iter().map(|p| p.shutdown())).await;
        futures::future::join_all(orderers.iter().map(|o| o.shutdown())).await;
    }

    // ────────────────────────────────────────────────────────────────────
    // ENDORSEMENT
    // ────────────────────────────────────────────────────────────────────

    /// Fans an invocation proposal out to the endorsing peers and
    /// gathers a consistency-validated endorsement set.
    pub async fn send_transaction_proposal(
        &self,
        request: &TransactionProposalRequest,
        targets: Option<Vec<Arc<Peer>>>,
    ) -> Result<EndorsedProposal, Error> {
        let kind = ProposalKind::Invoke {
            fcn: request.fcn.clone(),
            args: request.args.clone(),
            transient: request.transient.clone(),
        };
        self.fan_out(&request.chaincode, kind, request, targets).await
    }

    /// LSCC `deploy` proposal for a chaincode's first version on this
    /// channel.
    pub async fn send_instantiation_proposal(
        &self,
        chaincode: &ChaincodeDescriptor,
        lifecycle: LifecycleArgs,
        targets: Option<Vec<Arc<Peer>>>,
    ) -> Result<EndorsedProposal, Error> {
        let request = TransactionProposalRequest::new(chaincode.clone(), "deploy");
        self.fan_out(chaincode, ProposalKind::Instantiate(lifecycle), &request, targets)
            .await
    }

    /// LSCC `upgrade` proposal for a new chaincode version.
    pub async fn send_upgrade_proposal(
        &self,
        chaincode: &ChaincodeDescriptor,
        lifecycle: LifecycleArgs,
        targets: Option<Vec<Arc<Peer>>>,
    ) -> Result<EndorsedProposal, Error> {
        let request = TransactionProposalRequest::new(chaincode.clone(), "upgrade");
        self.fan_out(chaincode, ProposalKind::Upgrade(lifecycle), &request, targets)
            .await
    }

    async fn fan_out(
        &self,
        chaincode: &ChaincodeDescriptor,
        kind: ProposalKind,
        request: &TransactionProposalRequest,
        targets: Option<Vec<Arc<Peer>>>,
    ) -> Result<EndorsedProposal, Error> {
        self.ensure_initialized()?;
        let identity = self.ctx.identity()?;

        let targets = match targets {
            Some(list) if !list.is_empty() => list,
            Some(_) => return Err(Error::argument("empty endorsement target list")),
            None => {
                let endorsers: Vec<Arc<Peer>> = self
                    .peers
                    .read()
                    .iter()
                    .filter(|p| p.has_role(PeerRole::Endorsing))
                    .cloned()
                    .collect();
                if endorsers.is_empty() {
                    return Err(Error::argument("channel has no endorsing peers"));
                }
                endorsers
            }
        };

        // Mutual-TLS binding: targets share the client pair, so the
        // first configured digest is the binding digest.
        let tls_cert_hash = targets
            .iter()
            .filter_map(|p| p.endpoint())
            .find_map(|e| e.client_cert_hash().map(<[u8]>::to_vec));

        let context = TransactionContext::new(&identity);
        let builder = ProposalBuilder::new(self.name.clone(), chaincode, &context, kind)
            .tls_cert_hash(tls_cert_hash);
        // Built exactly once: the stored proposal and the signed bytes
        // must be the same serialization.
        let proposal = builder.build()?;
        let proposal_bytes = proposal.encode_to_vec();
        let signature = identity.sign(&proposal_bytes)?;
        let signed = SignedProposal { proposal_bytes, signature };

        let deadline = request.proposal_wait.unwrap_or(self.ctx.config.proposal_wait());
        debug!(
            channel = %self.name,
            tx = %context.tx_id,
            peers = targets.len(),
            "endorsement fan-out"
        );

        // One dispatch task per peer, gathered at a barrier.
        let dispatches = targets.iter().map(|peer| {
            let peer = Arc::clone(peer);
            let signed = signed.clone();
            async move {
                let result = peer.send_proposal(signed, deadline).await;
                (peer, result)
            }
        });
        let outcomes = futures::future::join_all(dispatches).await;

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for (peer, outcome) in outcomes {
            match outcome {
                Ok(response) => responses.push(PeerResponse {
                    peer: peer.name().to_string(),
                    endpoint: peer.url().to_string(),
                    response,
                }),
                Err(e) => {
                    warn!(channel = %self.name, peer = %peer.name(), error = %e, "endorsement failed");
                    failures.push(e);
                }
            }
        }

        let successful: Vec<PeerResponse> =
            responses.iter().filter(|r| r.is_successful()).cloned().collect();
        if successful.is_empty() {
            return Err(match failures.into_iter().next() {
                Some(e) => e,
                None => Error::Proposal {
                    endpoint: responses
                        .first()
                        .map(|r| r.endpoint.clone())
                        .unwrap_or_default(),
                    message: format!(
                        "no successful endorsement among {} responses",
                        responses.len()
                    ),
                },
            });
        }

        let validate = request
            .consistency_validation
            .unwrap_or(self.ctx.config.proposal_consistency_validation);
        if validate {
            let groups = consistency_groups(&successful);
            if groups.len() > 1 {
                warn!(
                    channel = %self.name,
                    tx = %context.tx_id,
                    groups = groups.len(),
                    "inconsistent endorsements"
                );
                return Err(Error::Consistency { details: groups });
            }
        }

        Ok(EndorsedProposal { context, proposal, responses: successful })
    }

    // ────────────────────────────────────────────────────────────────────
    // SUBMISSION
    // ────────────────────────────────────────────────────────────────────

    /// Submits an endorsed proposal for ordering and awaits its
    /// commit. The commit listener is registered before the first
    /// broadcast attempt.
    pub async fn send_transaction(
        &self,
        endorsed: &EndorsedProposal,
        options: SubmitOptions,
    ) -> Result<TransactionResult, Error> {
        self.ensure_initialized()?;
        let identity = self.ctx.identity()?;

        let orderers = match &options.orderers {
            Some(list) if !list.is_empty() => list.clone(),
            Some(_) => return Err(Error::argument("empty orderer target list")),
            None => {
                let orderers = self.orderers();
                if orderers.is_empty() {
                    return Err(Error::argument("channel has no orderers"));
                }
                orderers
            }
        };

        let tx_id = endorsed.context.tx_id.clone();
        let envelope = self.build_transaction_envelope(endorsed, &identity)?;

        // Listener strictly before broadcast.
        let receiver = self.commit_tracker.register(&tx_id);
        debug!(channel = %self.name, tx = %tx_id, "commit listener registered");

        if let Err(e) = self.broadcast_with_retry(&envelope, &orderers, &options, &tx_id).await {
            self.commit_tracker.remove(&tx_id);
            return Err(e);
        }

        let commit_wait = options
            .commit_timeout
            .unwrap_or(self.ctx.config.transaction_cleanup());
        match tokio::time::timeout(commit_wait, receiver).await {
            Ok(Ok(notice)) => {
                info!(
                    channel = %self.name,
                    tx = %tx_id,
                    block = notice.block_number,
                    code = notice.validation_code,
                    "transaction committed"
                );
                Ok(TransactionResult {
                    tx_id,
                    block_number: notice.block_number,
                    validation_code: notice.validation_code,
                    payload: endorsed.payload(),
                })
            }
            Ok(Err(_)) => Err(Error::ShuttingDown { channel: self.name.clone() }),
            Err(_) => {
                self.commit_tracker.remove(&tx_id);
                warn!(channel = %self.name, tx = %tx_id, "commit wait expired");
                Err(Error::TransactionTimeout { tx_id, waited: commit_wait })
            }
        }
    }

    async fn broadcast_with_retry(
        &self,
        envelope: &Envelope,
        orderers: &[Arc<Orderer>],
        options: &SubmitOptions,
        tx_id: &str,
    ) -> Result<(), Error> {
        let attempts = options.broadcast_attempts.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.ctx.config.orderer_retry_wait()).await;
            }
            for orderer in orderers {
                if self.state() == ChannelState::Shutdown {
                    return Err(Error::ShuttingDown { channel: self.name.clone() });
                }
                match orderer
                    .broadcast(envelope.clone(), self.ctx.config.orderer_wait())
                    .await
                {
                    Ok(response) if response.status == Status::Success as i32 => {
                        debug!(channel = %self.name, tx = %tx_id, orderer = %orderer.name(), "broadcast accepted");
                        return Ok(());
                    }
                    Ok(response) => {
                        warn!(
                            channel = %self.name,
                            tx = %tx_id,
                            orderer = %orderer.name(),
                            status = response.status,
                            "broadcast refused"
                        );
                        last_error = Some(Error::Transaction {
                            tx_id: Some(tx_id.to_string()),
                            endpoint: Some(orderer.url().to_string()),
                            message: format!(
                                "broadcast refused with status {}: {}",
                                response.status, response.info
                            ),
                        });
                    }
                    Err(e) => {
                        warn!(channel = %self.name, tx = %tx_id, orderer = %orderer.name(), error = %e, "broadcast failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transaction {
            tx_id: Some(tx_id.to_string()),
            endpoint: None,
            message: "broadcast exhausted its retry budget".to_string(),
        }))
    }

    /// Assembles the endorsed transaction envelope.
    fn build_transaction_envelope(
        &self,
        endorsed: &EndorsedProposal,
        identity: &SigningIdentity,
    ) -> Result<Envelope, Error> {
        if endorsed.responses.is_empty() {
            return Err(Error::Transaction {
                tx_id: Some(endorsed.context.tx_id.clone()),
                endpoint: None,
                message: "no endorsements to submit".to_string(),
            });
        }

        let header = Header::decode(endorsed.proposal.header.as_slice()).map_err(|e| {
            Error::Transaction {
                tx_id: Some(endorsed.context.tx_id.clone()),
                endpoint: None,
                message: format!("proposal header undecodable: {e}"),
            }
        })?;

        // The committed proposal payload omits transient data.
        let mut proposal_payload =
            ChaincodeProposalPayload::decode(endorsed.proposal.payload.as_slice()).map_err(
                |e| Error::Transaction {
                    tx_id: Some(endorsed.context.tx_id.clone()),
                    endpoint: None,
                    message: format!("proposal payload undecodable: {e}"),
                },
            )?;
        proposal_payload.transient_map.clear();

        let endorsements = endorsed
            .responses
            .iter()
            .filter_map(|r| r.response.endorsement.clone())
            .collect::<Vec<_>>();
        if endorsements.is_empty() {
            return Err(Error::Transaction {
                tx_id: Some(endorsed.context.tx_id.clone()),
                endpoint: None,
                message: "responses carry no endorsements".to_string(),
            });
        }

        let action = ChaincodeActionPayload {
            chaincode_proposal_payload: proposal_payload.encode_to_vec(),
            action: Some(ChaincodeEndorsedAction {
                proposal_response_payload: endorsed.responses[0].response.payload.clone(),
                endorsements,
            }),
        };

        let transaction = Transaction {
            actions: vec![TransactionAction {
                header: header.signature_header.clone(),
                payload: action.encode_to_vec(),
            }],
        };

        let payload = Payload {
            header: Some(header),
            data: transaction.encode_to_vec(),
        }
        .encode_to_vec();
        let signature = identity.sign(&payload)?;

        Ok(Envelope { payload, signature })
    }

    // ────────────────────────────────────────────────────────────────────
    // QUERIES
    // ────────────────────────────────────────────────────────────────────

    /// Chaincode query: consults `ChaincodeQuery` peers one at a time
    /// and returns the first successful payload.
    pub async fn query_by_chaincode(
        &self,
        request: &TransactionProposalRequest,
    ) -> Result<Vec<u8>, Error> {
        let kind = ProposalKind::Query {
            fcn: request.fcn.clone(),
            args: request.args.clone(),
            transient: request.transient.clone(),
        };
        self.short_circuit_query(&request.chaincode, kind, request, PeerRole::ChaincodeQuery)
            .await
    }

    /// Ledger query for a committed transaction by TxID, via QSCC.
    pub async fn query_transaction(&self, tx_id: &str) -> Result<Vec<u8>, Error> {
        if tx_id.trim().is_empty() {
            return Err(Error::argument("tx id must not be blank"));
        }
        let qscc = ChaincodeDescriptor {
            name: QSCC.to_string(),
            version: String::new(),
            path: String::new(),
            language: ChaincodeLanguage::Golang,
        };
        let request = TransactionProposalRequest::new(qscc.clone(), "GetTransactionByID")
            .arg(self.name.as_bytes().to_vec())
            .arg(tx_id.as_bytes().to_vec());
        let kind = ProposalKind::Query {
            fcn: request.fcn.clone(),
            args: request.args.clone(),
            transient: HashMap::new(),
        };
        self.short_circuit_query(&qscc, kind, &request, PeerRole::LedgerQuery)
            .await
    }

    async fn short_circuit_query(
        &self,
        chaincode: &ChaincodeDescriptor,
        kind: ProposalKind,
        request: &TransactionProposalRequest,
        role: PeerRole,
    ) -> Result<Vec<u8>, Error> {
        self.ensure_initialized()?;
        let identity = self.ctx.identity()?;

        let candidates: Vec<Arc<Peer>> = self
            .peers
            .read()
            .iter()
            .filter(|p| p.has_role(role))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(Error::argument(format!("channel has no {role:?} peers")));
        }

        let context = TransactionContext::new(&identity);
        let signed = ProposalBuilder::new(self.name.clone(), chaincode, &context, kind)
            .build_signed(&identity)?;
        let deadline = request.proposal_wait.unwrap_or(self.ctx.config.proposal_wait());

        let mut last_error = None;
        for peer in candidates {
            match peer.send_proposal(signed.clone(), deadline).await {
                Ok(response) => {
                    let wrapped = PeerResponse {
                        peer: peer.name().to_string(),
                        endpoint: peer.url().to_string(),
                        response,
                    };
                    if wrapped.is_successful() {
                        return Ok(wrapped.chaincode_payload());
                    }
                    let status =
                        wrapped.response.response.as_ref().map(|r| r.status).unwrap_or(0);
                    last_error = Some(Error::Proposal {
                        endpoint: wrapped.endpoint,
                        message: format!("query refused with status {status}"),
                    });
                }
                Err(e) => {
                    debug!(channel = %self.name, peer = %peer.name(), error = %e, "query attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::argument("no query candidates")))
    }

    // ────────────────────────────────────────────────────────────────────
    // CONFIG BLOCKS AND DISCOVERY
    // ────────────────────────────────────────────────────────────────────

    async fn fetch_latest_config_block(
        &self,
        identity: &Arc<SigningIdentity>,
    ) -> Result<Block, Error> {
        let orderers = self.orderers();
        let mut last_error = None;
        for orderer in orderers {
            match self
                .fetch_block(
                    identity,
                    &orderer,
                    SeekPosition::newest(),
                    SeekPosition::newest(),
                    self.ctx.config.channel_config_wait(),
                )
                .await
            {
                Ok(block) => return Ok(block),
                Err(e) => {
                    warn!(channel = %self.name, orderer = %orderer.name(), error = %e, "config block fetch failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::argument("channel has no orderers")))
    }

    async fn fetch_block(
        &self,
        identity: &Arc<SigningIdentity>,
        orderer: &Arc<Orderer>,
        start: SeekPosition,
        stop: SeekPosition,
        deadline: Duration,
    ) -> Result<Block, Error> {
        let seek = SeekInfo {
            start: Some(start),
            stop: Some(stop),
            behavior: seek_info::SeekBehavior::BlockUntilReady as i32,
        };
        let envelope =
            self.wrap_payload(identity, HeaderType::DeliverSeekInfo, seek.encode_to_vec())?;

        let blocks = orderer.deliver(envelope, deadline).await?;
        blocks.into_iter().next().ok_or_else(|| Error::Transaction {
            tx_id: None,
            endpoint: Some(orderer.url().to_string()),
            message: "deliver returned no blocks".to_string(),
        })
    }

    /// Wraps `data` in a signed envelope with a fresh transaction
    /// context.
    fn wrap_payload(
        &self,
        identity: &Arc<SigningIdentity>,
        header_type: HeaderType,
        data: Vec<u8>,
    ) -> Result<Envelope, Error> {
        let context = TransactionContext::new(identity);
        let channel_header = ChannelHeader {
            r#type: header_type as i32,
            version: 1,
            timestamp: Some(now_timestamp()),
            channel_id: self.name.clone(),
            tx_id: context.tx_id.clone(),
            epoch: 0,
            extension: Vec::new(),
            tls_cert_hash: Vec::new(),
        };
        let payload = Payload {
            header: Some(Header {
                channel_header: channel_header.encode_to_vec(),
                signature_header: SignatureHeader {
                    creator: context.creator.clone(),
                    nonce: context.nonce.clone(),
                }
                .encode_to_vec(),
            }),
            data,
        }
        .encode_to_vec();
        let signature = identity.sign(&payload)?;
        Ok(Envelope { payload, signature })
    }

    fn spawn_discovery(&self, identity: &Arc<SigningIdentity>) {
        let frequency = self.ctx.config.service_discovery_frequency();
        if frequency.is_zero() {
            return;
        }
        let candidates: Vec<Arc<Peer>> = self
            .peers
            .read()
            .iter()
            .filter(|p| p.has_role(PeerRole::ServiceDiscovery))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return;
        }

        let channel = self.name.clone();
        let creator = identity.creator().to_vec();
        let deadline = self.ctx.config.proposal_wait();
        let shutdown = Arc::clone(&self.shutdown_notify);
        // The task holds the sink, not the channel, so no cycle forms.
        let sink = Arc::clone(&self.discovered);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frequency);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => {}
                }
                let request = DiscoveryRequest {
                    channel: channel.clone(),
                    authentication: creator.clone(),
                };
                for peer in &candidates {
                    match peer.send_discovery(request.clone(), deadline).await {
                        Ok(response) => {
                            debug!(
                                channel = %channel,
                                peer = %peer.name(),
                                known = response.peers.len(),
                                "service discovery refreshed"
                            );
                            *sink.write() = response.peers;
                            break;
                        }
                        Err(e) => {
                            debug!(channel = %channel, peer = %peer.name(), error = %e, "discovery attempt failed");
                        }
                    }
                }
            }
            debug!(channel = %channel, "discovery task stopped");
        });
        *self.discovery_task.lock() = Some(task);
    }

    // ────────────────────────────────────────────────────────────────────
    // SNAPSHOT
    // ────────────────────────────────────────────────────────────────────

    /// Serializes the channel's observable shape (name, endpoints,
    /// roles) into a versioned blob. Live handles, the user context,
    /// and the crypto suite are re-bound at deserialization time by the
    /// owning client. Client TLS key material travels with the blob;
    /// store it accordingly.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let snapshot = ChannelSnapshot {
            name: self.name.clone(),
            peers: self
                .peers()
                .iter()
                .map(|p| PeerSnapshot {
                    name: p.name().to_string(),
                    url: p.url().to_string(),
                    config: p
                        .endpoint()
                        .map(|e| e.config().clone())
                        .unwrap_or_default(),
                    roles: p.roles().into_iter().collect(),
                })
                .collect(),
            orderers: self
                .orderers()
                .iter()
                .map(|o| NodeSnapshot {
                    name: o.name().to_string(),
                    url: o.url().to_string(),
                    config: o
                        .endpoint()
                        .map(|e| e.config().clone())
                        .unwrap_or_default(),
                })
                .collect(),
            event_hubs: self
                .event_hubs()
                .iter()
                .map(|h| NodeSnapshot {
                    name: h.name().to_string(),
                    url: h.url().to_string(),
                    config: EndpointConfig::default(),
                })
                .collect(),
        };

        let mut bytes = vec![SNAPSHOT_VERSION];
        bytes.extend(
            bincode::serialize(&snapshot)
                .map_err(|e| Error::argument(format!("channel snapshot failed: {e}")))?,
        );
        Ok(bytes)
    }

    /// Rebuilds a channel from a serialized snapshot against `ctx`.
    pub(crate) fn from_snapshot(bytes: &[u8], ctx: Arc<ClientContext>) -> Result<Self, Error> {
        let Some((&version, rest)) = bytes.split_first() else {
            return Err(Error::argument("empty channel snapshot"));
        };
        if version != SNAPSHOT_VERSION {
            return Err(Error::argument(format!(
                "unsupported channel snapshot version {version}"
            )));
        }
        let snapshot: ChannelSnapshot = bincode::deserialize(rest)
            .map_err(|e| Error::argument(format!("malformed channel snapshot: {e}")))?;

        let channel = Self::new(snapshot.name, ctx)?;
        for peer in snapshot.peers {
            let endpoint = Endpoint::new(&peer.url, peer.config)?;
            let rebuilt = Arc::new(Peer::new(peer.name, endpoint));
            rebuilt.set_roles(peer.roles.into_iter().collect());
            channel.add_peer(rebuilt)?;
        }
        for orderer in snapshot.orderers {
            let endpoint = Endpoint::new(&orderer.url, orderer.config)?;
            channel.add_orderer(Arc::new(Orderer::new(orderer.name, endpoint)))?;
        }
        for hub in snapshot.event_hubs {
            let endpoint = Endpoint::new(&hub.url, hub.config)?;
            channel.add_event_hub(Arc::new(EventHub::new(hub.name, endpoint)))?;
        }
        Ok(channel)
    }

    // ────────────────────────────────────────────────────────────────────
    // GUARDS
    // ────────────────────────────────────────────────────────────────────

    fn ensure_initialized(&self) -> Result<(), Error> {
        match self.state() {
            ChannelState::Initialized => Ok(()),
            ChannelState::Shutdown => Err(Error::ShuttingDown { channel: self.name.clone() }),
            ChannelState::Created => {
                Err(Error::argument(format!("channel {} is not initialized", self.name)))
            }
        }
    }

    fn ensure_not_shutdown(&self) -> Result<(), Error> {
        if self.state() == ChannelState::Shutdown {
            return Err(Error::ShuttingDown { channel: self.name.clone() });
        }
        Ok(())
    }
}

/// Groups successful responses by their (proposal hash, payload) pair.
/// One group means the endorsements agree.
fn consistency_groups(responses: &[PeerResponse]) -> Vec<Vec<EndorserDetail>> {
    let mut groups: Vec<((Vec<u8>, Vec<u8>), Vec<EndorserDetail>)> = Vec::new();

    for response in responses {
        let payload_bytes = response.response.payload.clone();
        let proposal_hash = ProposalResponsePayload::decode(payload_bytes.as_slice())
            .map(|p| p.proposal_hash)
            .unwrap_or_default();
        let key = (proposal_hash, payload_bytes);

        let detail = EndorserDetail {
            peer: response.peer.clone(),
            status: response.response.response.as_ref().map(|r| r.status).unwrap_or(0),
            payload: response.chaincode_payload(),
        };

        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(detail),
            None => groups.push((key, vec![detail])),
        }
    }

    groups.into_iter().map(|(_, members)| members).collect()
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
