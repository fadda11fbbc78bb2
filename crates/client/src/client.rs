//! Client facade: owns the configuration, the crypto suite, the user
//! context, and the channel registry.
//!
//! There is no process-global state. Everything a channel or transport
//! needs travels in one [`ClientContext`] owned by the [`HfClient`]
//! that created it, so two clients with different settings coexist in
//! one process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use fabric_common::crypto::{CryptoConfig, CryptoSuite, CryptoSuiteFactory};
use fabric_common::SdkConfig;
use fabric_proto::common::ConfigSignature;

use crate::channel::{Channel, ChannelConfiguration, PeerResponse};
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::Error;
use crate::event_hub::EventHub;
use crate::identity::{SigningIdentity, User};
use crate::orderer::Orderer;
use crate::peer::Peer;
use crate::proposal::{ChaincodeDescriptor, ProposalBuilder, ProposalKind, TransactionContext};

// ════════════════════════════════════════════════════════════════════════════
// CONTEXT
// ════════════════════════════════════════════════════════════════════════════

/// The dependencies every channel-side component carries: settings,
/// the crypto suite, and the current signing identity.
pub struct ClientContext {
    pub config: Arc<SdkConfig>,
    pub suite: Arc<CryptoSuite>,
    identity: RwLock<Option<Arc<SigningIdentity>>>,
}

impl ClientContext {
    fn new(config: Arc<SdkConfig>, suite: Arc<CryptoSuite>) -> Self {
        Self { config, suite, identity: RwLock::new(None) }
    }

    /// The bound user context, or an argument error when none is set.
    pub fn identity(&self) -> Result<Arc<SigningIdentity>, Error> {
        self.identity
            .read()
            .clone()
            .ok_or_else(|| Error::argument("no user context bound to the client"))
    }

    fn set_identity(&self, identity: Arc<SigningIdentity>) {
        *self.identity.write() = Some(identity);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// Entry point of the SDK: factory for peers, orderers, event hubs,
/// and channels.
pub struct HfClient {
    ctx: Arc<ClientContext>,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl std::fmt::Debug for HfClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfClient")
            .field("channels", &self.channels.lock().len())
            .finish_non_exhaustive()
    }
}

impl HfClient {
    /// Builds a client whose crypto suite is derived from the SDK
    /// settings.
    pub fn new(config: SdkConfig) -> Result<Self, Error> {
        let factory = CryptoSuiteFactory::new();
        let suite = factory.suite(CryptoConfig::from_sdk(&config)?)?;
        Ok(Self::with_suite(config, suite))
    }

    /// Builds a client around an existing suite (shared trust store).
    pub fn with_suite(config: SdkConfig, suite: Arc<CryptoSuite>) -> Self {
        Self {
            ctx: Arc::new(ClientContext::new(Arc::new(config), suite)),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.ctx.config
    }

    pub fn crypto_suite(&self) -> &Arc<CryptoSuite> {
        &self.ctx.suite
    }

    /// Binds `user` as the client's signing context. The enrollment
    /// certificate must chain to an anchor already loaded into the
    /// suite's trust store.
    pub fn set_user_context(&self, user: User) -> Result<Arc<SigningIdentity>, Error> {
        let identity = Arc::new(SigningIdentity::bind(user, Arc::clone(&self.ctx.suite))?);
        self.ctx.set_identity(Arc::clone(&identity));
        info!(user = %identity.name(), msp = %identity.msp_id(), "user context set");
        Ok(identity)
    }

    pub fn user_context(&self) -> Option<Arc<SigningIdentity>> {
        self.ctx.identity().ok()
    }

    // ────────────────────────────────────────────────────────────────────
    // FACTORIES
    // ────────────────────────────────────────────────────────────────────

    pub fn new_peer(
        &self,
        name: impl Into<String>,
        url: &str,
        config: EndpointConfig,
    ) -> Result<Arc<Peer>, Error> {
        Ok(Arc::new(Peer::new(name, Endpoint::new(url, config)?)))
    }

    pub fn new_orderer(
        &self,
        name: impl Into<String>,
        url: &str,
        config: EndpointConfig,
    ) -> Result<Arc<Orderer>, Error> {
        Ok(Arc::new(Orderer::new(name, Endpoint::new(url, config)?)))
    }

    pub fn new_event_hub(
        &self,
        name: impl Into<String>,
        url: &str,
        config: EndpointConfig,
    ) -> Result<Arc<EventHub>, Error> {
        Ok(Arc::new(EventHub::new(name, Endpoint::new(url, config)?)))
    }

    /// Attaches to an existing channel by name.
    pub fn new_channel(&self, name: impl Into<String>) -> Result<Arc<Channel>, Error> {
        let channel = Arc::new(Channel::new(name, Arc::clone(&self.ctx))?);
        self.register_channel(channel)
    }

    /// Creates a brand-new channel: broadcasts the signed
    /// configuration update and fetches the genesis block.
    pub async fn create_channel(
        &self,
        name: impl Into<String>,
        orderer: Arc<Orderer>,
        configuration: ChannelConfiguration,
        signatures: Vec<ConfigSignature>,
    ) -> Result<Arc<Channel>, Error> {
        let channel = Arc::new(
            Channel::create(name, Arc::clone(&self.ctx), orderer, configuration, signatures)
                .await?,
        );
        self.register_channel(channel)
    }

    fn register_channel(&self, channel: Arc<Channel>) -> Result<Arc<Channel>, Error> {
        let mut channels = self.channels.lock();
        if channels.contains_key(channel.name()) {
            return Err(Error::argument(format!(
                "channel {} already registered",
                channel.name()
            )));
        }
        channels.insert(channel.name().to_string(), Arc::clone(&channel));
        debug!(channel = %channel.name(), "channel registered");
        Ok(channel)
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.lock().get(name).cloned()
    }

    /// Detaches a channel from the registry without shutting it down.
    pub fn remove_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.lock().remove(name)
    }

    /// Rebuilds a channel from [`Channel::serialize`] output and
    /// registers it against this client's context.
    pub fn deserialize_channel(&self, bytes: &[u8]) -> Result<Arc<Channel>, Error> {
        let channel = Arc::new(Channel::from_snapshot(bytes, Arc::clone(&self.ctx))?);
        self.register_channel(channel)
    }

    // ────────────────────────────────────────────────────────────────────
    // INSTALL
    // ────────────────────────────────────────────────────────────────────

    /// Sends an LSCC install proposal to each target peer. Install is
    /// not channel-scoped, and per-peer results differ legitimately,
    /// so responses are returned unvalidated.
    pub async fn send_install_proposal(
        &self,
        chaincode: &ChaincodeDescriptor,
        code_package: Vec<u8>,
        targets: &[Arc<Peer>],
    ) -> Result<Vec<PeerResponse>, Error> {
        if targets.is_empty() {
            return Err(Error::argument("install requires at least one target peer"));
        }
        if code_package.is_empty() {
            return Err(Error::argument("install requires a packaged chaincode archive"));
        }
        let identity = self.ctx.identity()?;

        let context = TransactionContext::new(&identity);
        let signed = ProposalBuilder::new(
            "",
            chaincode,
            &context,
            ProposalKind::Install { code_package },
        )
        .build_signed(&identity)?;

        let deadline = self.ctx.config.proposal_wait();
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
        let mut first_error = None;
        for (peer, outcome) in outcomes {
            match outcome {
                Ok(response) => responses.push(PeerResponse {
                    peer: peer.name().to_string(),
                    endpoint: peer.url().to_string(),
                    response,
                }),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if responses.is_empty() {
            return Err(first_error.unwrap_or_else(|| Error::argument("no install targets")));
        }
        Ok(responses)
    }

    /// Shuts down every registered channel.
    pub async fn shutdown(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.lock().values().cloned().collect();
        futures::future::join_all(channels.iter().map(|c| c.shutdown())).await;
        self.channels.lock().clear();
    }
}
