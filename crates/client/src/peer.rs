//! Peer client: endorsement proposals and service discovery against
//! one endorsing peer.
//!
//! ## Transport Abstraction
//!
//! [`EndorserService`] decouples the peer from its gRPC transport, so
//! orchestration code and tests run against the same [`Peer`] type.
//! Implementations are single-attempt and deadline-free:
//!
//! - Implementations MUST NOT retry internally.
//! - Implementations MUST NOT enforce deadlines; [`Peer`] wraps every
//!   call in the caller's deadline so mocks and gRPC behave alike.
//! - Implementations MUST map failures into the client error taxonomy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, warn};

use fabric_proto::discovery::{DiscoveryRequest, DiscoveryResponse};
use fabric_proto::proposal::{ProposalResponse, SignedProposal};
use fabric_proto::service::discovery_client::DiscoveryClient;
use fabric_proto::service::endorser_client::EndorserClient;

use crate::endpoint::Endpoint;
use crate::error::Error;

// ════════════════════════════════════════════════════════════════════════════
// ROLES
// ════════════════════════════════════════════════════════════════════════════

/// What a peer may be used for. Endorsement fan-out selects only
/// `Endorsing` peers; ledger queries consult `LedgerQuery` peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PeerRole {
    Endorsing,
    ChaincodeQuery,
    LedgerQuery,
    EventSource,
    ServiceDiscovery,
}

impl PeerRole {
    /// The default role set: everything.
    pub fn all() -> HashSet<PeerRole> {
        [
            PeerRole::Endorsing,
            PeerRole::ChaincodeQuery,
            PeerRole::LedgerQuery,
            PeerRole::EventSource,
            PeerRole::ServiceDiscovery,
        ]
        .into_iter()
        .collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Async transport to one peer's Endorser and Discovery services.
#[async_trait]
pub trait EndorserService: Send + Sync {
    async fn process_proposal(
        &self,
        proposal: SignedProposal,
    ) -> Result<ProposalResponse, Error>;

    async fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse, Error>;

    /// Releases any cached transport state. Idempotent.
    async fn close(&self) {}
}

// ════════════════════════════════════════════════════════════════════════════
// GRPC TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// Production transport: dials lazily and reuses one multiplexed
/// channel until an error forces a redial.
pub struct GrpcEndorserService {
    endpoint: Arc<Endpoint>,
    channel: Mutex<Option<Channel>>,
}

impl GrpcEndorserService {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint, channel: Mutex::new(None) }
    }

    async fn channel(&self) -> Result<Channel, Error> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }
        debug!(endpoint = %self.endpoint.url(), "dialing peer");
        let channel = self.endpoint.connect().await?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn reset(&self) {
        *self.channel.lock().await = None;
    }
}

#[async_trait]
impl EndorserService for GrpcEndorserService {
    async fn process_proposal(
        &self,
        proposal: SignedProposal,
    ) -> Result<ProposalResponse, Error> {
        let mut client = EndorserClient::new(self.channel().await?);
        match client.process_proposal(proposal).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                self.reset().await;
                Err(Error::Proposal {
                    endpoint: self.endpoint.url().to_string(),
                    message: format!("endorser refused: {status}"),
                })
            }
        }
    }

    async fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse, Error> {
        let mut client = DiscoveryClient::new(self.channel().await?);
        match client.discover(request).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                self.reset().await;
                Err(Error::Proposal {
                    endpoint: self.endpoint.url().to_string(),
                    message: format!("discovery failed: {status}"),
                })
            }
        }
    }

    async fn close(&self) {
        self.reset().await;
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PEER
// ════════════════════════════════════════════════════════════════════════════

/// One endorsing peer: a name, a role set, and a transport.
pub struct Peer {
    name: String,
    url: String,
    roles: RwLock<HashSet<PeerRole>>,
    endpoint: Option<Arc<Endpoint>>,
    service: Arc<dyn EndorserService>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Peer {
    /// Peer over the production gRPC transport.
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let endpoint = Arc::new(endpoint);
        Self {
            name: name.into(),
            url: endpoint.url().to_string(),
            roles: RwLock::new(PeerRole::all()),
            endpoint: Some(Arc::clone(&endpoint)),
            service: Arc::new(GrpcEndorserService::new(endpoint)),
        }
    }

    /// Peer over an injected transport (alternate stacks, tests).
    pub fn with_service(
        name: impl Into<String>,
        url: impl Into<String>,
        service: Arc<dyn EndorserService>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            roles: RwLock::new(PeerRole::all()),
            endpoint: None,
            service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    pub fn has_role(&self, role: PeerRole) -> bool {
        self.roles.read().contains(&role)
    }

    pub fn roles(&self) -> HashSet<PeerRole> {
        self.roles.read().clone()
    }

    pub fn set_roles(&self, roles: HashSet<PeerRole>) {
        *self.roles.write() = roles;
    }

    /// Sends a signed proposal, bounded by `deadline`.
    pub async fn send_proposal(
        &self,
        proposal: SignedProposal,
        deadline: Duration,
    ) -> Result<ProposalResponse, Error> {
        match tokio::time::timeout(deadline, self.service.process_proposal(proposal)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(peer = %self.name, ?deadline, "endorsement deadline expired");
                Err(Error::Timeout {
                    endpoint: self.url.clone(),
                    operation: "process_proposal",
                    elapsed: deadline,
                })
            }
        }
    }

    /// Sends a discovery request, bounded by `deadline`.
    pub async fn send_discovery(
        &self,
        request: DiscoveryRequest,
        deadline: Duration,
    ) -> Result<DiscoveryResponse, Error> {
        match tokio::time::timeout(deadline, self.service.discover(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                endpoint: self.url.clone(),
                operation: "discover",
                elapsed: deadline,
            }),
        }
    }

    pub async fn shutdown(&self) {
        self.service.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_proto::proposal::Response;
    use parking_lot::Mutex as SyncMutex;

    /// FIFO mock transport, empty queue means a transport error.
    pub(crate) struct MockEndorser {
        responses: SyncMutex<Vec<Result<ProposalResponse, Error>>>,
        delay: Option<Duration>,
    }

    impl MockEndorser {
        pub(crate) fn new() -> Self {
            Self { responses: SyncMutex::new(Vec::new()), delay: None }
        }

        fn slow(delay: Duration) -> Self {
            Self { responses: SyncMutex::new(Vec::new()), delay: Some(delay) }
        }

        pub(crate) fn push(&self, response: Result<ProposalResponse, Error>) {
            self.responses.lock().push(response);
        }
    }

    #[async_trait]
    impl EndorserService for MockEndorser {
        async fn process_proposal(
            &self,
            _proposal: SignedProposal,
        ) -> Result<ProposalResponse, Error> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut queue = self.responses.lock();
            if queue.is_empty() {
                return Err(Error::Proposal {
                    endpoint: "mock".to_string(),
                    message: "no mock response".to_string(),
                });
            }
            queue.remove(0)
        }

        async fn discover(&self, _request: DiscoveryRequest) -> Result<DiscoveryResponse, Error> {
            Ok(DiscoveryResponse::default())
        }
    }

    fn ok_response(status: i32, payload: &[u8]) -> ProposalResponse {
        ProposalResponse {
            response: Some(Response {
                status,
                message: String::new(),
                payload: payload.to_vec(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn proposal_flows_through_transport() {
        let mock = Arc::new(MockEndorser::new());
        mock.push(Ok(ok_response(200, b"OK")));

        let peer = Peer::with_service("peer0", "grpc://mock:7051", mock);
        let response = peer
            .send_proposal(SignedProposal::default(), Duration::from_secs(1))
            .await
            .expect("response");
        assert_eq!(response.response.expect("inner").payload, b"OK");
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout_error() {
        let mock = Arc::new(MockEndorser::slow(Duration::from_secs(5)));
        let peer = Peer::with_service("peer0", "grpc://mock:7051", mock);

        let err = peer
            .send_proposal(SignedProposal::default(), Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn transport_error_is_proposal_error() {
        let mock = Arc::new(MockEndorser::new());
        let peer = Peer::with_service("peer0", "grpc://mock:7051", mock);

        let err = peer
            .send_proposal(SignedProposal::default(), Duration::from_secs(1))
            .await
            .expect_err("refusal");
        assert!(matches!(err, Error::Proposal { .. }));
    }

    #[test]
    fn roles_default_to_all() {
        let mock = Arc::new(MockEndorser::new());
        let peer = Peer::with_service("peer0", "grpc://mock:7051", mock);
        assert!(peer.has_role(PeerRole::Endorsing));
        assert!(peer.has_role(PeerRole::LedgerQuery));

        peer.set_roles([PeerRole::EventSource].into_iter().collect());
        assert!(!peer.has_role(PeerRole::Endorsing));
        assert!(peer.has_role(PeerRole::EventSource));
    }
}
