//! Orderer client: broadcast of transaction envelopes and block
//! delivery for channel-configuration reads.
//!
//! [`BroadcastService`] is the transport seam, mirroring the peer
//! side: single attempt, no deadline, errors already typed. Retry and
//! deadlines belong to the orchestration layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, warn};

use fabric_proto::common::{Block, Envelope, Status};
use fabric_proto::orderer::{deliver_response, BroadcastResponse};
use fabric_proto::service::atomic_broadcast_client::AtomicBroadcastClient;

use crate::endpoint::Endpoint;
use crate::error::Error;

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Async transport to one ordering-service node.
#[async_trait]
pub trait BroadcastService: Send + Sync {
    /// Submits one envelope and returns the service's acknowledgement.
    async fn broadcast(&self, envelope: Envelope) -> Result<BroadcastResponse, Error>;

    /// Sends a seek envelope and collects the delivered blocks until
    /// the stream's terminal status.
    async fn deliver(&self, seek_envelope: Envelope) -> Result<Vec<Block>, Error>;

    /// Releases any cached transport state. Idempotent.
    async fn close(&self) {}
}

// ════════════════════════════════════════════════════════════════════════════
// GRPC TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// Production transport over the AtomicBroadcast service. Both RPCs
/// are bidi streams on the wire; broadcast sends a single envelope and
/// reads a single acknowledgement.
pub struct GrpcBroadcastService {
    endpoint: Arc<Endpoint>,
    channel: Mutex<Option<Channel>>,
}

impl GrpcBroadcastService {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint, channel: Mutex::new(None) }
    }

    async fn channel(&self) -> Result<Channel, Error> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }
        debug!(endpoint = %self.endpoint.url(), "dialing orderer");
        let channel = self.endpoint.connect().await.map_err(|e| Error::Transaction {
            tx_id: None,
            endpoint: Some(self.endpoint.url().to_string()),
            message: e.to_string(),
        })?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn reset(&self) {
        *self.channel.lock().await = None;
    }

    fn transaction_error(&self, message: String) -> Error {
        Error::Transaction {
            tx_id: None,
            endpoint: Some(self.endpoint.url().to_string()),
            message,
        }
    }
}

#[async_trait]
impl BroadcastService for GrpcBroadcastService {
    async fn broadcast(&self, envelope: Envelope) -> Result<BroadcastResponse, Error> {
        let mut client = AtomicBroadcastClient::new(self.channel().await?);
        let outbound = futures::stream::iter(vec![envelope]);

        let mut inbound = match client.broadcast(outbound).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                self.reset().await;
                return Err(self.transaction_error(format!("broadcast rejected: {status}")));
            }
        };

        match inbound.message().await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.reset().await;
                Err(self.transaction_error("broadcast stream closed without response".to_string()))
            }
            Err(status) => {
                self.reset().await;
                Err(self.transaction_error(format!("broadcast stream failed: {status}")))
            }
        }
    }

    async fn deliver(&self, seek_envelope: Envelope) -> Result<Vec<Block>, Error> {
        let mut client = AtomicBroadcastClient::new(self.channel().await?);
        let outbound = futures::stream::iter(vec![seek_envelope]);

        let mut inbound = match client.deliver(outbound).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                self.reset().await;
                return Err(self.transaction_error(format!("deliver rejected: {status}")));
            }
        };

        let mut blocks = Vec::new();
        loop {
            match inbound.message().await {
                Ok(Some(message)) => match message.r#type {
                    Some(deliver_response::Type::Block(block)) => blocks.push(block),
                    Some(deliver_response::Type::Status(status)) => {
                        if status == Status::Success as i32 {
                            return Ok(blocks);
                        }
                        return Err(self
                            .transaction_error(format!("deliver ended with status {status}")));
                    }
                    None => {
                        return Err(self.transaction_error(
                            "deliver response carried neither block nor status".to_string(),
                        ));
                    }
                },
                Ok(None) => {
                    self.reset().await;
                    return Err(
                        self.transaction_error("deliver stream ended without status".to_string())
                    );
                }
                Err(status) => {
                    self.reset().await;
                    return Err(self.transaction_error(format!("deliver stream failed: {status}")));
                }
            }
        }
    }

    async fn close(&self) {
        self.reset().await;
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ORDERER
// ════════════════════════════════════════════════════════════════════════════

/// One ordering-service node: a name plus a transport.
pub struct Orderer {
    name: String,
    url: String,
    endpoint: Option<Arc<Endpoint>>,
    service: Arc<dyn BroadcastService>,
}

impl std::fmt::Debug for Orderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orderer")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Orderer {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let endpoint = Arc::new(endpoint);
        Self {
            name: name.into(),
            url: endpoint.url().to_string(),
            endpoint: Some(Arc::clone(&endpoint)),
            service: Arc::new(GrpcBroadcastService::new(endpoint)),
        }
    }

    pub fn with_service(
        name: impl Into<String>,
        url: impl Into<String>,
        service: Arc<dyn BroadcastService>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
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

    /// Broadcasts one envelope, bounded by `deadline`.
    pub async fn broadcast(
        &self,
        envelope: Envelope,
        deadline: Duration,
    ) -> Result<BroadcastResponse, Error> {
        match tokio::time::timeout(deadline, self.service.broadcast(envelope)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(orderer = %self.name, ?deadline, "broadcast deadline expired");
                Err(Error::Timeout {
                    endpoint: self.url.clone(),
                    operation: "broadcast",
                    elapsed: deadline,
                })
            }
        }
    }

    /// Fetches blocks for a seek request, bounded by `deadline`. Used
    /// only for config and genesis block reads.
    pub async fn deliver(
        &self,
        seek_envelope: Envelope,
        deadline: Duration,
    ) -> Result<Vec<Block>, Error> {
        match tokio::time::timeout(deadline, self.service.deliver(seek_envelope)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                endpoint: self.url.clone(),
                operation: "deliver",
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
    use parking_lot::Mutex as SyncMutex;

    struct MockBroadcast {
        responses: SyncMutex<Vec<Result<BroadcastResponse, Error>>>,
    }

    impl MockBroadcast {
        fn new() -> Self {
            Self { responses: SyncMutex::new(Vec::new()) }
        }

        fn push(&self, response: Result<BroadcastResponse, Error>) {
            self.responses.lock().push(response);
        }
    }

    #[async_trait]
    impl BroadcastService for MockBroadcast {
        async fn broadcast(&self, _envelope: Envelope) -> Result<BroadcastResponse, Error> {
            let mut queue = self.responses.lock();
            if queue.is_empty() {
                return Err(Error::Transaction {
                    tx_id: None,
                    endpoint: Some("mock".to_string()),
                    message: "no mock response".to_string(),
                });
            }
            queue.remove(0)
        }

        async fn deliver(&self, _seek: Envelope) -> Result<Vec<Block>, Error> {
            Ok(vec![Block::default()])
        }
    }

    #[tokio::test]
    async fn broadcast_returns_service_response() {
        let mock = Arc::new(MockBroadcast::new());
        mock.push(Ok(BroadcastResponse { status: Status::Success as i32, info: String::new() }));

        let orderer = Orderer::with_service("orderer0", "grpc://mock:7050", mock);
        let response = orderer
            .broadcast(Envelope::default(), Duration::from_secs(1))
            .await
            .expect("response");
        assert_eq!(response.status, Status::Success as i32);
    }

    #[tokio::test]
    async fn broadcast_failure_is_transaction_error() {
        let mock = Arc::new(MockBroadcast::new());
        let orderer = Orderer::with_service("orderer0", "grpc://mock:7050", mock);

        let err = orderer
            .broadcast(Envelope::default(), Duration::from_secs(1))
            .await
            .expect_err("error");
        assert!(matches!(err, Error::Transaction { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deliver_collects_blocks() {
        let mock = Arc::new(MockBroadcast::new());
        let orderer = Orderer::with_service("orderer0", "grpc://mock:7050", mock);

        let blocks = orderer
            .deliver(Envelope::default(), Duration::from_secs(1))
            .await
            .expect("blocks");
        assert_eq!(blocks.len(), 1);
    }
}
