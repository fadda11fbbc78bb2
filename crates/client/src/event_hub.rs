//! Event hub: a stateful consumer of one peer's block event stream.
//!
//! ## State Machine
//!
//! ```text
//! DISCONNECTED ──connect()──▶ CONNECTING ──ack──▶ CONNECTED
//!      ▲                          │                  │
//!      │        register timeout  │                  │ stream drop
//!      └──────────────────────────┴──────────────────┘
//!                    (backoff, then reconnect)
//!
//! any state ──shutdown()──▶ SHUTDOWN (terminal)
//! ```
//!
//! The hub owns one background task. Each connection attempt sends a
//! signed registration naming the Block interest and waits for the
//! peer's acknowledgement within the registration deadline; a missing
//! ack forces a disconnect. On reconnection the replay cursor resumes
//! from `last_block + 1`, or from the newest block when nothing has
//! been seen, preserving at-least-once delivery.
//!
//! Failure taxonomy:
//!
//! - transport drop, registration timeout: reconnect with backoff; a
//!   warning is logged every `reconnection_warning_rate` consecutive
//!   failures
//! - replay gap (block N arrives while N-1 was never seen): surfaced
//!   to listeners via `on_gap`, stream continues
//! - malformed block: fatal; the hub disconnects, alarms via
//!   `on_fatal`, and stays down
//!
//! Dispatch to a single listener is sequential, so no listener ever
//! observes blocks out of order; duplicates below the cursor are
//! dropped before dispatch.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use prost::Message;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::{debug, error, info, warn};

use fabric_common::SdkConfig;
use fabric_proto::block;
use fabric_proto::common::Block;
use fabric_proto::events::{event, Event, EventType, Interest, Register, SignedEvent};
use fabric_proto::orderer::SeekPosition;
use fabric_proto::service::events_client::EventsClient;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::identity::SigningIdentity;
use crate::proposal::now_timestamp;

// ════════════════════════════════════════════════════════════════════════════
// STATE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Shutdown,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_SHUTDOWN: u8 = 3;

fn state_from(raw: u8) -> HubState {
    match raw {
        STATE_CONNECTING => HubState::Connecting,
        STATE_CONNECTED => HubState::Connected,
        STATE_SHUTDOWN => HubState::Shutdown,
        _ => HubState::Disconnected,
    }
}

/// Where a fresh connection resumes reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPosition {
    Newest,
    From(u64),
}

// ════════════════════════════════════════════════════════════════════════════
// SOURCE AND LISTENER TRAITS
// ════════════════════════════════════════════════════════════════════════════

pub type BlockStream = Pin<Box<dyn Stream<Item = Result<Event, Error>> + Send>>;

/// The wire side of the hub: opens the event stream and sends the
/// signed registration. The first stream item is expected to be the
/// registration acknowledgement.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn connect(
        &self,
        registration: SignedEvent,
        start: ReplayPosition,
    ) -> Result<BlockStream, Error>;

    /// Releases any cached transport state. Idempotent.
    async fn close(&self) {}
}

/// Receives dispatched blocks. Callbacks run on the hub task and must
/// not block.
pub trait BlockListener: Send + Sync {
    fn on_block(&self, block: &Block);

    /// Replay gap: `received` arrived while `expected` was next.
    fn on_gap(&self, _expected: u64, _received: u64) {}

    /// Fatal hub failure; no further blocks will be delivered.
    fn on_fatal(&self, _reason: &str) {}
}

// ════════════════════════════════════════════════════════════════════════════
// GRPC SOURCE
// ════════════════════════════════════════════════════════════════════════════

/// Production source speaking the peer Events `Chat` stream.
pub struct GrpcBlockSource {
    endpoint: Arc<Endpoint>,
    channel: tokio::sync::Mutex<Option<Channel>>,
}

impl GrpcBlockSource {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint, channel: tokio::sync::Mutex::new(None) }
    }

    async fn channel(&self) -> Result<Channel, Error> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }
        debug!(endpoint = %self.endpoint.url(), "dialing event service");
        let channel = self.endpoint.connect().await.map_err(|e| Error::EventHub {
            endpoint: self.endpoint.url().to_string(),
            message: e.to_string(),
        })?;
        *guard = Some(channel.clone());
        Ok(channel)
    }
}

/// Keeps the outbound half alive for as long as the inbound stream is
/// polled; dropping the sender would end the chat.
struct ChatStream {
    inbound: tonic::codec::Streaming<Event>,
    endpoint: String,
    _outbound: mpsc::Sender<SignedEvent>,
}

impl Stream for ChatStream {
    type Item = Result<Event, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        let this = self.get_mut();
        match Pin::new(&mut this.inbound).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(Err(status))) => Poll::Ready(Some(Err(Error::EventHub {
                endpoint: this.endpoint.clone(),
                message: format!("event stream failed: {status}"),
            }))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[async_trait]
impl BlockSource for GrpcBlockSource {
    async fn connect(
        &self,
        registration: SignedEvent,
        _start: ReplayPosition,
    ) -> Result<BlockStream, Error> {
        let mut client = EventsClient::new(self.channel().await?);

        let (tx, rx) = mpsc::channel::<SignedEvent>(4);
        tx.send(registration).await.map_err(|_| Error::EventHub {
            endpoint: self.endpoint.url().to_string(),
            message: "registration channel closed".to_string(),
        })?;

        let inbound = match client.chat(ReceiverStream::new(rx)).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                *self.channel.lock().await = None;
                return Err(Error::EventHub {
                    endpoint: self.endpoint.url().to_string(),
                    message: format!("chat rejected: {status}"),
                });
            }
        };

        Ok(Box::pin(ChatStream {
            inbound,
            endpoint: self.endpoint.url().to_string(),
            _outbound: tx,
        }))
    }

    async fn close(&self) {
        *self.channel.lock().await = None;
    }
}

// ════════════════════════════════════════════════════════════════════════════
// EVENT HUB
// ════════════════════════════════════════════════════════════════════════════

/// Shared between the hub handle and its background task.
struct HubShared {
    name: String,
    url: String,
    source: Arc<dyn BlockSource>,
    state: AtomicU8,
    running: AtomicBool,
    /// Highest block number dispatched; meaningful once `seen_any`.
    last_block: AtomicU64,
    seen_any: AtomicBool,
    reconnect_attempts: AtomicU64,
    blocks_delivered: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn BlockListener>>>,
    shutdown: Notify,
}

pub struct EventHub {
    shared: Arc<HubShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.shared.name)
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EventHub {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let endpoint = Arc::new(endpoint);
        let url = endpoint.url().to_string();
        Self::with_source(name, url, Arc::new(GrpcBlockSource::new(endpoint)))
    }

    pub fn with_source(
        name: impl Into<String>,
        url: impl Into<String>,
        source: Arc<dyn BlockSource>,
    ) -> Self {
        Self {
            shared: Arc::new(HubShared {
                name: name.into(),
                url: url.into(),
                source,
                state: AtomicU8::new(STATE_DISCONNECTED),
                running: AtomicBool::new(false),
                last_block: AtomicU64::new(0),
                seen_any: AtomicBool::new(false),
                reconnect_attempts: AtomicU64::new(0),
                blocks_delivered: AtomicU64::new(0),
                listeners: RwLock::new(Vec::new()),
                shutdown: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> HubState {
        state_from(self.shared.state.load(Ordering::SeqCst))
    }

    /// Highest block number delivered so far.
    pub fn last_block(&self) -> Option<u64> {
        if self.shared.seen_any.load(Ordering::SeqCst) {
            Some(self.shared.last_block.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Total reconnection attempts since connect.
    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn blocks_delivered(&self) -> u64 {
        self.shared.blocks_delivered.load(Ordering::SeqCst)
    }

    /// Registers a listener for dispatched blocks.
    pub fn subscribe(&self, listener: Arc<dyn BlockListener>) {
        self.shared.listeners.write().push(listener);
    }

    /// Starts the consumer task. Fails if the hub is already running
    /// or was shut down.
    pub fn connect(
        &self,
        identity: Arc<SigningIdentity>,
        config: &SdkConfig,
    ) -> Result<(), Error> {
        if self.state() == HubState::Shutdown {
            return Err(Error::EventHub {
                endpoint: self.shared.url.clone(),
                message: "event hub was shut down".to_string(),
            });
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::EventHub {
                endpoint: self.shared.url.clone(),
                message: "event hub already connected".to_string(),
            });
        }

        let shared = Arc::clone(&self.shared);
        let registration_wait = config.peer_event_registration_wait();
        let retry_wait = config.peer_retry_wait();
        let warning_rate = config.eventhub_reconnection_warning_rate.max(1);

        let handle = tokio::spawn(async move {
            Self::run(shared, identity, registration_wait, retry_wait, warning_rate).await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stops the consumer task, leaving the hub reconnectable.
    pub async fn disconnect(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdown.notify_waiters();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.source.close().await;
        if self.state() != HubState::Shutdown {
            self.shared.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
        }
    }

    /// Terminal stop.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.shared.state.store(STATE_SHUTDOWN, Ordering::SeqCst);
    }

    /// Consumer task: connect, register, dispatch, reconnect.
    async fn run(
        shared: Arc<HubShared>,
        identity: Arc<SigningIdentity>,
        registration_wait: Duration,
        retry_wait: Duration,
        warning_rate: u64,
    ) {
        let mut consecutive_failures: u64 = 0;

        while shared.running.load(Ordering::SeqCst) {
            shared.state.store(STATE_CONNECTING, Ordering::SeqCst);

            let start = if shared.seen_any.load(Ordering::SeqCst) {
                ReplayPosition::From(shared.last_block.load(Ordering::SeqCst) + 1)
            } else {
                ReplayPosition::Newest
            };

            let registration = match build_registration(&identity, start) {
                Ok(signed) => signed,
                Err(e) => {
                    // Signing failure is not transient; alarm and stop.
                    Self::fatal(&shared, &format!("registration signing failed: {e}"));
                    shared.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                    return;
                }
            };

            let connected = tokio::select! {
                _ = shared.shutdown.notified() => break,
                result = shared.source.connect(registration, start) => result,
            };

            match connected {
                Ok(mut stream) => {
                    match Self::await_registration_ack(&shared, &mut stream, registration_wait)
                        .await
                    {
                        AckOutcome::Acked => {
                            info!(hub = %shared.name, ?start, "event hub connected");
                            shared.state.store(STATE_CONNECTED, Ordering::SeqCst);
                            consecutive_failures = 0;

                            match Self::dispatch_loop(&shared, &mut stream).await {
                                LoopExit::Fatal => {
                                    shared.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                                    return;
                                }
                                LoopExit::Shutdown => break,
                                LoopExit::Drop => {}
                            }
                        }
                        AckOutcome::Shutdown => break,
                        AckOutcome::Failed(reason) => {
                            warn!(hub = %shared.name, reason = %reason, "registration not acknowledged");
                        }
                    }
                }
                Err(e) => {
                    debug!(hub = %shared.name, error = %e, "event stream connect failed");
                }
            }

            if !shared.running.load(Ordering::SeqCst) {
                break;
            }

            shared.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
            consecutive_failures += 1;
            shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            if consecutive_failures % warning_rate == 0 {
                warn!(
                    hub = %shared.name,
                    endpoint = %shared.url,
                    failures = consecutive_failures,
                    "event hub still reconnecting"
                );
            }

            tokio::select! {
                _ = shared.shutdown.notified() => break,
                _ = tokio::time::sleep(retry_wait) => {}
            }
        }

        if state_from(shared.state.load(Ordering::SeqCst)) != HubState::Shutdown {
            shared.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
        }
        debug!(hub = %shared.name, "event hub task stopped");
    }

    async fn await_registration_ack(
        shared: &Arc<HubShared>,
        stream: &mut BlockStream,
        registration_wait: Duration,
    ) -> AckOutcome {
        let first = tokio::select! {
            _ = shared.shutdown.notified() => return AckOutcome::Shutdown,
            item = tokio::time::timeout(registration_wait, stream.next()) => item,
        };

        match first {
            Err(_) => AckOutcome::Failed(format!(
                "no acknowledgement within {registration_wait:?}"
            )),
            Ok(None) => AckOutcome::Failed("stream closed before acknowledgement".to_string()),
            Ok(Some(Err(e))) => AckOutcome::Failed(e.to_string()),
            Ok(Some(Ok(event))) => match event.event {
                Some(event::Event::Register(_)) => AckOutcome::Acked,
                _ => AckOutcome::Failed(
                    "first stream event was not a registration acknowledgement".to_string(),
                ),
            },
        }
    }

    /// Dispatches blocks until the stream drops, a fatal block
    /// arrives, or shutdown is requested.
    async fn dispatch_loop(shared: &Arc<HubShared>, stream: &mut BlockStream) -> LoopExit {
        loop {
            let item = tokio::select! {
                _ = shared.shutdown.notified() => return LoopExit::Shutdown,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => match event.event {
                    Some(event::Event::Block(block)) => {
                        if let Some(exit) = Self::dispatch_block(shared, block) {
                            return exit;
                        }
                    }
                    Some(event::Event::Register(_)) => {
                        debug!(hub = %shared.name, "spurious registration echo ignored");
                    }
                    None => debug!(hub = %shared.name, "empty event ignored"),
                },
                Some(Err(e)) => {
                    warn!(hub = %shared.name, error = %e, "event stream dropped");
                    return LoopExit::Drop;
                }
                None => {
                    debug!(hub = %shared.name, "event stream ended");
                    return LoopExit::Drop;
                }
            }
        }
    }

    fn dispatch_block(shared: &Arc<HubShared>, block: Block) -> Option<LoopExit> {
        let number = match block::block_number(&block) {
            Ok(n) => n,
            Err(e) => {
                Self::fatal(shared, &format!("malformed block: {e}"));
                return Some(LoopExit::Fatal);
            }
        };
        // Commit matching needs the transaction walk; a block that does
        // not decode can hide commits, which is worse than stopping.
        if let Err(e) = block::block_transactions(&block) {
            Self::fatal(shared, &format!("malformed block {number}: {e}"));
            return Some(LoopExit::Fatal);
        }

        if shared.seen_any.load(Ordering::SeqCst) {
            let last = shared.last_block.load(Ordering::SeqCst);
            if number <= last {
                debug!(hub = %shared.name, number, last, "duplicate block dropped");
                return None;
            }
            if number > last + 1 {
                warn!(hub = %shared.name, expected = last + 1, received = number, "block replay gap");
                let listeners = shared.listeners.read().clone();
                for listener in listeners {
                    listener.on_gap(last + 1, number);
                }
            }
        }

        let listeners = shared.listeners.read().clone();
        for listener in listeners {
            listener.on_block(&block);
        }
        shared.last_block.store(number, Ordering::SeqCst);
        shared.seen_any.store(true, Ordering::SeqCst);
        shared.blocks_delivered.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn fatal(shared: &Arc<HubShared>, reason: &str) {
        error!(hub = %shared.name, endpoint = %shared.url, reason, "event hub fatal failure");
        shared.running.store(false, Ordering::SeqCst);
        let listeners = shared.listeners.read().clone();
        for listener in listeners {
            listener.on_fatal(reason);
        }
    }
}

enum AckOutcome {
    Acked,
    Failed(String),
    Shutdown,
}

enum LoopExit {
    Drop,
    Fatal,
    Shutdown,
}

/// Signed Block-interest registration carrying the replay cursor.
fn build_registration(
    identity: &SigningIdentity,
    start: ReplayPosition,
) -> Result<SignedEvent, Error> {
    let register = Register {
        events: vec![Interest { event_type: EventType::Block as i32 }],
        start_position: Some(match start {
            ReplayPosition::Newest => SeekPosition::newest(),
            ReplayPosition::From(number) => SeekPosition::specified(number),
        }),
    };
    let event = Event {
        event: Some(event::Event::Register(register)),
        creator: identity.creator().to_vec(),
        timestamp: Some(now_timestamp()),
        tls_cert_hash: Vec::new(),
    };
    let event_bytes = event.encode_to_vec();
    let signature = identity.sign(&event_bytes)?;
    Ok(SignedEvent { signature, event_bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        assert_eq!(state_from(STATE_DISCONNECTED), HubState::Disconnected);
        assert_eq!(state_from(STATE_CONNECTING), HubState::Connecting);
        assert_eq!(state_from(STATE_CONNECTED), HubState::Connected);
        assert_eq!(state_from(STATE_SHUTDOWN), HubState::Shutdown);
    }

    #[test]
    fn fresh_hub_reports_nothing_seen() {
        struct NullSource;
        #[async_trait]
        impl BlockSource for NullSource {
            async fn connect(
                &self,
                _registration: SignedEvent,
                _start: ReplayPosition,
            ) -> Result<BlockStream, Error> {
                Err(Error::EventHub { endpoint: "null".to_string(), message: "down".to_string() })
            }
        }

        let hub = EventHub::with_source("hub0", "grpc://mock:7053", Arc::new(NullSource));
        assert_eq!(hub.state(), HubState::Disconnected);
        assert_eq!(hub.last_block(), None);
        assert_eq!(hub.blocks_delivered(), 0);
    }
}
