//! Peer event-stream messages (`peer/events.proto`).
//!
//! The event service is a bidirectional stream: the client opens `Chat`,
//! sends a signed [`Register`] naming the event types it wants, and the
//! peer acknowledges by echoing the registration before any event flows.
//!
//! The canonical 1.x `Register` carries no replay position; the optional
//! `start_position` here occupies an unused field number, so peers that
//! predate it skip the field and deliver from the newest block.

use crate::common::Block;
use crate::orderer::SeekPosition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Register = 0,
    Block = 1,
    Chaincode = 2,
    Rejection = 3,
}

/// One event category the client wants delivered.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Interest {
    #[prost(enumeration = "EventType", tag = "1")]
    pub event_type: i32,
}

/// Registration request listing the interests of the client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<Interest>,
    /// Replay cursor; absent means deliver from the newest block.
    #[prost(message, optional, tag = "2")]
    pub start_position: Option<SeekPosition>,
}

/// An event envelope signed by the registering client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedEvent {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    /// Marshaled [`Event`].
    #[prost(bytes = "vec", tag = "2")]
    pub event_bytes: Vec<u8>,
}

/// A message of the event stream, in either direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(oneof = "event::Event", tags = "1, 2")]
    pub event: Option<event::Event>,
    /// Marshaled `SerializedIdentity` of the sender (client direction).
    #[prost(bytes = "vec", tag = "6")]
    pub creator: Vec<u8>,
    #[prost(message, optional, tag = "7")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(bytes = "vec", tag = "8")]
    pub tls_cert_hash: Vec<u8>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        /// Registration request (client → peer) or acknowledgement
        /// (peer → client).
        #[prost(message, tag = "1")]
        Register(super::Register),
        #[prost(message, tag = "2")]
        Block(super::Block),
    }
}
