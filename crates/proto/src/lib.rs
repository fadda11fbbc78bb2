//! # Fabric Proto Crate
//!
//! Wire contract between this SDK and a Hyperledger Fabric 1.x network.
//!
//! The message structs in this crate are hand-maintained prost mirrors of
//! the canonical Fabric `.proto` definitions. Field numbers and enum
//! values follow the upstream schemas exactly, so the encoded bytes are
//! interchangeable with messages produced by a reference network.
//!
//! ## Modules
//!
//! - [`common`]: envelopes, headers, blocks, shared status codes
//! - [`chaincode`]: chaincode specs, deployment and invocation payloads
//! - [`proposal`]: endorsement proposals and proposal responses
//! - [`transaction`]: endorsed transactions and validation codes
//! - [`orderer`]: atomic broadcast and seek/deliver messages
//! - [`events`]: peer event-stream registration and delivery
//! - [`identities`]: MSP serialized identities
//! - [`discovery`]: service-discovery request/response shapes
//! - [`block`]: decode helpers over committed blocks
//! - [`service`]: tonic client stubs for the four remote services
//!
//! ## Data Flow
//!
//! ```text
//! SignedProposal ──▶ Endorser.ProcessProposal ──▶ ProposalResponse
//! Envelope       ──▶ AtomicBroadcast.Broadcast ──▶ BroadcastResponse
//! SeekInfo env.  ──▶ AtomicBroadcast.Deliver   ──▶ stream<Block>
//! SignedEvent    ──▶ Events.Chat               ──▶ stream<Event>
//! ```

pub mod block;
pub mod chaincode;
pub mod common;
pub mod discovery;
pub mod events;
pub mod identities;
pub mod orderer;
pub mod proposal;
pub mod service;
pub mod transaction;

pub use prost::Message;
