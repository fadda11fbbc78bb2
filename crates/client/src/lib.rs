//! # Fabric Client Crate
//!
//! Transaction orchestration for a Hyperledger Fabric 1.x network:
//! the client drives the *endorse → order → commit* protocol across
//! endorsing peers, the ordering service, and peer event streams over
//! mutual-TLS gRPC. It hosts no ledger state of its own.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            HfClient                              │
//! │   config ── crypto suite ── user context ── channel registry     │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Channel                               │
//! │  CREATED → INITIALIZED → SHUTDOWN                                │
//! │                                                                  │
//! │  ProposalBuilder ──▶ Peer (×N) ──▶ consistency validation        │
//! │        │                                   │                     │
//! │        │              register commit listener (before!)         │
//! │        │                                   │                     │
//! │        └──▶ Envelope ──▶ Orderer ──▶ broadcast (retry budget)    │
//! │                                            │                     │
//! │  EventHub ──▶ block dispatch ──▶ CommitTracker ──▶ result        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`]: the facade and its explicit context (no globals)
//! - [`channel`]: lifecycle, fan-out, submission, commit tracking
//! - [`proposal`]: the five proposal kinds over one shared builder
//! - [`peer`], [`orderer`]: trait-abstracted remote services
//! - [`event_hub`]: block-stream consumer with reconnect and replay
//! - [`endpoint`]: URL parsing, TLS material, transport construction
//! - [`identity`]: users bound into signing contexts
//! - [`packager`]: deterministic chaincode archives
//! - [`error`]: the typed failure taxonomy
//!
//! All remote failures surface as [`error::Error`] kinds; raw
//! transport errors never cross the facade.

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod event_hub;
pub mod identity;
pub mod orderer;
pub mod packager;
pub mod peer;
pub mod proposal;

pub use channel::{
    sign_channel_configuration, Channel, ChannelConfiguration, ChannelState, CommitNotice,
    EndorsedProposal, PeerResponse, SubmitOptions, TransactionProposalRequest, TransactionResult,
};
pub use client::HfClient;
pub use endpoint::{parse_url, Endpoint, EndpointConfig, Protocol};
pub use error::{EndorserDetail, Error};
pub use event_hub::{BlockListener, BlockSource, EventHub, HubState, ReplayPosition};
pub use identity::{Enrollment, SigningIdentity, User};
pub use orderer::{BroadcastService, Orderer};
pub use packager::package_chaincode;
pub use peer::{EndorserService, Peer, PeerRole};
pub use proposal::{
    ChaincodeDescriptor, ChaincodeLanguage, LifecycleArgs, ProposalBuilder, ProposalKind,
    TransactionContext,
};
