//! # Fabric Common Crate
//!
//! Shared building blocks for the Fabric client SDK:
//!
//! - [`config`]: typed SDK settings with environment / file / default
//!   resolution
//! - [`crypto`]: the crypto suite — EC key pairs, ECDSA signing with
//!   low-S normalization, SHA-2/SHA-3 hashing, X.509 trust store, and
//!   CSR generation
//!
//! Nothing in this crate talks to the network. Components in
//! `fabric_client` carry a reference to one [`crypto::CryptoSuite`] and
//! one [`config::SdkConfig`]; there is no process-global state.

pub mod config;
pub mod crypto;

pub use config::SdkConfig;
pub use crypto::{CryptoError, CryptoSuite};
