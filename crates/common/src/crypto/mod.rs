//! Cryptographic primitives for the Fabric client.
//!
//! The suite binds four concerns behind one handle:
//!
//! - EC key generation ([`keys::EcKeyPair`], P-256 / P-384)
//! - ECDSA signing with low-S normalization and DER encoding
//! - SHA-2 / SHA-3 hashing sized by the security level
//! - X.509 trust anchors and chain validation ([`trust::TrustStore`])
//!
//! Key material never appears in error values or log output.

mod keys;
mod suite;
mod trust;

pub use keys::{EcCurve, EcKeyPair};
pub use suite::{certificate_public_point, CryptoConfig, CryptoSuite, CryptoSuiteFactory, HashFamily};
pub use trust::TrustStore;

use thiserror::Error;

/// Failures from key handling, certificate parsing, or signing
/// infrastructure. Signature *mismatch* is not an error — verification
/// returns `Ok(false)` for that.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("unsupported security level {0} (supported: 256, 384)")]
    UnsupportedSecurityLevel(u32),

    #[error("unsupported hash algorithm {0:?} (supported: SHA2, SHA3)")]
    UnsupportedHashAlgorithm(String),

    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedSignatureAlgorithm(String),

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("malformed key material: {0}")]
    MalformedKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("CSR generation failed: {0}")]
    CsrFailed(String),

    #[error("private key does not match the certificate public key")]
    KeyCertMismatch,

    #[error("{0} must not be null or blank")]
    EmptyArgument(&'static str),
}
