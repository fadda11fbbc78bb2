//! User identities and the signing context.
//!
//! A [`User`] is plain enrollment data. Binding it to a crypto suite
//! produces a [`SigningIdentity`], which is what every component that
//! signs bytes actually holds. The bind step enforces two invariants:
//!
//! - the private key's public point matches the enrollment
//!   certificate's subject public key
//! - the certificate chains to an anchor in the suite's trust store
//!
//! The chain check is unconditional. A suite whose trust store holds
//! no anchors refuses to bind any identity, so callers load the
//! organization's CA certificates before binding a user context.
//!
//! A `SigningIdentity` is immutable after binding; replacing the user
//! context means binding a new one.

use std::sync::Arc;

use prost::Message;
use tracing::debug;

use fabric_common::crypto::{certificate_public_point, CryptoSuite, EcKeyPair};
use fabric_common::CryptoError;
use fabric_proto::identities::SerializedIdentity;

use crate::error::Error;

/// Enrollment material issued by the organization's CA.
#[derive(Debug, Clone)]
pub struct Enrollment {
    /// PEM X.509 certificate.
    pub cert_pem: String,
    /// EC private key whose public half the certificate carries.
    pub key: EcKeyPair,
}

/// A member of an organization, as the application describes it.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub msp_id: String,
    pub enrollment: Enrollment,
    pub roles: Vec<String>,
    pub affiliation: String,
    pub account: String,
}

impl User {
    pub fn new(name: impl Into<String>, msp_id: impl Into<String>, enrollment: Enrollment) -> Self {
        Self {
            name: name.into(),
            msp_id: msp_id.into(),
            enrollment,
            roles: Vec::new(),
            affiliation: String::new(),
            account: String::new(),
        }
    }
}

/// A user bound to a crypto suite: produces serialized identities and
/// signatures for transaction headers.
pub struct SigningIdentity {
    user: User,
    suite: Arc<CryptoSuite>,
    /// Marshaled `SerializedIdentity`, fixed at bind time so the same
    /// creator bytes feed every header and TxID derived from it.
    creator: Vec<u8>,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("name", &self.user.name)
            .field("msp_id", &self.user.msp_id)
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    /// Binds `user` to `suite`, checking the key/cert pairing and the
    /// certificate chain. The suite's trust store must already hold
    /// the issuing anchors; an empty store binds nothing.
    pub fn bind(user: User, suite: Arc<CryptoSuite>) -> Result<Self, Error> {
        if user.name.trim().is_empty() {
            return Err(Error::argument("user name must not be blank"));
        }
        if user.msp_id.trim().is_empty() {
            return Err(Error::argument("MSP id must not be blank"));
        }

        let cert_point = certificate_public_point(user.enrollment.cert_pem.as_bytes())?;
        if !user.enrollment.key.matches_public_point(&cert_point) {
            return Err(Error::Crypto(CryptoError::KeyCertMismatch));
        }

        if !suite.trust_store().validate(user.enrollment.cert_pem.as_bytes()) {
            return Err(Error::argument(
                "enrollment certificate does not chain to a trusted root in the suite's trust store",
            ));
        }

        let creator = SerializedIdentity {
            mspid: user.msp_id.clone(),
            id_bytes: user.enrollment.cert_pem.clone().into_bytes(),
        }
        .encode_to_vec();

        debug!(user = %user.name, msp = %user.msp_id, "signing identity bound");
        Ok(Self { user, suite, creator })
    }

    pub fn name(&self) -> &str {
        &self.user.name
    }

    pub fn msp_id(&self) -> &str {
        &self.user.msp_id
    }

    pub fn cert_pem(&self) -> &str {
        &self.user.enrollment.cert_pem
    }

    /// Marshaled `SerializedIdentity` bytes naming this user as a
    /// transaction creator.
    pub fn creator(&self) -> &[u8] {
        &self.creator
    }

    /// Signs `data` with the user's private key (DER ECDSA, low-S).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.suite.sign(&self.user.enrollment.key, data)?)
    }

    pub fn suite(&self) -> &Arc<CryptoSuite> {
        &self.suite
    }
}
