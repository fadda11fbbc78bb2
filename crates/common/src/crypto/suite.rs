//! The crypto suite: an immutable, thread-safe bundle of the signing,
//! hashing, and certificate-validation behavior selected by the SDK
//! configuration.
//!
//! Two suites constructed from equal option sets are interchangeable;
//! [`CryptoSuiteFactory`] caches by option set so equal requests share
//! one instance.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256, Sha384};
use sha3::{Sha3_256, Sha3_384};
use tracing::debug;

use crate::config::SdkConfig;

use super::keys::{EcCurve, EcKeyPair};
use super::trust::TrustStore;
use super::CryptoError;

// ════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ════════════════════════════════════════════════════════════════════════════

/// Hash family. Only SHA-2 and SHA-3 are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFamily {
    Sha2,
    Sha3,
}

impl FromStr for HashFamily {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA2" => Ok(HashFamily::Sha2),
            "SHA3" => Ok(HashFamily::Sha3),
            other => Err(CryptoError::UnsupportedHashAlgorithm(other.to_string())),
        }
    }
}

/// The enumerated option set of a suite. Equality over this struct is
/// the interchangeability criterion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CryptoConfig {
    pub security_level: u32,
    pub hash_family: HashFamily,
    pub signature_algorithm: String,
    /// Only `EC` keys are produced.
    pub asymmetric_key_type: String,
    /// Only `X.509` certificates are understood.
    pub certificate_format: String,
    curve_mapping: BTreeMap<u32, EcCurve>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let mut curve_mapping = BTreeMap::new();
        curve_mapping.insert(256, EcCurve::P256);
        curve_mapping.insert(384, EcCurve::P384);
        Self {
            security_level: 256,
            hash_family: HashFamily::Sha2,
            signature_algorithm: "SHA256withECDSA".to_string(),
            asymmetric_key_type: "EC".to_string(),
            certificate_format: "X.509".to_string(),
            curve_mapping,
        }
    }
}

impl CryptoConfig {
    /// Builds an option set from the SDK settings, validating each
    /// enumerated value.
    pub fn from_sdk(cfg: &SdkConfig) -> Result<Self, CryptoError> {
        let hash_family = cfg.hash_algorithm.parse()?;
        validate_signature_algorithm(&cfg.signature_algorithm)?;

        let mut curve_mapping = BTreeMap::new();
        for (level, name) in cfg.curve_mapping() {
            if let Some(curve) = EcCurve::from_name(&name) {
                curve_mapping.insert(level, curve);
            }
        }
        if !curve_mapping.contains_key(&cfg.security_level) {
            return Err(CryptoError::UnsupportedSecurityLevel(cfg.security_level));
        }

        Ok(Self {
            security_level: cfg.security_level,
            hash_family,
            signature_algorithm: cfg.signature_algorithm.clone(),
            asymmetric_key_type: "EC".to_string(),
            certificate_format: "X.509".to_string(),
            curve_mapping,
        })
    }

    fn curve(&self) -> Result<EcCurve, CryptoError> {
        self.curve_mapping
            .get(&self.security_level)
            .copied()
            .ok_or(CryptoError::UnsupportedSecurityLevel(self.security_level))
    }
}

fn validate_signature_algorithm(name: &str) -> Result<(), CryptoError> {
    match name {
        "SHA256withECDSA" | "SHA384withECDSA" => Ok(()),
        other => Err(CryptoError::UnsupportedSignatureAlgorithm(other.to_string())),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SUITE
// ════════════════════════════════════════════════════════════════════════════

/// Immutable after construction; safe to share by reference across
/// tasks. Key material handed to [`CryptoSuite::sign`] is never stored.
#[derive(Debug)]
pub struct CryptoSuite {
    config: CryptoConfig,
    trust_store: TrustStore,
}

impl CryptoSuite {
    pub fn new(config: CryptoConfig) -> Result<Self, CryptoError> {
        // Surface an unusable level at construction, not first key-gen.
        config.curve()?;
        validate_signature_algorithm(&config.signature_algorithm)?;
        Ok(Self { config, trust_store: TrustStore::new() })
    }

    /// Suite with the built-in defaults (P-256, SHA-2).
    pub fn default_suite() -> Self {
        Self {
            config: CryptoConfig::default(),
            trust_store: TrustStore::new(),
        }
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    /// Generates a key on the curve mapped from the security level.
    pub fn key_gen(&self) -> Result<EcKeyPair, CryptoError> {
        Ok(EcKeyPair::generate(self.config.curve()?))
    }

    /// ECDSA-signs `data`, DER-encoded and low-S normalized.
    pub fn sign(&self, key: &EcKeyPair, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        key.sign(data)
    }

    /// Verifies `signature` over `data` against the public key of
    /// `cert`, a PEM or DER X.509 certificate.
    ///
    /// An unparseable certificate or unknown algorithm is an error; a
    /// signature that merely does not match returns `Ok(false)`.
    pub fn verify(
        &self,
        cert: &[u8],
        algorithm: &str,
        signature: &[u8],
        data: &[u8],
    ) -> Result<bool, CryptoError> {
        let spki = certificate_public_point(cert)?;

        let prehash: Vec<u8> = match algorithm {
            "SHA256withECDSA" => Sha256::digest(data).to_vec(),
            "SHA384withECDSA" => Sha384::digest(data).to_vec(),
            other => {
                return Err(CryptoError::UnsupportedSignatureAlgorithm(other.to_string()))
            }
        };

        Ok(verify_prehash_any_curve(&spki, &prehash, signature))
    }

    /// Hashes with the configured family sized by the security level.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match (self.config.hash_family, self.config.security_level) {
            (HashFamily::Sha2, 384) => Sha384::digest(data).to_vec(),
            (HashFamily::Sha2, _) => Sha256::digest(data).to_vec(),
            (HashFamily::Sha3, 384) => Sha3_384::digest(data).to_vec(),
            (HashFamily::Sha3, _) => Sha3_256::digest(data).to_vec(),
        }
    }

    pub fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }
}

/// Extracts the uncompressed SEC1 public point from a PEM or DER
/// certificate.
pub fn certificate_public_point(cert: &[u8]) -> Result<Vec<u8>, CryptoError> {
    use x509_parser::prelude::*;

    if cert.is_empty() {
        return Err(CryptoError::EmptyArgument("certificate"));
    }

    let der;
    let der_bytes: &[u8] = if cert.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert)
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
        der = pem.contents;
        &der
    } else {
        cert
    };

    let (_, parsed) = X509Certificate::from_der(der_bytes)
        .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
    Ok(parsed.public_key().subject_public_key.data.to_vec())
}

/// Tries the point as P-256 then P-384 and verifies the prehash.
/// Any mismatch, including an undecodable signature, is `false`.
pub(crate) fn verify_prehash_any_curve(point: &[u8], prehash: &[u8], signature: &[u8]) -> bool {
    {
        use p256::ecdsa::signature::hazmat::PrehashVerifier;
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(point) {
            return match p256::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(prehash, &sig).is_ok(),
                Err(_) => false,
            };
        }
    }
    {
        use p384::ecdsa::signature::hazmat::PrehashVerifier;
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_sec1_bytes(point) {
            return match p384::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(prehash, &sig).is_ok(),
                Err(_) => false,
            };
        }
    }
    false
}

// ════════════════════════════════════════════════════════════════════════════
// FACTORY
// ════════════════════════════════════════════════════════════════════════════

/// Hands out suites, one shared instance per distinct option set.
///
/// Owned by the client facade; there is no process-global factory.
#[derive(Debug, Default)]
pub struct CryptoSuiteFactory {
    cache: Mutex<std::collections::HashMap<CryptoConfig, Arc<CryptoSuite>>>,
}

impl CryptoSuiteFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached suite for `config`, constructing it on first
    /// request.
    pub fn suite(&self, config: CryptoConfig) -> Result<Arc<CryptoSuite>, CryptoError> {
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&config) {
            return Ok(Arc::clone(existing));
        }
        debug!(level = config.security_level, "constructing crypto suite");
        let suite = Arc::new(CryptoSuite::new(config.clone())?);
        cache.insert(config, Arc::clone(&suite));
        Ok(suite)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
