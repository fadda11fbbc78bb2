//! X.509 trust store: a set of anchor certificates plus a boolean
//! chain-validation procedure.
//!
//! Anchors are keyed by (subject DN, serial), so re-adding a
//! certificate overwrites its previous entry and `validate` is
//! unaffected. Validation never panics and never throws for a merely
//! untrusted certificate — only unparseable *input to `add_*`* is an
//! error.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use super::suite::verify_prehash_any_curve;
use super::CryptoError;

/// OIDs of the ECDSA signature algorithms this store can check.
const OID_ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_SHA384: &str = "1.2.840.10045.4.3.3";

/// Thread-safe set of trusted certificates.
#[derive(Debug, Default)]
pub struct TrustStore {
    /// (subject DN, serial) → DER bytes.
    anchors: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every certificate found in a PEM string.
    pub fn add_pem(&self, pem: &str) -> Result<(), CryptoError> {
        if pem.trim().is_empty() {
            return Err(CryptoError::EmptyArgument("certificate PEM"));
        }
        let mut added = 0usize;
        for entry in Pem::iter_from_buffer(pem.as_bytes()) {
            let entry = entry.map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
            self.add_der(&entry.contents)?;
            added += 1;
        }
        if added == 0 {
            return Err(CryptoError::MalformedCertificate(
                "no certificate found in PEM input".to_string(),
            ));
        }
        Ok(())
    }

    /// Adds one DER certificate. Duplicates overwrite.
    pub fn add_der(&self, der: &[u8]) -> Result<(), CryptoError> {
        if der.is_empty() {
            return Err(CryptoError::EmptyArgument("certificate DER"));
        }
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CryptoError::MalformedCertificate(e.to_string()))?;
        let key = (cert.subject().to_string(), cert.raw_serial_as_string());
        debug!(subject = %key.0, "trust anchor added");
        self.anchors.write().insert(key, der.to_vec());
        Ok(())
    }

    /// Reads a PEM certificate file and adds its contents.
    pub fn add_file(&self, path: &Path) -> Result<(), CryptoError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CryptoError::MalformedCertificate(format!("{}: {e}", path.display())))?;
        self.add_pem(&raw)
    }

    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }

    /// True when `cert` (PEM or DER) chains to an anchor of this store
    /// and is inside its validity window. Unparseable, expired, or
    /// untrusted input all return false.
    pub fn validate(&self, cert: &[u8]) -> bool {
        let der;
        let der_bytes: &[u8] = if cert.starts_with(b"-----BEGIN") {
            match x509_parser::pem::parse_x509_pem(cert) {
                Ok((_, pem)) => {
                    der = pem.contents;
                    &der
                }
                Err(_) => return false,
            }
        } else {
            cert
        };

        let Ok((_, leaf)) = X509Certificate::from_der(der_bytes) else {
            return false;
        };

        if !time_valid(&leaf) {
            return false;
        }

        let anchors = self.anchors.read();

        // Directly trusted certificate.
        let leaf_key = (leaf.subject().to_string(), leaf.raw_serial_as_string());
        if anchors.get(&leaf_key).map(Vec::as_slice) == Some(der_bytes) {
            return true;
        }

        // One verified hop into the store: any anchor whose subject is
        // the leaf's issuer and whose key signed the leaf.
        let issuer_dn = leaf.issuer().to_string();
        for ((subject, _), anchor_der) in anchors.iter() {
            if *subject != issuer_dn {
                continue;
            }
            let Ok((_, anchor)) = X509Certificate::from_der(anchor_der) else {
                continue;
            };
            if !time_valid(&anchor) {
                continue;
            }
            if verify_issued_by(&leaf, &anchor) {
                return true;
            }
        }

        false
    }
}

fn time_valid(cert: &X509Certificate<'_>) -> bool {
    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => return false,
    };
    let nb = cert.validity().not_before.timestamp();
    let na = cert.validity().not_after.timestamp();
    nb <= now && now <= na
}

/// Checks the child's signature with the issuer's public key. Only the
/// ECDSA algorithms the MSP model produces are recognized.
fn verify_issued_by(child: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    use sha2::{Digest, Sha256, Sha384};

    let oid = child.signature_algorithm.algorithm.to_id_string();
    let tbs = child.tbs_certificate.as_ref();
    let prehash: Vec<u8> = match oid.as_str() {
        OID_ECDSA_SHA256 => Sha256::digest(tbs).to_vec(),
        OID_ECDSA_SHA384 => Sha384::digest(tbs).to_vec(),
        other => {
            warn!(algorithm = other, "unsupported certificate signature algorithm");
            return false;
        }
    };

    let issuer_point = &issuer.public_key().subject_public_key.data;
    verify_prehash_any_curve(issuer_point, &prehash, child.signature_value.data.as_ref())
}
