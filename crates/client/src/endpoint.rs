//! Remote endpoints: URL parsing, TLS material, and transport
//! construction.
//!
//! An [`Endpoint`] is created once per remote and reused across
//! channels. Construction does all the validation up front:
//!
//! - the URL must match `^(grpc|grpcs)://host:port$` (case-insensitive
//!   scheme), anything else is an argument error
//! - `grpcs` requires root certificates; a client pair must be supplied
//!   whole (both key and certificate) or not at all
//! - the TLS client-certificate digest (SHA-256 over DER) is computed
//!   here, immutably, for the channel-header tls binding
//!
//! The CN fallback for server-name verification is extracted from the
//! first certificate in the root PEM and cached process-wide, keyed by
//! the PEM text. The cache is read-mostly and never invalidated; root
//! bundles do not change identity under one key.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, warn};

use crate::error::Error;

// ════════════════════════════════════════════════════════════════════════════
// URL PARSING
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Grpc,
    Grpcs,
}

impl Protocol {
    /// Scheme tonic's HTTP/2 transport understands.
    fn transport_scheme(&self) -> &'static str {
        match self {
            Protocol::Grpc => "http",
            Protocol::Grpcs => "https",
        }
    }
}

fn url_pattern() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| {
        Regex::new(r"^(?i)(grpc|grpcs)://([^:]+):(\d+)$").expect("static url pattern")
    })
}

/// Parses a `grpc(s)://host:port` URL into its parts.
pub fn parse_url(url: &str) -> Result<(Protocol, String, u16), Error> {
    let captures = url_pattern()
        .captures(url.trim())
        .ok_or_else(|| Error::argument(format!("invalid endpoint URL {url:?}")))?;

    let protocol = match captures[1].to_ascii_lowercase().as_str() {
        "grpc" => Protocol::Grpc,
        _ => Protocol::Grpcs,
    };
    let host = captures[2].to_string();
    let port: u16 = captures[3]
        .parse()
        .map_err(|_| Error::argument(format!("port out of range in {url:?}")))?;

    Ok((protocol, host, port))
}

// ════════════════════════════════════════════════════════════════════════════
// ENDPOINT CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Caller-supplied endpoint properties.
///
/// `grpc_options` keys are the `grpc.*` channel options; values that
/// parse as integers are applied numerically. Unknown keys are kept
/// and logged, not rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// PEM bundle of trust roots for the server certificate.
    pub tls_ca_pem: Option<Vec<u8>>,
    /// PEM client certificate for mutual TLS.
    pub client_cert_pem: Option<Vec<u8>>,
    /// PEM client key for mutual TLS. Must accompany the certificate.
    pub client_key_pem: Option<Vec<u8>>,
    /// Verify the server against the CN of the first trust-root cert
    /// when no explicit override is given.
    pub trust_server_certificate: bool,
    /// Explicit expected server name.
    pub hostname_override: Option<String>,
    pub grpc_options: BTreeMap<String, String>,
}

// ════════════════════════════════════════════════════════════════════════════
// ENDPOINT
// ════════════════════════════════════════════════════════════════════════════

/// A parsed, validated remote address plus its transport material.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: String,
    protocol: Protocol,
    host: String,
    port: u16,
    config: EndpointConfig,
    /// SHA-256 over the DER client certificate, fixed at construction.
    client_cert_hash: Option<Vec<u8>>,
    /// Server name used for TLS verification, resolved at construction.
    domain_name: Option<String>,
}

impl Endpoint {
    pub fn new(url: &str, config: EndpointConfig) -> Result<Self, Error> {
        let (protocol, host, port) = parse_url(url)?;

        match (&config.client_cert_pem, &config.client_key_pem) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::argument(
                    "mutual TLS requires both client key and certificate from the same source",
                ));
            }
            _ => {}
        }

        if protocol == Protocol::Grpcs && config.tls_ca_pem.is_none() {
            return Err(Error::argument("grpcs endpoints require trust-root certificates"));
        }
        if protocol == Protocol::Grpc
            && (config.tls_ca_pem.is_some() || config.client_cert_pem.is_some())
        {
            return Err(Error::argument("TLS material supplied for a plaintext grpc endpoint"));
        }

        let client_cert_hash = match &config.client_cert_pem {
            Some(pem) => Some(client_cert_digest(pem)?),
            None => None,
        };

        let domain_name = match (&config.hostname_override, &config.tls_ca_pem) {
            (Some(explicit), _) => Some(explicit.clone()),
            (None, Some(roots)) if config.trust_server_certificate => {
                first_certificate_cn(roots)?
            }
            _ => None,
        };

        Ok(Self {
            url: url.trim().to_string(),
            protocol,
            host,
            port,
            config,
            client_cert_hash,
            domain_name,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Digest for the channel-header tls binding; present iff mutual
    /// TLS is configured.
    pub fn client_cert_hash(&self) -> Option<&[u8]> {
        self.client_cert_hash.as_deref()
    }

    /// Dials the remote and returns a multiplexed HTTP/2 channel.
    pub async fn connect(&self) -> Result<Channel, Error> {
        let uri = format!("{}://{}:{}", self.protocol.transport_scheme(), self.host, self.port);
        let mut endpoint = tonic::transport::Endpoint::from_shared(uri)
            .map_err(|e| Error::argument(format!("endpoint URI rejected: {e}")))?;

        if self.protocol == Protocol::Grpcs {
            let mut tls = ClientTlsConfig::new();
            if let Some(roots) = &self.config.tls_ca_pem {
                tls = tls.ca_certificate(Certificate::from_pem(roots));
            }
            if let (Some(cert), Some(key)) =
                (&self.config.client_cert_pem, &self.config.client_key_pem)
            {
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            if let Some(domain) = &self.domain_name {
                tls = tls.domain_name(domain);
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::argument(format!("TLS configuration rejected: {e}")))?;
        }

        endpoint = self.apply_grpc_options(endpoint);

        endpoint.connect().await.map_err(|e| Error::Proposal {
            endpoint: self.url.clone(),
            message: format!("connect failed: {e}"),
        })
    }

    /// Applies the `grpc.*` properties that have a tonic counterpart;
    /// the rest are logged and carried along.
    fn apply_grpc_options(&self, mut endpoint: tonic::transport::Endpoint) -> tonic::transport::Endpoint {
        for (key, value) in &self.config.grpc_options {
            let as_int: Option<u64> = value.parse().ok();
            match (key.as_str(), as_int) {
                ("grpc.keepalive_time_ms", Some(ms)) => {
                    endpoint = endpoint.http2_keep_alive_interval(Duration::from_millis(ms));
                }
                ("grpc.keepalive_timeout_ms", Some(ms)) => {
                    endpoint = endpoint.keep_alive_timeout(Duration::from_millis(ms));
                }
                ("grpc.connect_timeout_ms", Some(ms)) => {
                    endpoint = endpoint.connect_timeout(Duration::from_millis(ms));
                }
                ("grpc.concurrency_limit", Some(n)) => {
                    endpoint = endpoint.concurrency_limit(n as usize);
                }
                _ => {
                    debug!(key = %key, value = %value, "unmapped grpc option retained");
                }
            }
        }
        endpoint
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn client_cert_digest(pem: &[u8]) -> Result<Vec<u8>, Error> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| Error::argument(format!("client certificate PEM rejected: {e}")))?;
    Ok(Sha256::digest(&parsed.contents).to_vec())
}

/// CN of the first certificate in a PEM bundle, memoized by PEM text.
fn first_certificate_cn(roots_pem: &[u8]) -> Result<Option<String>, Error> {
    static CN_CACHE: OnceLock<RwLock<std::collections::HashMap<String, String>>> = OnceLock::new();
    let cache = CN_CACHE.get_or_init(|| RwLock::new(std::collections::HashMap::new()));

    let key = String::from_utf8_lossy(roots_pem).to_string();
    if let Some(cn) = cache.read().get(&key) {
        return Ok(Some(cn.clone()));
    }

    use x509_parser::prelude::*;
    let (_, pem) = x509_parser::pem::parse_x509_pem(roots_pem)
        .map_err(|e| Error::argument(format!("trust-root PEM rejected: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| Error::argument(format!("trust-root certificate rejected: {e}")))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);

    match cn {
        Some(cn) => {
            cache.write().insert(key, cn.clone());
            Ok(Some(cn))
        }
        None => {
            warn!("trust-root certificate has no CN; server name left unset");
            Ok(None)
        }
    }
}
