//! Proposal construction: one shared builder dispatching on a tagged
//! proposal kind.
//!
//! ```text
//! TransactionContext ──┐
//! ChaincodeDescriptor ─┼─▶ ProposalBuilder::build() ─▶ Proposal
//! ProposalKind ────────┘            │
//!                                   └─ build_signed() ─▶ SignedProposal
//! ```
//!
//! The TxID is `hex(hash(nonce || creator))` under the channel's
//! configured hash, and the same `{nonce, creator}` pair feeds the
//! signature header. Letting those drift apart corrupts commit
//! matching, so both always come from one [`TransactionContext`].

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use rand::RngCore;

use fabric_common::crypto::CryptoSuite;
use fabric_proto::chaincode::{
    chaincode_spec, ChaincodeDeploymentSpec, ChaincodeId, ChaincodeInput,
    ChaincodeInvocationSpec, ChaincodeSpec,
};
use fabric_proto::common::{Header, HeaderType, SignatureHeader};
use fabric_proto::proposal::{
    ChaincodeHeaderExtension, ChaincodeProposalPayload, Proposal, SignedProposal,
};

use crate::error::Error;
use crate::identity::SigningIdentity;

/// Life-cycle system chaincode, target of install/deploy/upgrade.
pub const LSCC: &str = "lscc";
/// Query system chaincode, target of ledger queries.
pub const QSCC: &str = "qscc";

/// Bytes of randomness in a transaction nonce.
const NONCE_LEN: usize = 24;

// ════════════════════════════════════════════════════════════════════════════
// CHAINCODE DESCRIPTION
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaincodeLanguage {
    Golang,
    Java,
    Node,
}

impl ChaincodeLanguage {
    /// Maps a caller-supplied type name; anything unknown is rejected.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name.to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(ChaincodeLanguage::Golang),
            "java" => Ok(ChaincodeLanguage::Java),
            "node" | "javascript" => Ok(ChaincodeLanguage::Node),
            other => Err(Error::argument(format!("unknown chaincode type {other:?}"))),
        }
    }

    fn spec_type(&self) -> chaincode_spec::Type {
        match self {
            ChaincodeLanguage::Golang => chaincode_spec::Type::Golang,
            ChaincodeLanguage::Java => chaincode_spec::Type::Java,
            ChaincodeLanguage::Node => chaincode_spec::Type::Node,
        }
    }
}

/// Names one chaincode: identity on the channel plus source language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeDescriptor {
    pub name: String,
    pub version: String,
    /// Source path, meaningful for install.
    pub path: String,
    pub language: ChaincodeLanguage,
}

impl ChaincodeDescriptor {
    fn chaincode_id(&self) -> ChaincodeId {
        ChaincodeId {
            path: self.path.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSACTION CONTEXT
// ════════════════════════════════════════════════════════════════════════════

/// The `{tx_id, nonce, creator}` triple of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub tx_id: String,
    pub nonce: Vec<u8>,
    pub creator: Vec<u8>,
}

impl TransactionContext {
    /// Fresh context for `identity`: 24 random nonce bytes, the bound
    /// creator identity, and the derived TxID.
    pub fn new(identity: &SigningIdentity) -> Self {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self::from_parts(identity.suite(), nonce, identity.creator().to_vec())
    }

    /// Context over explicit parts; the TxID is always re-derived.
    pub fn from_parts(suite: &CryptoSuite, nonce: Vec<u8>, creator: Vec<u8>) -> Self {
        let mut material = Vec::with_capacity(nonce.len() + creator.len());
        material.extend_from_slice(&nonce);
        material.extend_from_slice(&creator);
        let tx_id = suite.hash_hex(&material);
        Self { tx_id, nonce, creator }
    }

    fn signature_header(&self) -> SignatureHeader {
        SignatureHeader {
            creator: self.creator.clone(),
            nonce: self.nonce.clone(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROPOSAL KINDS
// ════════════════════════════════════════════════════════════════════════════

/// Arguments of an instantiate or upgrade call.
#[derive(Debug, Clone, Default)]
pub struct LifecycleArgs {
    /// Arguments handed to the chaincode's init.
    pub init_args: Vec<Vec<u8>>,
    /// Marshaled endorsement policy, if any.
    pub endorsement_policy: Option<Vec<u8>>,
    pub escc: Option<String>,
    pub vscc: Option<String>,
    /// Marshaled private-collection configuration, if any.
    pub collection_config: Option<Vec<u8>>,
}

/// The five proposal shapes, dispatched by tag.
#[derive(Debug, Clone)]
pub enum ProposalKind {
    /// LSCC `install` with the packaged source archive.
    Install { code_package: Vec<u8> },
    /// LSCC `deploy`.
    Instantiate(LifecycleArgs),
    /// LSCC `upgrade`.
    Upgrade(LifecycleArgs),
    /// Chaincode invocation.
    Invoke {
        fcn: String,
        args: Vec<Vec<u8>>,
        transient: HashMap<String, Vec<u8>>,
    },
    /// Chaincode query; identical on the wire, never submitted for
    /// ordering.
    Query {
        fcn: String,
        args: Vec<Vec<u8>>,
        transient: HashMap<String, Vec<u8>>,
    },
}

// ════════════════════════════════════════════════════════════════════════════
// BUILDER
// ════════════════════════════════════════════════════════════════════════════

pub struct ProposalBuilder<'a> {
    channel_id: String,
    chaincode: &'a ChaincodeDescriptor,
    context: &'a TransactionContext,
    kind: ProposalKind,
    tls_cert_hash: Option<Vec<u8>>,
}

impl<'a> ProposalBuilder<'a> {
    /// `channel_id` is empty for install proposals, which are not
    /// channel-scoped.
    pub fn new(
        channel_id: impl Into<String>,
        chaincode: &'a ChaincodeDescriptor,
        context: &'a TransactionContext,
        kind: ProposalKind,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            chaincode,
            context,
            kind,
            tls_cert_hash: None,
        }
    }

    /// Binds the proposal to a mutual-TLS client certificate digest.
    pub fn tls_cert_hash(mut self, hash: Option<Vec<u8>>) -> Self {
        self.tls_cert_hash = hash;
        self
    }

    pub fn build(&self) -> Result<Proposal, Error> {
        if self.chaincode.name.trim().is_empty() {
            return Err(Error::argument("chaincode name must not be blank"));
        }
        if self.channel_id.is_empty() && !matches!(self.kind, ProposalKind::Install { .. }) {
            return Err(Error::argument("channel id must not be blank"));
        }

        let (header_chaincode, invocation) = self.invocation_spec();
        let (input, transient_map) = invocation;

        let extension = ChaincodeHeaderExtension {
            chaincode_id: Some(header_chaincode),
        };

        let channel_header = fabric_proto::common::ChannelHeader {
            r#type: HeaderType::EndorserTransaction as i32,
            version: 1,
            timestamp: Some(now_timestamp()),
            channel_id: self.channel_id.clone(),
            tx_id: self.context.tx_id.clone(),
            epoch: 0,
            extension: extension.encode_to_vec(),
            tls_cert_hash: self.tls_cert_hash.clone().unwrap_or_default(),
        };

        let header = Header {
            channel_header: channel_header.encode_to_vec(),
            signature_header: self.context.signature_header().encode_to_vec(),
        };

        let payload = ChaincodeProposalPayload {
            input: input.encode_to_vec(),
            transient_map,
        };

        Ok(Proposal {
            header: header.encode_to_vec(),
            payload: payload.encode_to_vec(),
            extension: Vec::new(),
        })
    }

    /// Builds and signs: the signature covers the marshaled proposal.
    pub fn build_signed(&self, identity: &SigningIdentity) -> Result<SignedProposal, Error> {
        let proposal_bytes = self.build()?.encode_to_vec();
        let signature = identity.sign(&proposal_bytes)?;
        Ok(SignedProposal { proposal_bytes, signature })
    }

    /// The chaincode named in the header extension plus the invocation
    /// spec carried in the payload, per kind.
    fn invocation_spec(
        &self,
    ) -> (ChaincodeId, (ChaincodeInvocationSpec, HashMap<String, Vec<u8>>)) {
        match &self.kind {
            ProposalKind::Install { code_package } => {
                let cds = self.deployment_spec(Vec::new(), code_package.clone());
                let args = vec![b"install".to_vec(), cds.encode_to_vec()];
                (lscc_id(), (lscc_invocation(args), HashMap::new()))
            }
            ProposalKind::Instantiate(lifecycle) => {
                let cds = self.deployment_spec(lifecycle.init_args.clone(), Vec::new());
                let args = lifecycle_args("deploy", &self.channel_id, &cds, lifecycle);
                (lscc_id(), (lscc_invocation(args), HashMap::new()))
            }
            ProposalKind::Upgrade(lifecycle) => {
                let cds = self.deployment_spec(lifecycle.init_args.clone(), Vec::new());
                let args = lifecycle_args("upgrade", &self.channel_id, &cds, lifecycle);
                (lscc_id(), (lscc_invocation(args), HashMap::new()))
            }
            ProposalKind::Invoke { fcn, args, transient }
            | ProposalKind::Query { fcn, args, transient } => {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(fcn.clone().into_bytes());
                full_args.extend(args.iter().cloned());

                let spec = ChaincodeInvocationSpec {
                    chaincode_spec: Some(ChaincodeSpec {
                        r#type: self.chaincode.language.spec_type() as i32,
                        chaincode_id: Some(self.chaincode.chaincode_id()),
                        input: Some(ChaincodeInput {
                            args: full_args,
                            decorations: HashMap::new(),
                        }),
                        timeout: 0,
                    }),
                };
                (self.chaincode.chaincode_id(), (spec, transient.clone()))
            }
        }
    }

    fn deployment_spec(&self, init_args: Vec<Vec<u8>>, code_package: Vec<u8>) -> ChaincodeDeploymentSpec {
        ChaincodeDeploymentSpec {
            chaincode_spec: Some(ChaincodeSpec {
                r#type: self.chaincode.language.spec_type() as i32,
                chaincode_id: Some(self.chaincode.chaincode_id()),
                input: Some(ChaincodeInput { args: init_args, decorations: HashMap::new() }),
                timeout: 0,
            }),
            code_package,
        }
    }
}

fn lscc_id() -> ChaincodeId {
    ChaincodeId { path: String::new(), name: LSCC.to_string(), version: String::new() }
}

fn lscc_invocation(args: Vec<Vec<u8>>) -> ChaincodeInvocationSpec {
    ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: chaincode_spec::Type::Golang as i32,
            chaincode_id: Some(lscc_id()),
            input: Some(ChaincodeInput { args, decorations: HashMap::new() }),
            timeout: 0,
        }),
    }
}

/// LSCC positional arguments:
/// `[action, channel, cds, policy?, escc?, vscc?, collections?]`.
/// When a later optional argument is present, every absent earlier one
/// becomes an empty placeholder so positions stay fixed.
fn lifecycle_args(
    action: &str,
    channel_id: &str,
    cds: &ChaincodeDeploymentSpec,
    lifecycle: &LifecycleArgs,
) -> Vec<Vec<u8>> {
    let mut args = vec![
        action.as_bytes().to_vec(),
        channel_id.as_bytes().to_vec(),
        cds.encode_to_vec(),
    ];

    let tail = [
        lifecycle.endorsement_policy.clone(),
        lifecycle.escc.clone().map(String::into_bytes),
        lifecycle.vscc.clone().map(String::into_bytes),
        lifecycle.collection_config.clone(),
    ];
    if let Some(last) = tail.iter().rposition(Option::is_some) {
        for slot in tail.into_iter().take(last + 1) {
            args.push(slot.unwrap_or_default());
        }
    }
    args
}

pub(crate) fn now_timestamp() -> prost_types::Timestamp {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    prost_types::Timestamp {
        seconds: now.as_secs() as i64,
        nanos: now.subsec_nanos() as i32,
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
