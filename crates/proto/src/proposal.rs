//! Endorsement proposal messages (`peer/proposal.proto`,
//! `peer/proposal_response.proto`).

use std::collections::HashMap;

use crate::chaincode::ChaincodeId;

/// Extension carried in the channel header of an endorser transaction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeHeaderExtension {
    #[prost(message, optional, tag = "2")]
    pub chaincode_id: Option<ChaincodeId>,
}

/// Input to the chaincode plus transient data that never reaches the
/// ledger.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeProposalPayload {
    /// Marshaled `ChaincodeInvocationSpec` or `ChaincodeDeploymentSpec`.
    #[prost(bytes = "vec", tag = "1")]
    pub input: Vec<u8>,
    #[prost(map = "string, bytes", tag = "2")]
    pub transient_map: HashMap<String, Vec<u8>>,
}

/// A proposal to be endorsed. Header and payload are serialized so that
/// the signed bytes are unambiguous.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Proposal {
    /// Marshaled `common::Header`.
    #[prost(bytes = "vec", tag = "1")]
    pub header: Vec<u8>,
    /// Marshaled [`ChaincodeProposalPayload`].
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub extension: Vec<u8>,
}

/// Proposal bytes plus the creator's signature over them. The unit sent
/// to an endorsing peer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedProposal {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_bytes: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Chaincode execution outcome as reported by the endorser.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    /// Status code, following `common::Status` values.
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// An endorser's signature over the response payload, paired with its
/// serialized identity.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Endorsement {
    /// Marshaled `SerializedIdentity` of the endorsing peer.
    #[prost(bytes = "vec", tag = "1")]
    pub endorser: Vec<u8>,
    /// Signature over `payload || endorser` of the enclosing response.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Reply from an endorsing peer to a signed proposal.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposalResponse {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub response: Option<Response>,
    /// Marshaled [`ProposalResponsePayload`]; the bytes the endorsement
    /// signature covers.
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "6")]
    pub endorsement: Option<Endorsement>,
}

/// Payload covered by an endorsement signature.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposalResponsePayload {
    /// Hash of the proposal that triggered this response; responses to
    /// the same proposal must agree on it.
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_hash: Vec<u8>,
    /// Marshaled `ChaincodeAction`.
    #[prost(bytes = "vec", tag = "2")]
    pub extension: Vec<u8>,
}

/// Simulation results produced by chaincode execution.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeAction {
    /// Read/write set over the ledger.
    #[prost(bytes = "vec", tag = "1")]
    pub results: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub events: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<Response>,
    #[prost(message, optional, tag = "4")]
    pub chaincode_id: Option<ChaincodeId>,
}
