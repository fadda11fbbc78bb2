//! Service-discovery messages (`discovery/protocol.proto`, reduced to
//! the membership query this SDK issues).

/// Membership query for one channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
    /// Marshaled `SerializedIdentity` of the querying client.
    #[prost(bytes = "vec", tag = "2")]
    pub authentication: Vec<u8>,
}

/// One peer known to the discovery service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveredPeer {
    #[prost(string, tag = "1")]
    pub msp_id: String,
    #[prost(string, tag = "2")]
    pub endpoint: String,
    #[prost(uint64, tag = "3")]
    pub ledger_height: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryResponse {
    #[prost(message, repeated, tag = "1")]
    pub peers: Vec<DiscoveredPeer>,
}
