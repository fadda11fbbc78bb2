//! MSP identity serialization (`msp/identities.proto`).

/// An identity bound to a membership service provider: the MSP id plus
/// the identity material (an X.509 certificate in PEM form).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SerializedIdentity {
    #[prost(string, tag = "1")]
    pub mspid: String,
    #[prost(bytes = "vec", tag = "2")]
    pub id_bytes: Vec<u8>,
}
