//! Ordering-service messages (`orderer/ab.proto`).

use crate::common::Block;

/// Reply to a broadcast envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastResponse {
    #[prost(enumeration = "crate::common::Status", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub info: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekNewest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekOldest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekSpecified {
    #[prost(uint64, tag = "1")]
    pub number: u64,
}

/// A position in the chain: newest, oldest, or a specific block number.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekPosition {
    #[prost(oneof = "seek_position::Type", tags = "1, 2, 3")]
    pub r#type: Option<seek_position::Type>,
}

pub mod seek_position {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Newest(super::SeekNewest),
        #[prost(message, tag = "2")]
        Oldest(super::SeekOldest),
        #[prost(message, tag = "3")]
        Specified(super::SeekSpecified),
    }
}

impl SeekPosition {
    pub fn newest() -> Self {
        Self { r#type: Some(seek_position::Type::Newest(SeekNewest {})) }
    }

    pub fn oldest() -> Self {
        Self { r#type: Some(seek_position::Type::Oldest(SeekOldest {})) }
    }

    pub fn specified(number: u64) -> Self {
        Self { r#type: Some(seek_position::Type::Specified(SeekSpecified { number })) }
    }
}

/// Requests a range of blocks from the delivery service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekInfo {
    #[prost(message, optional, tag = "1")]
    pub start: Option<SeekPosition>,
    #[prost(message, optional, tag = "2")]
    pub stop: Option<SeekPosition>,
    #[prost(enumeration = "seek_info::SeekBehavior", tag = "3")]
    pub behavior: i32,
}

pub mod seek_info {
    /// Whether the service blocks until a missing block arrives or
    /// fails the stream.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum SeekBehavior {
        BlockUntilReady = 0,
        FailIfNotReady = 1,
    }
}

/// One message of the deliver stream: either a terminal status or a
/// block.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeliverResponse {
    #[prost(oneof = "deliver_response::Type", tags = "1, 2")]
    pub r#type: Option<deliver_response::Type>,
}

pub mod deliver_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(enumeration = "crate::common::Status", tag = "1")]
        Status(i32),
        #[prost(message, tag = "2")]
        Block(super::Block),
    }
}
