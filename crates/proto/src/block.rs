//! Decode helpers over committed blocks.
//!
//! Commit tracking needs two things from a block: the TxID of every
//! enclosed envelope, and the validation code the committing peer
//! recorded for it in the transactions filter
//! (`BlockMetadataIndex::TransactionsFilter`). Both live behind two
//! layers of nested serialization, so the walk is centralized here.

use prost::Message;
use thiserror::Error;

use crate::common::{Block, BlockMetadataIndex, ChannelHeader, Envelope, Payload};
use crate::transaction::TxValidationCode;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockDecodeError {
    /// A required nested message was absent.
    #[error("block is missing {0}")]
    MissingField(&'static str),

    /// Nested protobuf bytes failed to decode.
    #[error("malformed block content: {0}")]
    Malformed(String),

    /// Transactions filter length does not match the envelope count.
    #[error("transactions filter has {filter} entries for {envelopes} envelopes")]
    FilterMismatch { filter: usize, envelopes: usize },
}

impl From<prost::DecodeError> for BlockDecodeError {
    fn from(e: prost::DecodeError) -> Self {
        BlockDecodeError::Malformed(e.to_string())
    }
}

/// One transaction of a decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransaction {
    pub tx_id: String,
    pub channel_id: String,
    /// Raw validation code byte; compare against [`TxValidationCode`].
    pub validation_code: i32,
}

impl BlockTransaction {
    pub fn is_valid(&self) -> bool {
        self.validation_code == TxValidationCode::Valid as i32
    }
}

/// Block number, or an error when the header is absent.
pub fn block_number(block: &Block) -> Result<u64, BlockDecodeError> {
    block
        .header
        .as_ref()
        .map(|h| h.number)
        .ok_or(BlockDecodeError::MissingField("header"))
}

/// Walks every envelope of `block` and pairs its channel header with the
/// transactions-filter entry at the same index.
///
/// A missing or short filter yields `FilterMismatch`; an undecodable
/// envelope yields `Malformed`. Callers treat both as a malformed block.
pub fn block_transactions(block: &Block) -> Result<Vec<BlockTransaction>, BlockDecodeError> {
    let data = block
        .data
        .as_ref()
        .ok_or(BlockDecodeError::MissingField("data"))?;

    let filter = block
        .metadata
        .as_ref()
        .and_then(|m| m.metadata.get(BlockMetadataIndex::TransactionsFilter as usize))
        .cloned()
        .unwrap_or_default();

    if filter.len() != data.data.len() {
        return Err(BlockDecodeError::FilterMismatch {
            filter: filter.len(),
            envelopes: data.data.len(),
        });
    }

    let mut txs = Vec::with_capacity(data.data.len());
    for (idx, env_bytes) in data.data.iter().enumerate() {
        let header = envelope_channel_header(env_bytes)?;
        txs.push(BlockTransaction {
            tx_id: header.tx_id,
            channel_id: header.channel_id,
            validation_code: i32::from(filter[idx]),
        });
    }
    Ok(txs)
}

/// Decodes the channel header of one marshaled envelope.
pub fn envelope_channel_header(env_bytes: &[u8]) -> Result<ChannelHeader, BlockDecodeError> {
    let envelope = Envelope::decode(env_bytes)?;
    let payload = Payload::decode(envelope.payload.as_slice())?;
    let header = payload
        .header
        .ok_or(BlockDecodeError::MissingField("payload.header"))?;
    Ok(ChannelHeader::decode(header.channel_header.as_slice())?)
}
