//! Error taxonomy of the client.
//!
//! Every remote-call failure is converted into one of these kinds
//! before it crosses a component boundary; no tonic status or transport
//! error reaches the facade raw. Each variant carries the remote
//! endpoint and the TxID where one applies, and never key material.
//!
//! Retry semantics:
//!
//! | Kind | Retried |
//! |---|---|
//! | `Argument` | never |
//! | `Crypto` | never |
//! | `Consistency` | never (surfaced with per-endorser detail) |
//! | `Proposal` | caller's choice |
//! | `Transaction` | broadcast retried internally up to its budget |
//! | `TransactionTimeout` | never (listener already cleaned up) |
//! | `EventHub` | reconnected internally, surfaced after the budget |
//! | `ShuttingDown` | never |
//! | `Timeout` | caller's choice |

use std::time::Duration;

use thiserror::Error;

use fabric_common::CryptoError;

/// One endorser's view of a diverging endorsement round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorserDetail {
    pub peer: String,
    pub status: i32,
    /// Chaincode response payload the endorser returned.
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input: null or blank values, asymmetric TLS fields,
    /// unknown chaincode types, unparseable URLs.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Endorsement responses disagree on (proposal hash, payload).
    #[error("endorsement responses split into {} consistency groups", .details.len())]
    Consistency { details: Vec<Vec<EndorserDetail>> },

    /// Peer-side failure: transport error, bad status, endorsement
    /// refusal.
    #[error("proposal failed on {endpoint}: {message}")]
    Proposal { endpoint: String, message: String },

    /// Orderer rejection or envelope assembly failure.
    #[error("transaction {tx_id:?} on {endpoint:?} failed: {message}")]
    Transaction {
        tx_id: Option<String>,
        endpoint: Option<String>,
        message: String,
    },

    /// The commit listener expired before a block carried the TxID.
    #[error("transaction {tx_id} not committed within {waited:?}")]
    TransactionTimeout { tx_id: String, waited: Duration },

    /// Event stream failure, surfaced after the reconnect budget.
    #[error("event hub {endpoint} failed: {message}")]
    EventHub { endpoint: String, message: String },

    /// The channel was shut down while the operation was in flight.
    #[error("channel {channel} is shutting down")]
    ShuttingDown { channel: String },

    /// A remote call exceeded its deadline. Distinct from refusal so
    /// callers can tell "took too long" from "said no".
    #[error("{operation} to {endpoint} timed out after {elapsed:?}")]
    Timeout {
        endpoint: String,
        operation: &'static str,
        elapsed: Duration,
    },
}

impl Error {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Error::Argument(msg.into())
    }

    /// True for deadline expirations of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::TransactionTimeout { .. })
    }

    /// Hint for callers: retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Proposal { .. }
                | Error::Transaction { .. }
                | Error::EventHub { .. }
                | Error::Timeout { .. }
        )
    }
}
