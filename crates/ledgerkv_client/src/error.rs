//! Error types for the client.

use ledgerkv_protocol::{CodecError, CryptoError};
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to a replica set.
///
/// A transaction that the replica set orders and marks INVALID is not an
/// error: its verdict is carried by the receipt.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Opening or using the session failed at the connection level.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation on a transaction that is not open, or commit of an empty
    /// write-set.
    #[error("transaction state error: {0}")]
    TxState(String),

    /// A database name, key or transaction id was rejected before any
    /// request was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The commit envelope could not be signed. Never retryable.
    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    /// The envelope could not be delivered to the replica set.
    #[error("submission failed: {message}")]
    Submission {
        /// Error message.
        message: String,
        /// Whether the caller may resubmit.
        retryable: bool,
    },

    /// Reading a committed value failed. A missing key is not an error.
    #[error("query failed: {0}")]
    Query(String),

    /// Looking up a receipt failed. A receipt that is not available yet is
    /// not an error.
    #[error("receipt lookup failed: {0}")]
    Lookup(String),

    /// No receipt arrived before the deadline. The transaction may still
    /// commit later.
    #[error("no receipt for transaction {tx_id} after {waited:?}")]
    Timeout {
        /// Transaction that was being waited on.
        tx_id: String,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The wait was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] CodecError),

    /// A replica answered with something the client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Protocol version mismatch with the replica.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while persisting or loading evidence.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Creates a retryable submission error.
    pub fn submission_retryable(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable submission error.
    pub fn submission_fatal(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a transaction state error.
    pub fn tx_state(message: impl Into<String>) -> Self {
        Self::TxState(message.into())
    }

    /// Returns true if a caller may retry the failed operation.
    ///
    /// The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Submission { retryable, .. } => *retryable,
            ClientError::Timeout { .. } | ClientError::Lookup(_) | ClientError::Query(_) => true,
            _ => false,
        }
    }

    /// Returns the transaction id carried by the error, if any.
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            ClientError::Timeout { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }
}
