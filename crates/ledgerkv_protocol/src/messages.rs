//! Request and response messages exchanged with a replica.

use crate::codec::CborMessage;
use crate::receipt::TxReceipt;
use crate::transaction::DataTxEnvelope;
use crate::types::ValueWithMetadata;
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Path of the session opening endpoint.
pub const HELLO_PATH: &str = "/ledger/hello";
/// Path of the transaction submission endpoint.
pub const SUBMIT_PATH: &str = "/ledger/tx";
/// Path of the value query endpoint.
pub const QUERY_PATH: &str = "/ledger/query";
/// Path of the receipt lookup endpoint.
pub const RECEIPT_PATH: &str = "/ledger/receipt";

/// Session opening request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// User opening the session.
    pub user_id: String,
    /// Client protocol version.
    pub protocol_version: u16,
}

impl HelloRequest {
    /// Creates a hello request for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl CborMessage for HelloRequest {}

/// Session opening response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponse {
    /// Whether the replica accepted the session.
    pub success: bool,
    /// Error message if refused.
    pub error: Option<String>,
    /// Identifier of the answering replica.
    pub replica_id: String,
    /// Replica protocol version.
    pub protocol_version: u16,
}

impl HelloResponse {
    /// Creates an accepting response.
    pub fn success(replica_id: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            replica_id: replica_id.into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Creates a refusing response.
    pub fn error(replica_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            replica_id: replica_id.into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl CborMessage for HelloResponse {}

/// Submission of a signed transaction for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Signed envelope.
    pub envelope: DataTxEnvelope,
}

impl CborMessage for SubmitRequest {}

/// Answer to a submission.
///
/// Acceptance only means the transaction entered the ordering queue; the
/// validation verdict arrives later in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Whether the replica accepted the transaction for ordering.
    pub accepted: bool,
    /// Transaction id acknowledged by the replica.
    pub tx_id: String,
    /// Error message if rejected.
    pub error: Option<String>,
}

impl SubmitResponse {
    /// Creates an accepting response.
    pub fn accepted(tx_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            tx_id: tx_id.into(),
            error: None,
        }
    }

    /// Creates a rejecting response.
    pub fn rejected(tx_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            tx_id: tx_id.into(),
            error: Some(message.into()),
        }
    }
}

impl CborMessage for SubmitResponse {}

/// Query for the committed value of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryValueRequest {
    /// Querying user.
    pub user_id: String,
    /// Database name.
    pub db_name: String,
    /// Key.
    pub key: String,
}

impl CborMessage for QueryValueRequest {}

/// Outcome of a value query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueLookup {
    /// The key exists.
    Found(ValueWithMetadata),
    /// The key does not exist.
    NotFound,
    /// The query could not be served.
    Failed(String),
}

/// Answer to a value query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryValueResponse {
    /// Lookup outcome.
    pub lookup: ValueLookup,
}

impl CborMessage for QueryValueResponse {}

/// Lookup of a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    /// Transaction id.
    pub tx_id: String,
}

impl CborMessage for ReceiptRequest {}

/// State of a receipt lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// The transaction has been ordered and validated.
    Ready(TxReceipt),
    /// The transaction has not been ordered yet.
    Pending,
}

/// Answer to a receipt lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptResponse {
    /// Receipt state, or `None` when the lookup failed.
    pub status: Option<ReceiptStatus>,
    /// Error message if the lookup failed.
    pub error: Option<String>,
}

impl ReceiptResponse {
    /// Creates a response carrying a receipt state.
    pub fn status(status: ReceiptStatus) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// Creates a failed lookup response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(message.into()),
        }
    }
}

impl CborMessage for ReceiptResponse {}
