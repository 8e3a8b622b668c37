//! # LedgerKV Protocol
//!
//! Transaction, receipt and wire message types for the LedgerKV client.
//!
//! This crate provides:
//! - Read-set and write-set entries (`DataRead`, `DataWrite`, `DataDelete`)
//! - The signed commit envelope (`DataTxEnvelope`)
//! - Transaction receipts and validation flags (`TxReceipt`, `ValidationInfo`)
//! - Request/response messages exchanged with a replica, and their paths
//! - CBOR encoding/decoding
//! - HMAC-SHA256 signing and verification primitives
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod crypto;
mod error;
mod messages;
mod receipt;
mod transaction;
mod types;

pub use codec::{decode, encode, CborMessage};
pub use crypto::{
    block_hash, CryptoError, CryptoResult, HmacSigner, HmacVerifier, SignatureVerifier, Signer,
};
pub use error::{CodecError, CodecResult};
pub use messages::{
    HelloRequest, HelloResponse, QueryValueRequest, QueryValueResponse, ReceiptRequest,
    ReceiptResponse, ReceiptStatus, SubmitRequest, SubmitResponse, ValueLookup, HELLO_PATH,
    PROTOCOL_VERSION, QUERY_PATH, RECEIPT_PATH, SUBMIT_PATH,
};
pub use receipt::{BlockHeader, Flag, TxReceipt, ValidationInfo};
pub use transaction::{DataDelete, DataRead, DataTx, DataTxEnvelope, DataWrite, DbOperation};
pub use types::{AccessControl, Metadata, ValueWithMetadata, Version};
