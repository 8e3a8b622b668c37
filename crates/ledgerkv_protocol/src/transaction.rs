//! Data transaction payload and the signed commit envelope.

use crate::codec::CborMessage;
use crate::crypto::{CryptoError, CryptoResult, SignatureVerifier};
use crate::error::CodecResult;
use crate::types::{AccessControl, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A read recorded in a transaction's read-set.
///
/// `version` is the committed version observed at first read, or `None`
/// when the key did not exist. The replica rejects the transaction if the
/// committed version differs at validation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRead {
    /// Key that was read.
    pub key: String,
    /// Version observed by the read.
    pub version: Option<Version>,
}

/// A write recorded in a transaction's write-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataWrite {
    /// Key to write.
    pub key: String,
    /// New value.
    pub value: Vec<u8>,
    /// Access control to attach to the key.
    pub acl: Option<AccessControl>,
}

/// A delete recorded in a transaction's write-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDelete {
    /// Key to delete.
    pub key: String,
}

/// All reads, writes and deletes a transaction performs on one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbOperation {
    /// Database name.
    pub db_name: String,
    /// Read-set entries.
    pub data_reads: Vec<DataRead>,
    /// Write-set entries that store a value.
    pub data_writes: Vec<DataWrite>,
    /// Write-set entries that remove a key.
    pub data_deletes: Vec<DataDelete>,
}

impl DbOperation {
    /// Creates an empty operation for a database.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Self::default()
        }
    }

    /// Returns true if the operation neither writes nor deletes.
    pub fn is_read_only(&self) -> bool {
        self.data_writes.is_empty() && self.data_deletes.is_empty()
    }
}

/// The signed part of a commit envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTx {
    /// Transaction identifier, assigned when the transaction is frozen.
    pub tx_id: String,
    /// Users whose signatures the replica requires. Always includes the
    /// submitter.
    pub must_sign_user_ids: Vec<String>,
    /// Per-database operations, ordered by database name.
    pub db_operations: Vec<DbOperation>,
}

impl DataTx {
    /// Returns the number of write-set entries (writes and deletes).
    pub fn write_count(&self) -> usize {
        self.db_operations
            .iter()
            .map(|op| op.data_writes.len() + op.data_deletes.len())
            .sum()
    }

    /// Returns the number of read-set entries.
    pub fn read_count(&self) -> usize {
        self.db_operations.iter().map(|op| op.data_reads.len()).sum()
    }
}

impl CborMessage for DataTx {}

/// Commit envelope: a transaction payload plus the signatures over its
/// CBOR encoding.
///
/// Built once at commit time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTxEnvelope {
    /// Transaction payload.
    pub payload: DataTx,
    /// Signatures keyed by user id.
    pub signatures: BTreeMap<String, Vec<u8>>,
}

impl DataTxEnvelope {
    /// Creates an envelope from a payload and its signatures.
    pub fn new(payload: DataTx, signatures: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            payload,
            signatures,
        }
    }

    /// Returns the transaction id.
    pub fn tx_id(&self) -> &str {
        &self.payload.tx_id
    }

    /// Returns the bytes the signatures were computed over.
    pub fn payload_bytes(&self) -> CodecResult<Vec<u8>> {
        self.payload.encode()
    }

    /// Checks that every must-sign user has a valid signature.
    pub fn verify_signatures(&self, verifier: &dyn SignatureVerifier) -> CryptoResult<()> {
        let bytes = self
            .payload_bytes()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;

        for user in &self.payload.must_sign_user_ids {
            let signature = self
                .signatures
                .get(user)
                .ok_or_else(|| CryptoError::MissingSignature(user.clone()))?;
            verifier.verify(user, &bytes, signature)?;
        }

        Ok(())
    }
}

impl CborMessage for DataTxEnvelope {}
