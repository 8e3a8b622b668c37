//! Transaction receipts and validation results.

use crate::codec::CborMessage;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation verdict assigned by the replica set to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// The transaction was applied.
    Valid,
    /// A read-set version no longer matches committed state.
    InvalidMvccConflictWithCommittedState,
    /// An earlier transaction in the same block wrote a key this one read.
    InvalidMvccConflictWithinBlock,
    /// The transaction references a database that does not exist.
    InvalidDatabaseDoesNotExist,
    /// The submitter lacks write permission on a key.
    InvalidNoPermission,
    /// A signature did not verify.
    InvalidUnauthorised,
    /// A must-sign user did not sign.
    InvalidMissingSignature,
    /// The transaction is structurally malformed.
    InvalidIncorrectEntries,
}

impl Flag {
    /// Returns true for [`Flag::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Flag::Valid)
    }

    /// Returns true for optimistic-concurrency conflicts.
    pub fn is_mvcc_conflict(&self) -> bool {
        matches!(
            self,
            Flag::InvalidMvccConflictWithCommittedState | Flag::InvalidMvccConflictWithinBlock
        )
    }

    /// Returns the canonical upper-case name of the flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Valid => "VALID",
            Flag::InvalidMvccConflictWithCommittedState => {
                "INVALID_MVCC_CONFLICT_WITH_COMMITTED_STATE"
            }
            Flag::InvalidMvccConflictWithinBlock => "INVALID_MVCC_CONFLICT_WITHIN_BLOCK",
            Flag::InvalidDatabaseDoesNotExist => "INVALID_DATABASE_DOES_NOT_EXIST",
            Flag::InvalidNoPermission => "INVALID_NO_PERMISSION",
            Flag::InvalidUnauthorised => "INVALID_UNAUTHORISED",
            Flag::InvalidMissingSignature => "INVALID_MISSING_SIGNATURE",
            Flag::InvalidIncorrectEntries => "INVALID_INCORRECT_ENTRIES",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation result for one transaction in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationInfo {
    /// Verdict.
    pub flag: Flag,
    /// Human-readable reason, meaningful only when `flag` is not valid.
    pub reason_if_invalid: String,
}

impl ValidationInfo {
    /// Creates a valid result.
    pub fn valid() -> Self {
        Self {
            flag: Flag::Valid,
            reason_if_invalid: String::new(),
        }
    }

    /// Creates an invalid result with a reason.
    pub fn invalid(flag: Flag, reason: impl Into<String>) -> Self {
        Self {
            flag,
            reason_if_invalid: reason.into(),
        }
    }
}

/// Header of an ordered block of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number, starting at 1.
    pub number: u64,
    /// Hash of the previous block header (empty for the first block).
    pub previous_hash: Vec<u8>,
    /// Hash over the transactions of this block.
    pub tx_root: Vec<u8>,
    /// One entry per transaction, in block order.
    pub validation_info: Vec<ValidationInfo>,
}

impl CborMessage for BlockHeader {}

/// Proof of a transaction's position in a block and of its validation
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Header of the block containing the transaction.
    pub header: BlockHeader,
    /// Index of the transaction within the block.
    pub tx_index: u64,
}

impl TxReceipt {
    /// Returns the validation entry for this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if `tx_index` does not address an entry of the
    /// header's validation list.
    pub fn validation(&self) -> CodecResult<&ValidationInfo> {
        usize::try_from(self.tx_index)
            .ok()
            .and_then(|i| self.header.validation_info.get(i))
            .ok_or_else(|| {
                CodecError::invalid_structure(format!(
                    "tx_index {} out of range for block {} with {} entries",
                    self.tx_index,
                    self.header.number,
                    self.header.validation_info.len()
                ))
            })
    }
}

impl CborMessage for TxReceipt {}
