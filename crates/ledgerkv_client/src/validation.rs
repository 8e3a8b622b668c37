//! Interpretation of validation outcomes.

use crate::error::{ClientError, ClientResult};
use ledgerkv_protocol::{Flag, TxReceipt, ValidationInfo};

/// Outcome of a transaction as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the transaction was applied.
    pub is_valid: bool,
    /// Why the transaction was rejected; empty when valid.
    pub reason: String,
    /// Flag assigned by the replica set.
    pub flag: Flag,
}

impl Verdict {
    /// Returns true if the transaction lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        self.flag.is_mvcc_conflict()
    }
}

/// Maps a validation entry to a verdict.
pub fn interpret(info: &ValidationInfo) -> Verdict {
    let is_valid = info.flag.is_valid();
    Verdict {
        is_valid,
        reason: if is_valid {
            String::new()
        } else {
            info.reason_if_invalid.clone()
        },
        flag: info.flag,
    }
}

/// Verdict lookup on receipts.
pub trait ReceiptExt {
    /// Returns the verdict for the transaction the receipt belongs to.
    fn verdict(&self) -> ClientResult<Verdict>;
}

impl ReceiptExt for TxReceipt {
    fn verdict(&self) -> ClientResult<Verdict> {
        let info = self
            .validation()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(interpret(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkv_protocol::BlockHeader;

    #[test]
    fn valid_has_empty_reason() {
        let info = ValidationInfo {
            flag: Flag::Valid,
            reason_if_invalid: "stale text".into(),
        };
        let verdict = interpret(&info);
        assert!(verdict.is_valid);
        assert!(verdict.reason.is_empty());
        assert!(!verdict.is_conflict());
    }

    #[test]
    fn invalid_carries_reason() {
        let info = ValidationInfo::invalid(
            Flag::InvalidMvccConflictWithCommittedState,
            "mvcc conflict on key1",
        );
        let verdict = interpret(&info);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "mvcc conflict on key1");
        assert!(verdict.is_conflict());
    }

    #[test]
    fn non_conflict_rejection() {
        let verdict = interpret(&ValidationInfo::invalid(Flag::InvalidNoPermission, "denied"));
        assert!(!verdict.is_valid);
        assert!(!verdict.is_conflict());
    }

    #[test]
    fn receipt_verdict_uses_tx_index() {
        let receipt = TxReceipt {
            header: BlockHeader {
                number: 2,
                previous_hash: Vec::new(),
                tx_root: Vec::new(),
                validation_info: vec![
                    ValidationInfo::valid(),
                    ValidationInfo::invalid(Flag::InvalidMvccConflictWithinBlock, "key1"),
                ],
            },
            tx_index: 1,
        };
        assert_eq!(receipt.verdict().unwrap().flag, Flag::InvalidMvccConflictWithinBlock);

        let broken = TxReceipt {
            tx_index: 9,
            ..receipt
        };
        assert!(matches!(broken.verdict(), Err(ClientError::Protocol(_))));
    }
}
