//! Evidence command implementations.

use ledgerkv_client::{interpret, EvidenceStore, ReceiptExt, TxEvidence};
use ledgerkv_protocol::{HmacVerifier, SignatureVerifier};
use ledgerkv_testkit::{user_key, DEMO_USERS};
use serde::Serialize;
use std::path::Path;

/// Printable view of one transaction's evidence.
#[derive(Debug, Serialize)]
pub struct EvidenceView {
    /// Transaction id.
    pub tx_id: String,
    /// Users required to sign.
    pub must_sign: Vec<String>,
    /// Users that did sign.
    pub signed_by: Vec<String>,
    /// Per-database operations.
    pub operations: Vec<OperationView>,
    /// Block holding the transaction.
    pub block: u64,
    /// Position within the block.
    pub tx_index: u64,
    /// Validation flag, or `None` if the receipt is malformed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    /// Reason the transaction was invalidated.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Operations on one database.
#[derive(Debug, Serialize)]
pub struct OperationView {
    /// Database name.
    pub db: String,
    /// Keys read, with the version observed (`-` when absent).
    pub reads: Vec<(String, String)>,
    /// Keys written, with the value rendered as text.
    pub writes: Vec<(String, String)>,
    /// Keys deleted.
    pub deletes: Vec<String>,
}

impl EvidenceView {
    /// Builds the view of stored evidence.
    pub fn new(evidence: &TxEvidence) -> Self {
        let payload = &evidence.envelope.payload;
        let (flag, reason) = match evidence.receipt.verdict() {
            Ok(verdict) => (Some(verdict.flag.to_string()), verdict.reason),
            Err(e) => (None, e.to_string()),
        };

        Self {
            tx_id: evidence.tx_id().to_string(),
            must_sign: payload.must_sign_user_ids.clone(),
            signed_by: evidence.envelope.signatures.keys().cloned().collect(),
            operations: payload
                .db_operations
                .iter()
                .map(|op| OperationView {
                    db: op.db_name.clone(),
                    reads: op
                        .data_reads
                        .iter()
                        .map(|r| {
                            let version =
                                r.version.map_or_else(|| "-".to_string(), |v| v.to_string());
                            (r.key.clone(), version)
                        })
                        .collect(),
                    writes: op
                        .data_writes
                        .iter()
                        .map(|w| {
                            (w.key.clone(), String::from_utf8_lossy(&w.value).into_owned())
                        })
                        .collect(),
                    deletes: op.data_deletes.iter().map(|d| d.key.clone()).collect(),
                })
                .collect(),
            block: evidence.receipt.header.number,
            tx_index: evidence.receipt.tx_index,
            flag,
            reason,
        }
    }
}

/// Verification result for one transaction.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Transaction id.
    pub tx_id: String,
    /// Validation flag recorded in the receipt.
    pub flag: Option<String>,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the list command.
pub fn list(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = EvidenceStore::new(dir);
    let ids = store.list()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&ids)?),
        _ => {
            if ids.is_empty() {
                println!("No evidence found in {:?}", dir);
            }
            for id in ids {
                println!("{}", id);
            }
        }
    }
    Ok(())
}

/// Runs the show command.
pub fn show(dir: &Path, tx_id: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let evidence = EvidenceStore::new(dir).load(tx_id)?;
    let view = EvidenceView::new(&evidence);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&view)?),
        _ => print_view(&view),
    }
    Ok(())
}

/// Runs the verify command.
pub fn verify(
    dir: &Path,
    tx_id: Option<&str>,
    keys: &[String],
    demo_keys: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let verifier = build_verifier(keys, demo_keys)?;
    let store = EvidenceStore::new(dir);
    let ids = match tx_id {
        Some(id) => vec![id.to_string()],
        None => store.list()?,
    };

    println!("Verifying evidence in {:?}", dir);
    println!();

    let mut failed = 0;
    for id in &ids {
        let result = match store.load(id) {
            Ok(evidence) => check(&evidence, &verifier),
            Err(e) => VerifyResult {
                tx_id: id.clone(),
                flag: None,
                errors: vec![e.to_string()],
            },
        };
        print_result(&result);
        if !result.is_ok() {
            failed += 1;
        }
    }

    println!();
    if failed == 0 {
        println!("✓ {} transaction(s) verified", ids.len());
        Ok(())
    } else {
        println!("✗ {} of {} transaction(s) failed verification", failed, ids.len());
        Err("Verification failed".into())
    }
}

/// Checks the signatures and receipt of one transaction.
///
/// An invalid validation flag is reported, not counted as a failure.
pub fn check(evidence: &TxEvidence, verifier: &dyn SignatureVerifier) -> VerifyResult {
    let mut result = VerifyResult {
        tx_id: evidence.tx_id().to_string(),
        ..VerifyResult::default()
    };

    match evidence.receipt.validation() {
        Ok(info) => result.flag = Some(interpret(info).flag.to_string()),
        Err(e) => result.errors.push(format!("receipt: {}", e)),
    }

    if evidence.envelope.payload.must_sign_user_ids.is_empty() {
        result.errors.push("envelope names no signers".into());
    }
    if let Err(e) = evidence.envelope.verify_signatures(verifier) {
        result.errors.push(format!("signatures: {}", e));
    }

    result
}

fn build_verifier(
    keys: &[String],
    demo_keys: bool,
) -> Result<HmacVerifier, Box<dyn std::error::Error>> {
    let mut verifier = HmacVerifier::new();
    if demo_keys {
        for user in DEMO_USERS {
            verifier.register(user, user_key(user));
        }
    }
    for spec in keys {
        let (user, path) = spec
            .split_once('=')
            .ok_or_else(|| format!("Expected USER=KEY_FILE, got {:?}", spec))?;
        let key = std::fs::read(path).map_err(|e| format!("Cannot read key {}: {}", path, e))?;
        verifier.register(user, key);
    }
    Ok(verifier)
}

fn print_view(view: &EvidenceView) {
    println!("Transaction {}", view.tx_id);
    println!("  Must sign:  {}", view.must_sign.join(", "));
    println!("  Signed by:  {}", view.signed_by.join(", "));
    println!("  Block:      {} (index {})", view.block, view.tx_index);
    match &view.flag {
        Some(flag) => println!("  Flag:       {}", flag),
        None => println!("  Flag:       <unreadable>"),
    }
    if !view.reason.is_empty() {
        println!("  Reason:     {}", view.reason);
    }

    for op in &view.operations {
        println!();
        println!("  Database {}", op.db);
        for (key, version) in &op.reads {
            println!("    read   {} @ {}", key, version);
        }
        for (key, value) in &op.writes {
            println!("    write  {} = {}", key, value);
        }
        for key in &op.deletes {
            println!("    delete {}", key);
        }
    }
}

fn print_result(result: &VerifyResult) {
    let flag = result.flag.as_deref().unwrap_or("?");
    if result.is_ok() {
        println!("  ✓ {} [{}]", result.tx_id, flag);
    } else {
        println!("  ✗ {} [{}]", result.tx_id, flag);
        for error in &result.errors {
            println!("      - {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkv_protocol::{
        BlockHeader, CborMessage, DataRead, DataTx, DataTxEnvelope, DataWrite, DbOperation, Flag, Signer,
        TxReceipt, ValidationInfo, Version,
    };
    use ledgerkv_testkit::{signer_for, DEMO_DB};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn evidence(signers: &[&str], validation: ValidationInfo) -> TxEvidence {
        let mut op = DbOperation::new(DEMO_DB);
        op.data_reads.push(DataRead {
            key: "key1".into(),
            version: Some(Version::new(1, 0)),
        });
        op.data_writes.push(DataWrite {
            key: "key1".into(),
            value: b"2".to_vec(),
            acl: None,
        });
        let payload = DataTx {
            tx_id: "abc123".into(),
            must_sign_user_ids: vec!["alice".into(), "bob".into()],
            db_operations: vec![op],
        };

        let bytes = payload.encode().unwrap();
        let signatures: BTreeMap<_, _> = signers
            .iter()
            .map(|u| (u.to_string(), signer_for(u).sign(&bytes).unwrap()))
            .collect();

        TxEvidence {
            envelope: DataTxEnvelope::new(payload, signatures),
            receipt: TxReceipt {
                header: BlockHeader {
                    number: 2,
                    previous_hash: vec![0; 32],
                    tx_root: vec![0; 32],
                    validation_info: vec![validation],
                },
                tx_index: 0,
            },
        }
    }

    fn demo_verifier() -> HmacVerifier {
        build_verifier(&[], true).unwrap()
    }

    #[test]
    fn fully_signed_evidence_verifies() {
        let result = check(&evidence(&["alice", "bob"], ValidationInfo::valid()), &demo_verifier());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.flag.as_deref(), Some("VALID"));
    }

    #[test]
    fn invalid_verdict_is_not_a_failure() {
        let info = ValidationInfo::invalid(Flag::InvalidMvccConflictWithCommittedState, "key1");
        let result = check(&evidence(&["alice", "bob"], info), &demo_verifier());
        assert!(result.is_ok());
        assert_eq!(
            result.flag.as_deref(),
            Some("INVALID_MVCC_CONFLICT_WITH_COMMITTED_STATE")
        );
    }

    #[test]
    fn missing_signature_fails() {
        let result = check(&evidence(&["alice"], ValidationInfo::valid()), &demo_verifier());
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("bob"));
    }

    #[test]
    fn unknown_key_fails() {
        let result = check(
            &evidence(&["alice", "bob"], ValidationInfo::valid()),
            &HmacVerifier::new(),
        );
        assert!(!result.is_ok());
    }

    #[test]
    fn out_of_range_receipt_fails() {
        let mut evidence = evidence(&["alice", "bob"], ValidationInfo::valid());
        evidence.receipt.tx_index = 4;
        let result = check(&evidence, &demo_verifier());
        assert!(result.flag.is_none());
        assert!(!result.is_ok());
    }

    #[test]
    fn keys_are_read_from_files() {
        let dir = TempDir::new().unwrap();
        let alice = dir.path().join("alice.key");
        let bob = dir.path().join("bob.key");
        std::fs::write(&alice, user_key("alice")).unwrap();
        std::fs::write(&bob, user_key("bob")).unwrap();

        let keys = vec![
            format!("alice={}", alice.display()),
            format!("bob={}", bob.display()),
        ];
        let verifier = build_verifier(&keys, false).unwrap();
        assert!(verifier.knows("alice"));
        assert!(!verifier.knows("charlie"));

        let result = check(&evidence(&["alice", "bob"], ValidationInfo::valid()), &verifier);
        assert!(result.is_ok());
    }

    #[test]
    fn malformed_key_argument_is_rejected() {
        assert!(build_verifier(&["alice".to_string()], false).is_err());
    }

    #[test]
    fn view_renders_operations() {
        let view = EvidenceView::new(&evidence(&["alice"], ValidationInfo::valid()));
        assert_eq!(view.tx_id, "abc123");
        assert_eq!(view.signed_by, vec!["alice"]);
        assert_eq!(view.operations[0].reads, vec![("key1".into(), "1:0".into())]);
        assert_eq!(view.operations[0].writes, vec![("key1".into(), "2".into())]);
        assert_eq!(view.flag.as_deref(), Some("VALID"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["block"], 2);
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn verify_command_over_a_store() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let good = evidence(&["alice", "bob"], ValidationInfo::valid());
        store.save(&good.envelope, &good.receipt).unwrap();

        assert!(verify(dir.path(), None, &[], true).is_ok());
        assert!(verify(dir.path(), None, &[], false).is_err());
        assert!(verify(dir.path(), Some("missing"), &[], true).is_err());
    }
}
