//! On-disk store for transaction evidence.
//!
//! Layout under the store root:
//!
//! ```text
//! txs/<tx_id>.envelope   CBOR-encoded DataTxEnvelope
//! txs/<tx_id>.receipt    CBOR-encoded TxReceipt
//! ```

use crate::error::{ClientError, ClientResult};
use ledgerkv_protocol::{CborMessage, DataTxEnvelope, TxReceipt};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const TXS_DIR: &str = "txs";
const ENVELOPE_EXT: &str = "envelope";
const RECEIPT_EXT: &str = "receipt";

/// A committed transaction and its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEvidence {
    /// The submitted envelope.
    pub envelope: DataTxEnvelope,
    /// The receipt proving its position and verdict.
    pub receipt: TxReceipt,
}

impl TxEvidence {
    /// Returns the transaction id.
    pub fn tx_id(&self) -> &str {
        self.envelope.tx_id()
    }
}

/// Directory-backed evidence store.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    /// Creates a store rooted at `root`. Nothing is created until the first
    /// save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persists an envelope and its receipt.
    pub fn save(&self, envelope: &DataTxEnvelope, receipt: &TxReceipt) -> ClientResult<()> {
        let tx_id = envelope.tx_id();
        let (envelope_path, receipt_path) = self.paths(tx_id)?;

        fs::create_dir_all(self.root.join(TXS_DIR))?;
        fs::write(&envelope_path, envelope.encode()?)?;
        fs::write(&receipt_path, receipt.encode()?)?;

        info!(tx_id, dir = %self.root.display(), "saved transaction evidence");
        Ok(())
    }

    /// Loads the evidence of a transaction.
    pub fn load(&self, tx_id: &str) -> ClientResult<TxEvidence> {
        let (envelope_path, receipt_path) = self.paths(tx_id)?;

        let envelope = DataTxEnvelope::decode(&fs::read(&envelope_path)?)?;
        let receipt = TxReceipt::decode(&fs::read(&receipt_path)?)?;

        if envelope.tx_id() != tx_id {
            return Err(ClientError::Protocol(format!(
                "envelope in {} carries tx id {}",
                envelope_path.display(),
                envelope.tx_id()
            )));
        }

        Ok(TxEvidence { envelope, receipt })
    }

    /// Returns true if both files of a transaction exist.
    pub fn contains(&self, tx_id: &str) -> bool {
        match self.paths(tx_id) {
            Ok((envelope, receipt)) => envelope.is_file() && receipt.is_file(),
            Err(_) => false,
        }
    }

    /// Lists the ids of transactions with a stored envelope, sorted.
    pub fn list(&self) -> ClientResult<Vec<String>> {
        let dir = self.root.join(TXS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENVELOPE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn paths(&self, tx_id: &str) -> ClientResult<(PathBuf, PathBuf)> {
        validate_tx_id(tx_id)?;
        let dir = self.root.join(TXS_DIR);
        Ok((
            dir.join(format!("{}.{}", tx_id, ENVELOPE_EXT)),
            dir.join(format!("{}.{}", tx_id, RECEIPT_EXT)),
        ))
    }
}

fn validate_tx_id(tx_id: &str) -> ClientResult<()> {
    let ok = !tx_id.is_empty()
        && tx_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ClientError::InvalidArgument(format!(
            "invalid transaction id: {:?}",
            tx_id
        )))
    }
}
