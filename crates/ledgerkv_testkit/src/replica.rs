//! In-memory replica standing in for the ordering and validation service.
//!
//! The replica keeps committed state in memory, queues submitted envelopes,
//! and cuts them into blocks. Every transaction in a block is validated in
//! block order and gets a [`ValidationInfo`]; valid ones are applied with
//! version `(block number, index in block)`.

use crate::error::{ReplicaError, ReplicaResult};
use ledgerkv_protocol::{
    block_hash, BlockHeader, CborMessage, CryptoError, DataTxEnvelope, Flag, HelloRequest,
    HelloResponse, HmacVerifier, Metadata, QueryValueRequest, QueryValueResponse,
    ReceiptRequest, ReceiptResponse, ReceiptStatus, SubmitRequest, SubmitResponse, TxReceipt,
    ValidationInfo, ValueLookup, ValueWithMetadata, Version, HELLO_PATH, PROTOCOL_VERSION,
    QUERY_PATH, RECEIPT_PATH, SUBMIT_PATH,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Configuration of the in-memory replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Identifier reported in hello responses.
    pub replica_id: String,
    /// Maximum number of transactions per block.
    pub block_size: usize,
    /// Cut a block as soon as `block_size` transactions are queued.
    pub auto_seal: bool,
}

impl ReplicaConfig {
    /// Creates a configuration with the given replica id.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
            ..Self::default()
        }
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Enables or disables automatic block cutting.
    pub fn with_auto_seal(mut self, auto_seal: bool) -> Self {
        self.auto_seal = auto_seal;
        self
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            replica_id: "replica1".into(),
            block_size: 1,
            auto_seal: true,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    databases: BTreeSet<String>,
    values: HashMap<(String, String), ValueWithMetadata>,
    pending: Vec<DataTxEnvelope>,
    seen_tx_ids: HashSet<String>,
    receipts: HashMap<String, TxReceipt>,
    blocks: Vec<BlockHeader>,
    seeded: u64,
}

/// An in-memory replica.
pub struct MemoryReplica {
    config: ReplicaConfig,
    verifier: HmacVerifier,
    state: Mutex<LedgerState>,
    offline: AtomicBool,
}

impl MemoryReplica {
    /// Creates a replica with no databases and no users.
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            verifier: HmacVerifier::new(),
            state: Mutex::new(LedgerState::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Registers a user and its signing key.
    pub fn with_user(mut self, user_id: impl Into<String>, key: Vec<u8>) -> Self {
        self.verifier.register(user_id, key);
        self
    }

    /// Creates a database.
    pub fn with_database(self, db_name: impl Into<String>) -> Self {
        self.state.lock().databases.insert(db_name.into());
        self
    }

    /// Returns the replica configuration.
    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Takes the replica offline or back online. An offline replica fails
    /// every request at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns true if the replica is offline.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Returns the number of queued, not yet ordered transactions.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the number of blocks cut so far.
    pub fn height(&self) -> u64 {
        self.state.lock().blocks.len() as u64
    }

    /// Returns the headers of all blocks, in order.
    pub fn blocks(&self) -> Vec<BlockHeader> {
        self.state.lock().blocks.clone()
    }

    /// Returns the committed value of a key, bypassing access control.
    pub fn committed(&self, db_name: &str, key: &str) -> Option<ValueWithMetadata> {
        self.state
            .lock()
            .values
            .get(&(db_name.to_string(), key.to_string()))
            .cloned()
    }

    /// Stores a value directly, outside any block.
    ///
    /// Seeded values get versions `(0, n)` so they never collide with the
    /// version of a transaction committed in a block. Returns the version.
    pub fn seed(&self, db_name: &str, key: &str, value: Vec<u8>) -> Version {
        let mut state = self.state.lock();
        let version = Version::new(0, state.seeded);
        state.seeded += 1;
        state.databases.insert(db_name.to_string());
        state.values.insert(
            (db_name.to_string(), key.to_string()),
            ValueWithMetadata {
                value,
                metadata: Metadata { version, acl: None },
            },
        );
        version
    }

    /// Answers a session opening request.
    pub fn handle_hello(&self, request: &HelloRequest) -> HelloResponse {
        if request.protocol_version != PROTOCOL_VERSION {
            return HelloResponse::error(
                &self.config.replica_id,
                format!("unsupported protocol version {}", request.protocol_version),
            );
        }
        if !self.verifier.knows(&request.user_id) {
            return HelloResponse::error(
                &self.config.replica_id,
                format!("unknown user {}", request.user_id),
            );
        }
        HelloResponse::success(&self.config.replica_id)
    }

    /// Queues a transaction for ordering.
    pub fn handle_submit(&self, request: SubmitRequest) -> SubmitResponse {
        let envelope = request.envelope;
        let tx_id = envelope.tx_id().to_string();
        if tx_id.is_empty() {
            return SubmitResponse::rejected(tx_id, "empty transaction id");
        }

        let should_seal = {
            let mut state = self.state.lock();
            if !state.seen_tx_ids.insert(tx_id.clone()) {
                return SubmitResponse::rejected(tx_id, "duplicate transaction id");
            }
            state.pending.push(envelope);
            trace!(tx_id = %tx_id, pending = state.pending.len(), "queued");
            self.config.auto_seal && state.pending.len() >= self.config.block_size
        };

        if should_seal {
            self.seal_block();
        }
        SubmitResponse::accepted(tx_id)
    }

    /// Answers a value query.
    pub fn handle_query(&self, request: &QueryValueRequest) -> QueryValueResponse {
        let state = self.state.lock();
        let lookup = if !state.databases.contains(&request.db_name) {
            ValueLookup::Failed(format!("database {} does not exist", request.db_name))
        } else {
            match state
                .values
                .get(&(request.db_name.clone(), request.key.clone()))
            {
                Some(v) => match &v.metadata.acl {
                    Some(acl) if !acl.can_read(&request.user_id) => ValueLookup::Failed(format!(
                        "{} has no read permission on {}",
                        request.user_id, request.key
                    )),
                    _ => ValueLookup::Found(v.clone()),
                },
                None => ValueLookup::NotFound,
            }
        };
        QueryValueResponse { lookup }
    }

    /// Answers a receipt lookup. Transactions that are queued or unknown
    /// are reported as pending.
    pub fn handle_receipt(&self, request: &ReceiptRequest) -> ReceiptResponse {
        let state = self.state.lock();
        match state.receipts.get(&request.tx_id) {
            Some(receipt) => ReceiptResponse::status(ReceiptStatus::Ready(receipt.clone())),
            None => ReceiptResponse::status(ReceiptStatus::Pending),
        }
    }

    /// Dispatches a CBOR request body by path.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ReplicaResult<Vec<u8>> {
        if self.is_offline() {
            return Err(ReplicaError::Offline(self.config.replica_id.clone()));
        }

        let response = match path {
            HELLO_PATH => self.handle_hello(&HelloRequest::decode(body)?).encode()?,
            SUBMIT_PATH => self.handle_submit(SubmitRequest::decode(body)?).encode()?,
            QUERY_PATH => self.handle_query(&QueryValueRequest::decode(body)?).encode()?,
            RECEIPT_PATH => self.handle_receipt(&ReceiptRequest::decode(body)?).encode()?,
            other => return Err(ReplicaError::UnknownPath(other.to_string())),
        };
        Ok(response)
    }

    /// Cuts a block from up to `block_size` queued transactions.
    ///
    /// Returns `None` if nothing is queued.
    pub fn seal_block(&self) -> Option<BlockHeader> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return None;
        }

        let take = state.pending.len().min(self.config.block_size);
        let batch: Vec<DataTxEnvelope> = state.pending.drain(..take).collect();
        let number = state.blocks.len() as u64 + 1;

        let mut written_in_block = HashSet::new();
        let mut validation_info = Vec::with_capacity(batch.len());
        let mut tx_hashes = Vec::with_capacity(batch.len());

        for (index, envelope) in batch.iter().enumerate() {
            let info = self.validate(&state, envelope, &written_in_block);
            if info.flag.is_valid() {
                apply(
                    &mut state,
                    envelope,
                    Version::new(number, index as u64),
                    &mut written_in_block,
                );
            }
            debug!(tx_id = envelope.tx_id(), block = number, flag = %info.flag, "validated");
            validation_info.push(info);
            tx_hashes.push(envelope.payload_bytes().unwrap_or_default());
        }

        let previous_hash = state
            .blocks
            .last()
            .and_then(|h| h.encode().ok())
            .map(|bytes| block_hash(&[&bytes]))
            .unwrap_or_default();
        let parts: Vec<&[u8]> = tx_hashes.iter().map(Vec::as_slice).collect();
        let header = BlockHeader {
            number,
            previous_hash,
            tx_root: block_hash(&parts),
            validation_info,
        };

        for (index, envelope) in batch.iter().enumerate() {
            state.receipts.insert(
                envelope.tx_id().to_string(),
                TxReceipt {
                    header: header.clone(),
                    tx_index: index as u64,
                },
            );
        }
        state.blocks.push(header.clone());
        Some(header)
    }

    /// Cuts blocks until the queue is empty. Returns the number of blocks.
    pub fn seal_all(&self) -> usize {
        let mut sealed = 0;
        while self.seal_block().is_some() {
            sealed += 1;
        }
        sealed
    }

    fn validate(
        &self,
        state: &LedgerState,
        envelope: &DataTxEnvelope,
        written_in_block: &HashSet<(String, String)>,
    ) -> ValidationInfo {
        let payload = &envelope.payload;

        if payload.must_sign_user_ids.is_empty() || payload.db_operations.is_empty() {
            return ValidationInfo::invalid(
                Flag::InvalidIncorrectEntries,
                "transaction has no signers or no operations",
            );
        }

        for op in &payload.db_operations {
            if !state.databases.contains(&op.db_name) {
                return ValidationInfo::invalid(
                    Flag::InvalidDatabaseDoesNotExist,
                    format!("database {} does not exist", op.db_name),
                );
            }
            let written: HashSet<&str> = op.data_writes.iter().map(|w| w.key.as_str()).collect();
            if let Some(d) = op.data_deletes.iter().find(|d| written.contains(d.key.as_str())) {
                return ValidationInfo::invalid(
                    Flag::InvalidIncorrectEntries,
                    format!("key {} is both written and deleted", d.key),
                );
            }
        }

        match envelope.verify_signatures(&self.verifier) {
            Ok(()) => {}
            Err(CryptoError::MissingSignature(user)) => {
                return ValidationInfo::invalid(
                    Flag::InvalidMissingSignature,
                    format!("signature of {} is missing", user),
                );
            }
            Err(e) => {
                return ValidationInfo::invalid(Flag::InvalidUnauthorised, e.to_string());
            }
        }

        for op in &payload.db_operations {
            let keys = op
                .data_writes
                .iter()
                .map(|w| &w.key)
                .chain(op.data_deletes.iter().map(|d| &d.key));
            for key in keys {
                let acl = state
                    .values
                    .get(&(op.db_name.clone(), key.clone()))
                    .and_then(|v| v.metadata.acl.as_ref());
                if let Some(acl) = acl {
                    if !payload.must_sign_user_ids.iter().any(|u| acl.can_write(u)) {
                        return ValidationInfo::invalid(
                            Flag::InvalidNoPermission,
                            format!("no signer has write permission on {}", key),
                        );
                    }
                }
            }
        }

        for op in &payload.db_operations {
            for read in &op.data_reads {
                let tx_key = (op.db_name.clone(), read.key.clone());
                if written_in_block.contains(&tx_key) {
                    return ValidationInfo::invalid(
                        Flag::InvalidMvccConflictWithinBlock,
                        format!(
                            "key {} was written by an earlier transaction in the block",
                            read.key
                        ),
                    );
                }
                let committed = state.values.get(&tx_key).map(|v| v.metadata.version);
                if committed != read.version {
                    return ValidationInfo::invalid(
                        Flag::InvalidMvccConflictWithCommittedState,
                        format!(
                            "key {} read at {} but committed at {}",
                            read.key,
                            describe(read.version),
                            describe(committed)
                        ),
                    );
                }
            }
        }

        ValidationInfo::valid()
    }
}

fn apply(
    state: &mut LedgerState,
    envelope: &DataTxEnvelope,
    version: Version,
    written_in_block: &mut HashSet<(String, String)>,
) {
    for op in &envelope.payload.db_operations {
        for write in &op.data_writes {
            let tx_key = (op.db_name.clone(), write.key.clone());
            state.values.insert(
                tx_key.clone(),
                ValueWithMetadata {
                    value: write.value.clone(),
                    metadata: Metadata {
                        version,
                        acl: write.acl.clone(),
                    },
                },
            );
            written_in_block.insert(tx_key);
        }
        for delete in &op.data_deletes {
            let tx_key = (op.db_name.clone(), delete.key.clone());
            state.values.remove(&tx_key);
            written_in_block.insert(tx_key);
        }
    }
}

fn describe(version: Option<Version>) -> String {
    version.map_or_else(|| "absent".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkv_protocol::{
        AccessControl, DataRead, DataTx, DataWrite, DbOperation, HmacSigner, Signer,
    };
    use std::collections::BTreeMap;

    const ALICE_KEY: &[u8] = b"alice-key";
    const BOB_KEY: &[u8] = b"bob-key";

    fn replica(block_size: usize, auto_seal: bool) -> MemoryReplica {
        MemoryReplica::new(
            ReplicaConfig::new("node1")
                .with_block_size(block_size)
                .with_auto_seal(auto_seal),
        )
        .with_user("alice", ALICE_KEY.to_vec())
        .with_user("bob", BOB_KEY.to_vec())
        .with_database("bdb")
    }

    fn envelope(tx_id: &str, signer: &HmacSigner, op: DbOperation) -> DataTxEnvelope {
        let payload = DataTx {
            tx_id: tx_id.into(),
            must_sign_user_ids: vec![signer.user_id().to_string()],
            db_operations: vec![op],
        };
        let mut signatures = BTreeMap::new();
        signatures.insert(
            signer.user_id().to_string(),
            signer.sign(&payload.encode().unwrap()).unwrap(),
        );
        DataTxEnvelope::new(payload, signatures)
    }

    fn write_op(db: &str, key: &str, value: &[u8], read: Option<Option<Version>>) -> DbOperation {
        let mut op = DbOperation::new(db);
        if let Some(version) = read {
            op.data_reads.push(DataRead {
                key: key.into(),
                version,
            });
        }
        op.data_writes.push(DataWrite {
            key: key.into(),
            value: value.to_vec(),
            acl: None,
        });
        op
    }

    fn flag_of(replica: &MemoryReplica, tx_id: &str) -> Flag {
        match replica
            .handle_receipt(&ReceiptRequest {
                tx_id: tx_id.into(),
            })
            .status
        {
            Some(ReceiptStatus::Ready(receipt)) => receipt.validation().unwrap().flag,
            other => panic!("no receipt for {}: {:?}", tx_id, other),
        }
    }

    fn alice() -> HmacSigner {
        HmacSigner::new("alice", ALICE_KEY.to_vec())
    }

    #[test]
    fn hello_checks_user_and_version() {
        let replica = replica(1, true);
        assert!(replica.handle_hello(&HelloRequest::new("alice")).success);
        assert!(!replica.handle_hello(&HelloRequest::new("mallory")).success);

        let mut old = HelloRequest::new("alice");
        old.protocol_version = 0;
        assert!(!replica.handle_hello(&old).success);
    }

    #[test]
    fn valid_write_is_applied_with_block_version() {
        let replica = replica(1, true);
        let env = envelope("t1", &alice(), write_op("bdb", "k", b"v", None));
        assert!(replica.handle_submit(SubmitRequest { envelope: env }).accepted);

        assert_eq!(flag_of(&replica, "t1"), Flag::Valid);
        let committed = replica.committed("bdb", "k").unwrap();
        assert_eq!(committed.value, b"v");
        assert_eq!(committed.metadata.version, Version::new(1, 0));
    }

    #[test]
    fn duplicate_tx_id_is_rejected() {
        let replica = replica(1, true);
        let env = envelope("t1", &alice(), write_op("bdb", "k", b"v", None));
        assert!(replica.handle_submit(SubmitRequest { envelope: env.clone() }).accepted);
        let second = replica.handle_submit(SubmitRequest { envelope: env });
        assert!(!second.accepted);
        assert_eq!(replica.height(), 1);
    }

    #[test]
    fn stale_read_conflicts_with_committed_state() {
        let replica = replica(1, true);
        let old = replica.seed("bdb", "k", b"old".to_vec());
        let new = replica.seed("bdb", "k", b"new".to_vec());
        assert_ne!(old, new);

        let env = envelope("t1", &alice(), write_op("bdb", "k", b"v", Some(Some(old))));
        replica.handle_submit(SubmitRequest { envelope: env });
        assert_eq!(flag_of(&replica, "t1"), Flag::InvalidMvccConflictWithCommittedState);
        assert_eq!(replica.committed("bdb", "k").unwrap().value, b"new");
    }

    #[test]
    fn same_block_readers_conflict() {
        let replica = replica(2, true);
        for id in ["t1", "t2"] {
            let env = envelope(id, &alice(), write_op("bdb", "k", id.as_bytes(), Some(None)));
            replica.handle_submit(SubmitRequest { envelope: env });
        }

        assert_eq!(replica.height(), 1);
        assert_eq!(flag_of(&replica, "t1"), Flag::Valid);
        assert_eq!(flag_of(&replica, "t2"), Flag::InvalidMvccConflictWithinBlock);
        assert_eq!(replica.committed("bdb", "k").unwrap().value, b"t1");
    }

    #[test]
    fn unknown_database_and_signer() {
        let replica = replica(1, true);
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t1", &alice(), write_op("nodb", "k", b"v", None)),
        });
        assert_eq!(flag_of(&replica, "t1"), Flag::InvalidDatabaseDoesNotExist);

        let forger = HmacSigner::new("alice", b"wrong-key".to_vec());
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t2", &forger, write_op("bdb", "k", b"v", None)),
        });
        assert_eq!(flag_of(&replica, "t2"), Flag::InvalidUnauthorised);
    }

    #[test]
    fn missing_cosigner_signature() {
        let replica = replica(1, true);
        let mut env = envelope("t1", &alice(), write_op("bdb", "k", b"v", None));
        env.payload.must_sign_user_ids.push("bob".into());
        let bytes = env.payload.encode().unwrap();
        env.signatures
            .insert("alice".into(), alice().sign(&bytes).unwrap());

        replica.handle_submit(SubmitRequest { envelope: env });
        assert_eq!(flag_of(&replica, "t1"), Flag::InvalidMissingSignature);
    }

    #[test]
    fn write_acl_is_enforced() {
        let replica = replica(1, true);
        let mut op = write_op("bdb", "k", b"v", None);
        op.data_writes[0].acl = Some(AccessControl::new().with_writer("alice"));
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t1", &alice(), op),
        });
        assert_eq!(flag_of(&replica, "t1"), Flag::Valid);

        let bob = HmacSigner::new("bob", BOB_KEY.to_vec());
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t2", &bob, write_op("bdb", "k", b"x", None)),
        });
        assert_eq!(flag_of(&replica, "t2"), Flag::InvalidNoPermission);

        let query = replica.handle_query(&QueryValueRequest {
            user_id: "bob".into(),
            db_name: "bdb".into(),
            key: "k".into(),
        });
        assert!(matches!(query.lookup, ValueLookup::Failed(_)));
    }

    #[test]
    fn reader_only_acl_freezes_the_key() {
        let replica = replica(1, true);
        let mut op = write_op("bdb", "k", b"v", None);
        op.data_writes[0].acl = Some(AccessControl::new().with_reader("bob"));
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t1", &alice(), op),
        });
        assert_eq!(flag_of(&replica, "t1"), Flag::Valid);

        replica.handle_submit(SubmitRequest {
            envelope: envelope("t2", &alice(), write_op("bdb", "k", b"x", None)),
        });
        assert_eq!(flag_of(&replica, "t2"), Flag::InvalidNoPermission);
        assert_eq!(replica.committed("bdb", "k").unwrap().value, b"v");
    }

    #[test]
    fn manual_sealing_keeps_receipts_pending() {
        let replica = replica(4, false);
        replica.handle_submit(SubmitRequest {
            envelope: envelope("t1", &alice(), write_op("bdb", "k", b"v", None)),
        });

        let pending = replica.handle_receipt(&ReceiptRequest { tx_id: "t1".into() });
        assert_eq!(pending.status, Some(ReceiptStatus::Pending));
        assert_eq!(replica.pending_count(), 1);

        assert_eq!(replica.seal_all(), 1);
        assert_eq!(flag_of(&replica, "t1"), Flag::Valid);
        assert!(replica.seal_block().is_none());
    }

    #[test]
    fn blocks_are_hash_chained() {
        let replica = replica(1, true);
        for id in ["t1", "t2"] {
            replica.handle_submit(SubmitRequest {
                envelope: envelope(id, &alice(), write_op("bdb", id, b"v", None)),
            });
        }
        let blocks = replica.blocks();
        assert!(blocks[0].previous_hash.is_empty());
        assert_eq!(
            blocks[1].previous_hash,
            block_hash(&[&blocks[0].encode().unwrap()])
        );
    }

    #[test]
    fn post_dispatch_and_offline() {
        let replica = replica(1, true);
        let body = HelloRequest::new("alice").encode().unwrap();
        let response = HelloResponse::decode(&replica.handle_post(HELLO_PATH, &body).unwrap()).unwrap();
        assert!(response.success);

        assert!(matches!(
            replica.handle_post("/ledger/unknown", &body),
            Err(ReplicaError::UnknownPath(_))
        ));
        assert!(matches!(
            replica.handle_post(SUBMIT_PATH, &[0xff]),
            Err(ReplicaError::Codec(_))
        ));

        replica.set_offline(true);
        assert!(matches!(
            replica.handle_post(HELLO_PATH, &body),
            Err(ReplicaError::Offline(_))
        ));
    }
}
