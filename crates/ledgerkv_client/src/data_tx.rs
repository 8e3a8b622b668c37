//! Data transactions: a read-set, a write-set and a status.

use crate::commit::{CommitCoordinator, CommitOutcome};
use crate::error::{ClientError, ClientResult};
use crate::session::{Session, SessionInner};
use crate::transport::ReplicaConnector;
use ledgerkv_protocol::{
    AccessControl, DataDelete, DataRead, DataWrite, DbOperation, Signer, ValueWithMetadata,
    Version,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Lifecycle of a data transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Accepting reads and writes.
    Open,
    /// Being frozen, signed and submitted.
    Committing,
    /// Accepted by the replica set for ordering.
    Committed,
    /// Signing or submission failed.
    Failed,
    /// Discarded by the application.
    Aborted,
}

impl TxStatus {
    /// Returns true if the transaction accepts operations.
    pub fn is_open(&self) -> bool {
        matches!(self, TxStatus::Open)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Open => "open",
            TxStatus::Committing => "committing",
            TxStatus::Committed => "committed",
            TxStatus::Failed => "failed",
            TxStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A pending change in the write-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Store a value.
    Put {
        /// New value.
        value: Vec<u8>,
        /// Access control to attach.
        acl: Option<AccessControl>,
    },
    /// Remove the key.
    Delete,
}

/// A read recorded in the read-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    /// Committed version seen at first read; `None` if the key was absent.
    pub version: Option<Version>,
    /// Value seen at first read.
    pub observed: Option<ValueWithMetadata>,
}

/// A value as seen from inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxValue {
    /// The value.
    pub value: Vec<u8>,
    /// Committed version, or `None` for a value buffered in the write-set.
    pub version: Option<Version>,
    /// Access control of the value.
    pub acl: Option<AccessControl>,
}

impl From<ValueWithMetadata> for TxValue {
    fn from(v: ValueWithMetadata) -> Self {
        Self {
            value: v.value,
            version: Some(v.metadata.version),
            acl: v.metadata.acl,
        }
    }
}

/// Key of the read-set and write-set: (database, key).
pub type TxKey = (String, String);

/// A data transaction.
///
/// Reads are pinned at first read: later reads of the same key return the
/// first observation and never change the recorded version. Writes to the
/// same key collapse to the last one. Once the transaction leaves
/// [`TxStatus::Open`] every operation fails with
/// [`ClientError::TxState`].
pub struct DataTx<C: ReplicaConnector> {
    pub(crate) session: Arc<SessionInner<C>>,
    pub(crate) status: TxStatus,
    pub(crate) reads: BTreeMap<TxKey, ReadEntry>,
    pub(crate) writes: BTreeMap<TxKey, PendingWrite>,
    pub(crate) must_sign: BTreeSet<String>,
    pub(crate) cosigners: Vec<Arc<dyn Signer>>,
    pub(crate) tx_id: Option<String>,
}

impl<C: ReplicaConnector> DataTx<C> {
    pub(crate) fn new(session: Arc<SessionInner<C>>) -> Self {
        Self {
            session,
            status: TxStatus::Open,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            must_sign: BTreeSet::new(),
            cosigners: Vec::new(),
            tx_id: None,
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Returns the transaction id, known once submission succeeded.
    pub fn tx_id(&self) -> Option<&str> {
        self.tx_id.as_deref()
    }

    /// Returns the read-set.
    pub fn read_set(&self) -> &BTreeMap<TxKey, ReadEntry> {
        &self.reads
    }

    /// Returns the write-set.
    pub fn write_set(&self) -> &BTreeMap<TxKey, PendingWrite> {
        &self.writes
    }

    /// Buffers a write.
    pub fn put(
        &mut self,
        db_name: &str,
        key: &str,
        value: impl Into<Vec<u8>>,
        acl: Option<AccessControl>,
    ) -> ClientResult<()> {
        self.ensure_open()?;
        let tx_key = tx_key(db_name, key)?;
        self.writes.insert(
            tx_key,
            PendingWrite::Put {
                value: value.into(),
                acl,
            },
        );
        Ok(())
    }

    /// Buffers a delete.
    pub fn delete(&mut self, db_name: &str, key: &str) -> ClientResult<()> {
        self.ensure_open()?;
        let tx_key = tx_key(db_name, key)?;
        self.writes.insert(tx_key, PendingWrite::Delete);
        Ok(())
    }

    /// Reads a key.
    ///
    /// A key in the write-set returns the buffered value (`None` for a
    /// buffered delete) without contacting the replica set. A key already
    /// in the read-set returns the first observation. Otherwise the
    /// committed value is fetched and its version recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Query`] if the committed value cannot be
    /// fetched. A missing key is `Ok(None)`.
    pub fn get(&mut self, db_name: &str, key: &str) -> ClientResult<Option<TxValue>> {
        self.ensure_open()?;
        let tx_key = tx_key(db_name, key)?;

        if let Some(write) = self.writes.get(&tx_key) {
            return Ok(match write {
                PendingWrite::Put { value, acl } => Some(TxValue {
                    value: value.clone(),
                    version: None,
                    acl: acl.clone(),
                }),
                PendingWrite::Delete => None,
            });
        }

        if let Some(read) = self.reads.get(&tx_key) {
            return Ok(read.observed.clone().map(TxValue::from));
        }

        let observed =
            self.session
                .connector
                .query_value(self.session.signer.user_id(), db_name, key)?;
        let version = observed.as_ref().map(|v| v.metadata.version);
        trace!(db = db_name, key, ?version, "recorded read");

        self.reads.insert(
            tx_key,
            ReadEntry {
                version,
                observed: observed.clone(),
            },
        );
        Ok(observed.map(TxValue::from))
    }

    /// Requires `user_id` to sign the transaction.
    ///
    /// The replica set rejects the transaction unless a co-signer for the
    /// user is attached with [`DataTx::add_cosigner`].
    pub fn add_must_sign_user(&mut self, user_id: &str) -> ClientResult<()> {
        self.ensure_open()?;
        if user_id.is_empty() {
            return Err(ClientError::InvalidArgument("user id is empty".into()));
        }
        self.must_sign.insert(user_id.to_string());
        Ok(())
    }

    /// Attaches a co-signer whose signature is added at commit.
    pub fn add_cosigner(&mut self, signer: Arc<dyn Signer>) -> ClientResult<()> {
        self.add_must_sign_user(signer.user_id())?;
        self.cosigners.push(signer);
        Ok(())
    }

    /// Discards the transaction.
    pub fn abort(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        self.status = TxStatus::Aborted;
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// With `wait_for_commit` the call blocks until the receipt arrives or
    /// the session's poll timeout passes. An INVALID verdict is returned as
    /// a successful outcome.
    pub fn commit(&mut self, wait_for_commit: bool) -> ClientResult<CommitOutcome> {
        CommitCoordinator::new(Session::from_inner(Arc::clone(&self.session)))
            .commit(self, wait_for_commit)
    }

    pub(crate) fn ensure_open(&self) -> ClientResult<()> {
        self.session.ensure_open()?;
        if !self.status.is_open() {
            return Err(ClientError::tx_state(format!(
                "transaction is {}",
                self.status
            )));
        }
        Ok(())
    }

    /// Groups the read-set and write-set per database, ordered by name.
    pub(crate) fn db_operations(&self) -> Vec<DbOperation> {
        let mut ops: BTreeMap<&str, DbOperation> = BTreeMap::new();

        for ((db, key), read) in &self.reads {
            ops.entry(db.as_str())
                .or_insert_with(|| DbOperation::new(db.as_str()))
                .data_reads
                .push(DataRead {
                    key: key.clone(),
                    version: read.version,
                });
        }

        for ((db, key), write) in &self.writes {
            let op = ops
                .entry(db.as_str())
                .or_insert_with(|| DbOperation::new(db.as_str()));
            match write {
                PendingWrite::Put { value, acl } => op.data_writes.push(DataWrite {
                    key: key.clone(),
                    value: value.clone(),
                    acl: acl.clone(),
                }),
                PendingWrite::Delete => op.data_deletes.push(DataDelete { key: key.clone() }),
            }
        }

        ops.into_values().collect()
    }
}

impl<C: ReplicaConnector> fmt::Debug for DataTx<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTx")
            .field("status", &self.status)
            .field("tx_id", &self.tx_id)
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

fn tx_key(db_name: &str, key: &str) -> ClientResult<TxKey> {
    if db_name.is_empty() {
        return Err(ClientError::InvalidArgument("database name is empty".into()));
    }
    if key.is_empty() {
        return Err(ClientError::InvalidArgument("key is empty".into()));
    }
    Ok((db_name.to_string(), key.to_string()))
}
