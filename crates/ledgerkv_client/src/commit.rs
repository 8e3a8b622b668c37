//! Freezing, signing and submitting transactions.

use crate::data_tx::{DataTx, TxStatus};
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use crate::transport::ReplicaConnector;
use crate::validation::{ReceiptExt, Verdict};
use ledgerkv_protocol::{CborMessage, DataTx as TxPayload, DataTxEnvelope, Signer, TxReceipt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Transaction id acknowledged by the replica set.
    pub tx_id: String,
    /// Receipt, present only for a synchronous commit.
    pub receipt: Option<TxReceipt>,
    /// The signed envelope that was submitted.
    pub envelope: DataTxEnvelope,
}

impl CommitOutcome {
    /// Returns the verdict carried by the receipt, if one was awaited.
    pub fn verdict(&self) -> Option<ClientResult<Verdict>> {
        self.receipt.as_ref().map(ReceiptExt::verdict)
    }
}

/// Turns an open transaction into a signed envelope and submits it.
///
/// Conflicts are never detected locally: the replica set decides, and an
/// INVALID verdict comes back as a successful commit carrying that verdict.
pub struct CommitCoordinator<C: ReplicaConnector> {
    session: Session<C>,
}

impl<C: ReplicaConnector> CommitCoordinator<C> {
    /// Creates a coordinator for transactions of `session`.
    pub fn new(session: Session<C>) -> Self {
        Self { session }
    }

    /// Commits `tx`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::TxState`] if the transaction is not open or has an
    ///   empty write-set. Nothing is submitted and the status is unchanged.
    /// - [`ClientError::Encoding`] or [`ClientError::Signing`] if the
    ///   envelope cannot be built; the transaction becomes
    ///   [`TxStatus::Failed`].
    /// - [`ClientError::Submission`] if the replica set does not accept the
    ///   envelope; the transaction becomes [`TxStatus::Failed`].
    /// - [`ClientError::Timeout`] if `wait_for_commit` is set and no receipt
    ///   arrives in time. The transaction stays [`TxStatus::Committed`]
    ///   and its id remains available.
    pub fn commit(&self, tx: &mut DataTx<C>, wait_for_commit: bool) -> ClientResult<CommitOutcome> {
        let inner = self.session.inner();
        if !Arc::ptr_eq(inner, &tx.session) {
            return Err(ClientError::InvalidArgument(
                "transaction belongs to another session".into(),
            ));
        }

        tx.ensure_open()?;
        if tx.writes.is_empty() {
            return Err(ClientError::tx_state("transaction has no writes to commit"));
        }
        tx.status = TxStatus::Committing;

        let envelope = match self.seal(tx) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to seal transaction");
                tx.status = TxStatus::Failed;
                inner.stats.write().signing_failures += 1;
                return Err(e);
            }
        };

        let tx_id = match inner.connector.submit(&envelope) {
            Ok(tx_id) => tx_id,
            Err(e) => {
                debug!(tx_id = envelope.tx_id(), error = %e, "submission failed");
                tx.status = TxStatus::Failed;
                inner.stats.write().submission_failures += 1;
                return Err(e);
            }
        };

        tx.status = TxStatus::Committed;
        tx.tx_id = Some(tx_id.clone());
        inner.stats.write().commits_submitted += 1;
        debug!(
            tx_id = %tx_id,
            writes = envelope.payload.write_count(),
            reads = envelope.payload.read_count(),
            wait_for_commit,
            "transaction submitted"
        );

        let receipt = if wait_for_commit {
            Some(inner.await_receipt(&tx_id, &inner.config.poll, None)?)
        } else {
            None
        };

        Ok(CommitOutcome {
            tx_id,
            receipt,
            envelope,
        })
    }

    fn seal(&self, tx: &DataTx<C>) -> ClientResult<DataTxEnvelope> {
        let signer = &self.session.inner().signer;

        let mut must_sign = tx.must_sign.clone();
        must_sign.insert(signer.user_id().to_string());

        let payload = TxPayload {
            tx_id: uuid::Uuid::new_v4().simple().to_string(),
            must_sign_user_ids: must_sign.into_iter().collect(),
            db_operations: tx.db_operations(),
        };
        let bytes = payload.encode()?;

        let mut signatures = BTreeMap::new();
        let signers = std::iter::once(signer).chain(tx.cosigners.iter());
        for s in signers {
            signatures.insert(s.user_id().to_string(), sign(&**s, &bytes)?);
        }

        Ok(DataTxEnvelope::new(payload, signatures))
    }
}

fn sign(signer: &dyn Signer, bytes: &[u8]) -> ClientResult<Vec<u8>> {
    Ok(signer.sign(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollConfig, SessionConfig};
    use crate::transport::MockConnector;
    use ledgerkv_protocol::{Flag, HmacSigner, HmacVerifier, ValidationInfo};
    use std::time::Duration;

    fn session_with(config: SessionConfig) -> Session<MockConnector> {
        let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new("alice", b"alice-key".to_vec()));
        Session::open(MockConnector::new(), signer, config).unwrap()
    }

    fn session() -> Session<MockConnector> {
        session_with(SessionConfig::new().with_poll(PollConfig::new(
            Duration::from_millis(2),
            Duration::from_millis(50),
        )))
    }

    #[test]
    fn empty_write_set_is_rejected_without_submission() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.get("db", "k").unwrap();

        let err = tx.commit(true).unwrap_err();
        assert!(matches!(err, ClientError::TxState(_)));
        assert_eq!(session.connector().submission_count(), 0);
        assert_eq!(tx.status(), TxStatus::Open);
        assert!(tx.tx_id().is_none());
    }

    #[test]
    fn async_commit_returns_id_without_receipt() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();

        let outcome = tx.commit(false).unwrap();
        assert!(outcome.receipt.is_none());
        assert!(outcome.verdict().is_none());
        assert_eq!(outcome.tx_id.len(), 32);
        assert_eq!(tx.status(), TxStatus::Committed);
        assert_eq!(tx.tx_id(), Some(outcome.tx_id.as_str()));
        assert_eq!(session.connector().receipt_query_count(), 0);
    }

    #[test]
    fn envelope_is_signed_by_submitter() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        let outcome = tx.commit(false).unwrap();

        let envelope = &session.connector().submitted()[0];
        assert_eq!(envelope, &outcome.envelope);
        assert_eq!(envelope.payload.must_sign_user_ids, vec!["alice".to_string()]);

        let verifier = HmacVerifier::new().with_user("alice", b"alice-key".to_vec());
        envelope.verify_signatures(&verifier).unwrap();
    }

    #[test]
    fn cosigners_sign_the_same_payload() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        tx.add_cosigner(Arc::new(HmacSigner::new("bob", b"bob-key".to_vec())))
            .unwrap();
        let outcome = tx.commit(false).unwrap();

        assert_eq!(
            outcome.envelope.payload.must_sign_user_ids,
            vec!["alice".to_string(), "bob".to_string()]
        );
        let verifier = HmacVerifier::new()
            .with_user("alice", b"alice-key".to_vec())
            .with_user("bob", b"bob-key".to_vec());
        outcome.envelope.verify_signatures(&verifier).unwrap();
    }

    #[test]
    fn sync_commit_returns_invalid_verdict_as_success() {
        let session = session();
        session.connector().auto_validate(ValidationInfo::invalid(
            Flag::InvalidMvccConflictWithCommittedState,
            "key k changed",
        ));

        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        let outcome = tx.commit(true).unwrap();

        let verdict = outcome.verdict().unwrap().unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "key k changed");
        assert_eq!(session.stats().invalid, 1);
    }

    #[test]
    fn sync_commit_timeout_keeps_tx_id() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();

        let err = tx.commit(true).unwrap_err();
        let tx_id = err.tx_id().unwrap().to_string();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(tx.status(), TxStatus::Committed);
        assert_eq!(tx.tx_id(), Some(tx_id.as_str()));
        assert_eq!(session.stats().timeouts, 1);
    }

    #[test]
    fn submission_failure_marks_tx_failed() {
        let session = session();
        session
            .connector()
            .fail_submissions(Some(ClientError::submission_retryable("connection reset")));

        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        let err = tx.commit(true).unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(tx.status(), TxStatus::Failed);
        assert!(tx.tx_id().is_none());
        assert_eq!(session.stats().submission_failures, 1);
        assert_eq!(session.stats().signing_failures, 0);
        assert!(matches!(tx.commit(false), Err(ClientError::TxState(_))));
    }

    #[test]
    fn signing_failure_marks_tx_failed() {
        let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new("alice", Vec::new()));
        let session =
            Session::open(MockConnector::new(), signer, SessionConfig::new()).unwrap();

        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        let err = tx.commit(false).unwrap_err();

        assert!(matches!(err, ClientError::Signing(_)));
        assert!(!err.is_retryable());
        assert_eq!(tx.status(), TxStatus::Failed);
        assert_eq!(session.connector().submission_count(), 0);

        let stats = session.stats();
        assert_eq!(stats.signing_failures, 1);
        assert_eq!(stats.submission_failures, 0);
    }

    #[test]
    fn committed_tx_rejects_second_commit() {
        let session = session();
        let mut tx = session.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        tx.commit(false).unwrap();

        assert!(matches!(tx.commit(false), Err(ClientError::TxState(_))));
        assert!(matches!(
            tx.put("db", "k2", b"v".to_vec(), None),
            Err(ClientError::TxState(_))
        ));
        assert_eq!(session.connector().submission_count(), 1);
    }

    #[test]
    fn coordinator_rejects_foreign_transaction() {
        let first = session();
        let second = session();
        let mut tx = second.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();

        let coordinator = CommitCoordinator::new(first.clone());
        assert!(matches!(
            coordinator.commit(&mut tx, false),
            Err(ClientError::InvalidArgument(_))
        ));
        assert_eq!(tx.status(), TxStatus::Open);
    }

    #[test]
    fn transaction_ids_are_unique() {
        let session = session();
        let mut ids = std::collections::HashSet::new();
        for i in 0..20 {
            let mut tx = session.data_tx().unwrap();
            tx.put("db", &format!("k{}", i), b"v".to_vec(), None).unwrap();
            ids.insert(tx.commit(false).unwrap().tx_id);
        }
        assert_eq!(ids.len(), 20);
    }
}
