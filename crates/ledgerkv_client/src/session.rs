//! Sessions against a replica set.

use crate::config::{PollConfig, SessionConfig};
use crate::data_tx::DataTx;
use crate::error::{ClientError, ClientResult};
use crate::poller::{CancelToken, ReceiptPoller};
use crate::transport::ReplicaConnector;
use crate::validation::interpret;
use ledgerkv_protocol::{HelloRequest, Signer, TxReceipt, PROTOCOL_VERSION};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Statistics about a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Transactions handed out by [`Session::data_tx`].
    pub transactions_started: u64,
    /// Envelopes accepted by the replica set.
    pub commits_submitted: u64,
    /// Commits whose envelope could not be encoded or signed.
    pub signing_failures: u64,
    /// Commits the replica set did not accept.
    pub submission_failures: u64,
    /// Receipts obtained, synchronously or by lookup.
    pub receipts_obtained: u64,
    /// Receipts whose verdict was VALID.
    pub valid: u64,
    /// Receipts whose verdict was not VALID.
    pub invalid: u64,
    /// Receipt waits that hit their deadline.
    pub timeouts: u64,
}

pub(crate) struct SessionInner<C: ReplicaConnector> {
    pub(crate) connector: Arc<C>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) config: SessionConfig,
    pub(crate) replica_id: String,
    pub(crate) stats: RwLock<SessionStats>,
    owns_connector: bool,
    closed: AtomicBool,
}

impl<C: ReplicaConnector> SessionInner<C> {
    pub(crate) fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("session is closed".into()));
        }
        Ok(())
    }

    pub(crate) fn await_receipt(
        &self,
        tx_id: &str,
        poll: &PollConfig,
        cancel: Option<&CancelToken>,
    ) -> ClientResult<TxReceipt> {
        let result =
            ReceiptPoller::new(self.connector.as_ref(), poll.clone()).await_receipt(tx_id, cancel);
        match &result {
            Ok(receipt) => self.record_receipt(receipt),
            Err(ClientError::Timeout { .. }) => self.stats.write().timeouts += 1,
            Err(_) => {}
        }
        result
    }

    pub(crate) fn record_receipt(&self, receipt: &TxReceipt) {
        let mut stats = self.stats.write();
        stats.receipts_obtained += 1;
        if let Ok(info) = receipt.validation() {
            if interpret(info).is_valid {
                stats.valid += 1;
            } else {
                stats.invalid += 1;
            }
        }
    }
}

/// A session bound to one user identity and one replica set.
///
/// Sessions are cheap to clone and can be shared between threads; every
/// thread may run its own [`DataTx`].
pub struct Session<C: ReplicaConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: ReplicaConnector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ReplicaConnector> Session<C> {
    /// Opens a session.
    ///
    /// Checks that the replica set is reachable and accepts the user.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the replica set cannot be
    /// reached or refuses the session, and
    /// [`ClientError::VersionMismatch`] if it speaks another protocol
    /// version.
    pub fn open(connector: C, signer: Arc<dyn Signer>, config: SessionConfig) -> ClientResult<Self> {
        Self::connect(Arc::new(connector), signer, config, true)
    }

    /// Opens a session over a connector shared with other sessions.
    ///
    /// Closing the session leaves the connector open; its owner closes it.
    pub fn open_shared(
        connector: Arc<C>,
        signer: Arc<dyn Signer>,
        config: SessionConfig,
    ) -> ClientResult<Self> {
        Self::connect(connector, signer, config, false)
    }

    fn connect(
        connector: Arc<C>,
        signer: Arc<dyn Signer>,
        config: SessionConfig,
        owns_connector: bool,
    ) -> ClientResult<Self> {
        let user_id = signer.user_id().to_string();
        if user_id.is_empty() {
            return Err(ClientError::InvalidArgument("user id is empty".into()));
        }
        if !connector.is_connected() {
            return Err(ClientError::Connection("connector is not connected".into()));
        }

        let response = connector.hello(&HelloRequest::new(user_id.clone()))?;
        if !response.success {
            return Err(ClientError::Connection(
                response
                    .error
                    .unwrap_or_else(|| "session refused".into()),
            ));
        }
        if response.protocol_version != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: response.protocol_version,
            });
        }

        info!(user = %user_id, replica = %response.replica_id, "session opened");

        Ok(Self {
            inner: Arc::new(SessionInner {
                connector,
                signer,
                config,
                replica_id: response.replica_id,
                stats: RwLock::new(SessionStats::default()),
                owns_connector,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner<C>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner<C>> {
        &self.inner
    }

    /// Returns the session user id.
    pub fn user_id(&self) -> &str {
        self.inner.signer.user_id()
    }

    /// Returns the id of the replica that accepted the session.
    pub fn replica_id(&self) -> &str {
        &self.inner.replica_id
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Starts a new data transaction.
    pub fn data_tx(&self) -> ClientResult<DataTx<C>> {
        self.inner.ensure_open()?;
        self.inner.stats.write().transactions_started += 1;
        Ok(DataTx::new(Arc::clone(&self.inner)))
    }

    /// Looks up a receipt once, without waiting. `Ok(None)` means the
    /// transaction has not been ordered yet.
    pub fn receipt(&self, tx_id: &str) -> ClientResult<Option<TxReceipt>> {
        self.inner.ensure_open()?;
        let receipt = ReceiptPoller::new(self.inner.connector.as_ref(), self.inner.config.poll.clone())
            .poll_once(tx_id)?;
        if let Some(receipt) = &receipt {
            self.inner.record_receipt(receipt);
        }
        Ok(receipt)
    }

    /// Waits for the receipt of a transaction using the session's poll
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] if no receipt arrives in time; the
    /// transaction may still commit later.
    pub fn await_receipt(&self, tx_id: &str) -> ClientResult<TxReceipt> {
        self.inner.ensure_open()?;
        debug!(tx_id, "awaiting receipt");
        self.inner
            .await_receipt(tx_id, &self.inner.config.poll, None)
    }

    /// Waits for a receipt with an explicit poll configuration and an
    /// optional cancel token.
    pub fn await_receipt_with_cancel(
        &self,
        tx_id: &str,
        poll: &PollConfig,
        cancel: Option<&CancelToken>,
    ) -> ClientResult<TxReceipt> {
        self.inner.ensure_open()?;
        self.inner.await_receipt(tx_id, poll, cancel)
    }

    /// Returns a snapshot of the session statistics.
    pub fn stats(&self) -> SessionStats {
        self.inner.stats.read().clone()
    }

    /// Closes the session, and its connector unless the session was opened
    /// with [`Session::open_shared`].
    ///
    /// Transactions still open on the session fail on their next operation.
    pub fn close(&self) -> ClientResult<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(user = %self.user_id(), "session closed");
            if self.inner.owns_connector {
                self.inner.connector.close()?;
            }
        }
        Ok(())
    }

    /// Returns true once [`Session::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnector;
    use ledgerkv_protocol::{BlockHeader, Flag, HelloResponse, HmacSigner, ValidationInfo};
    use std::time::Duration;

    fn signer() -> Arc<dyn Signer> {
        Arc::new(HmacSigner::new("alice", b"alice-key".to_vec()))
    }

    fn receipt(info: ValidationInfo) -> TxReceipt {
        TxReceipt {
            header: BlockHeader {
                number: 1,
                previous_hash: Vec::new(),
                tx_root: Vec::new(),
                validation_info: vec![info],
            },
            tx_index: 0,
        }
    }

    #[test]
    fn open_session() {
        let session = Session::open(MockConnector::new(), signer(), SessionConfig::new()).unwrap();
        assert_eq!(session.user_id(), "alice");
        assert_eq!(session.replica_id(), "mock");
        assert!(!session.is_closed());
    }

    #[test]
    fn open_disconnected_fails() {
        let connector = MockConnector::new();
        connector.set_connected(false);
        let result = Session::open(connector, signer(), SessionConfig::new());
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[test]
    fn open_refused_fails() {
        let connector = MockConnector::new();
        connector.set_hello_response(Some(HelloResponse::error("node1", "unknown user")));
        let result = Session::open(connector, signer(), SessionConfig::new());
        match result {
            Err(ClientError::Connection(message)) => assert_eq!(message, "unknown user"),
            _ => panic!("expected connection error"),
        }
    }

    #[test]
    fn open_version_mismatch() {
        let connector = MockConnector::new();
        let mut hello = HelloResponse::success("node1");
        hello.protocol_version = PROTOCOL_VERSION + 1;
        connector.set_hello_response(Some(hello));
        let result = Session::open(connector, signer(), SessionConfig::new());
        assert!(matches!(result, Err(ClientError::VersionMismatch { .. })));
    }

    #[test]
    fn open_requires_user_id() {
        let anonymous: Arc<dyn Signer> = Arc::new(HmacSigner::new("", b"k".to_vec()));
        let result = Session::open(MockConnector::new(), anonymous, SessionConfig::new());
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[test]
    fn closed_session_rejects_work() {
        let session = Session::open(MockConnector::new(), signer(), SessionConfig::new()).unwrap();
        session.close().unwrap();
        session.close().unwrap();

        assert!(session.is_closed());
        assert!(!session.connector().is_connected());
        assert!(matches!(session.data_tx(), Err(ClientError::Connection(_))));
        assert!(matches!(session.receipt("tx"), Err(ClientError::Connection(_))));
    }

    #[test]
    fn closing_a_shared_session_spares_its_siblings() {
        let connector = Arc::new(MockConnector::new());
        let bob: Arc<dyn Signer> = Arc::new(HmacSigner::new("bob", b"bob-key".to_vec()));
        let first =
            Session::open_shared(Arc::clone(&connector), signer(), SessionConfig::new()).unwrap();
        let second =
            Session::open_shared(Arc::clone(&connector), bob, SessionConfig::new()).unwrap();

        first.close().unwrap();
        assert!(first.is_closed());
        assert!(connector.is_connected());

        let mut tx = second.data_tx().unwrap();
        tx.put("db", "k", b"v".to_vec(), None).unwrap();
        assert!(tx.commit(false).is_ok());

        second.close().unwrap();
        assert!(connector.is_connected());
        connector.close().unwrap();
        assert!(!connector.is_connected());
    }

    #[test]
    fn receipt_lookup_updates_stats() {
        let session = Session::open(MockConnector::new(), signer(), SessionConfig::new()).unwrap();
        assert!(session.receipt("tx-1").unwrap().is_none());

        session.connector().set_receipt("tx-1", receipt(ValidationInfo::valid()));
        session.connector().set_receipt(
            "tx-2",
            receipt(ValidationInfo::invalid(Flag::InvalidNoPermission, "denied")),
        );
        assert!(session.receipt("tx-1").unwrap().is_some());
        assert!(session.await_receipt("tx-2").is_ok());

        let stats = session.stats();
        assert_eq!(stats.receipts_obtained, 2);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.invalid, 1);
    }

    #[test]
    fn timeout_is_counted() {
        let config = SessionConfig::new().with_poll(PollConfig::new(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ));
        let session = Session::open(MockConnector::new(), signer(), config).unwrap();

        let err = session.await_receipt("missing").unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(session.stats().timeouts, 1);
    }

    #[test]
    fn session_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Session<MockConnector>>();
    }
}
