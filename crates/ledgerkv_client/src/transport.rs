//! Connector abstraction over the replica set.

use crate::error::{ClientError, ClientResult};
use ledgerkv_protocol::{
    BlockHeader, DataTxEnvelope, HelloRequest, HelloResponse, ReceiptStatus, TxReceipt,
    ValidationInfo, ValueWithMetadata,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// A replica connector carries requests from a session to the replica set.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
pub trait ReplicaConnector: Send + Sync {
    /// Opens the session with a replica.
    fn hello(&self, request: &HelloRequest) -> ClientResult<HelloResponse>;

    /// Submits a signed envelope for ordering and returns the acknowledged
    /// transaction id.
    fn submit(&self, envelope: &DataTxEnvelope) -> ClientResult<String>;

    /// Reads the committed value of a key. `Ok(None)` means the key does not
    /// exist.
    fn query_value(
        &self,
        user_id: &str,
        db_name: &str,
        key: &str,
    ) -> ClientResult<Option<ValueWithMetadata>>;

    /// Looks up the receipt of a transaction.
    fn query_receipt(&self, tx_id: &str) -> ClientResult<ReceiptStatus>;

    /// Checks if the connector is connected.
    fn is_connected(&self) -> bool;

    /// Closes the connector.
    fn close(&self) -> ClientResult<()>;
}

/// A mock connector for testing.
///
/// Submissions are recorded. With [`MockConnector::auto_validate`] every
/// accepted submission immediately gets a single-transaction block receipt
/// carrying the configured verdict.
#[derive(Debug)]
pub struct MockConnector {
    connected: AtomicBool,
    hello_response: Mutex<Option<HelloResponse>>,
    values: Mutex<HashMap<(String, String), ValueWithMetadata>>,
    receipts: Mutex<HashMap<String, TxReceipt>>,
    submitted: Mutex<Vec<DataTxEnvelope>>,
    auto_verdict: Mutex<Option<ValidationInfo>>,
    submit_failure: Mutex<Option<ClientError>>,
    query_failure: Mutex<Option<String>>,
    receipt_failure: Mutex<Option<String>>,
    receipt_queries: AtomicUsize,
    next_block: AtomicU64,
}

impl MockConnector {
    /// Creates a new connected mock connector that answers hello with
    /// replica id `mock`.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            hello_response: Mutex::new(Some(HelloResponse::success("mock"))),
            values: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            auto_verdict: Mutex::new(None),
            submit_failure: Mutex::new(None),
            query_failure: Mutex::new(None),
            receipt_failure: Mutex::new(None),
            receipt_queries: AtomicUsize::new(0),
            next_block: AtomicU64::new(1),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Sets the hello response. `None` makes hello fail.
    pub fn set_hello_response(&self, response: Option<HelloResponse>) {
        *self.hello_response.lock() = response;
    }

    /// Stores a committed value.
    pub fn set_value(&self, db_name: &str, key: &str, value: ValueWithMetadata) {
        self.values
            .lock()
            .insert((db_name.to_string(), key.to_string()), value);
    }

    /// Makes a receipt available for a transaction.
    pub fn set_receipt(&self, tx_id: &str, receipt: TxReceipt) {
        self.receipts.lock().insert(tx_id.to_string(), receipt);
    }

    /// Answers every later submission with a receipt carrying `info`.
    pub fn auto_validate(&self, info: ValidationInfo) {
        *self.auto_verdict.lock() = Some(info);
    }

    /// Makes submissions fail with `error`, or succeed again with `None`.
    pub fn fail_submissions(&self, error: Option<ClientError>) {
        *self.submit_failure.lock() = error;
    }

    /// Makes value queries fail with `message`, or succeed again with `None`.
    pub fn fail_queries(&self, message: Option<String>) {
        *self.query_failure.lock() = message;
    }

    /// Makes receipt lookups fail with `message`, or succeed again with
    /// `None`.
    pub fn fail_receipts(&self, message: Option<String>) {
        *self.receipt_failure.lock() = message;
    }

    /// Returns the envelopes submitted so far.
    pub fn submitted(&self) -> Vec<DataTxEnvelope> {
        self.submitted.lock().clone()
    }

    /// Returns the number of accepted submissions.
    pub fn submission_count(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Returns the number of receipt lookups served.
    pub fn receipt_query_count(&self) -> usize {
        self.receipt_queries.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::Connection("not connected".into()))
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaConnector for MockConnector {
    fn hello(&self, _request: &HelloRequest) -> ClientResult<HelloResponse> {
        self.ensure_connected()?;
        self.hello_response
            .lock()
            .clone()
            .ok_or_else(|| ClientError::Connection("no mock hello response set".into()))
    }

    fn submit(&self, envelope: &DataTxEnvelope) -> ClientResult<String> {
        if !self.is_connected() {
            return Err(ClientError::submission_retryable("not connected"));
        }
        if let Some(error) = self.submit_failure.lock().take() {
            return Err(error);
        }

        let tx_id = envelope.tx_id().to_string();
        self.submitted.lock().push(envelope.clone());

        if let Some(info) = self.auto_verdict.lock().clone() {
            let number = self.next_block.fetch_add(1, Ordering::SeqCst);
            let receipt = TxReceipt {
                header: BlockHeader {
                    number,
                    previous_hash: Vec::new(),
                    tx_root: Vec::new(),
                    validation_info: vec![info],
                },
                tx_index: 0,
            };
            self.receipts.lock().insert(tx_id.clone(), receipt);
        }

        Ok(tx_id)
    }

    fn query_value(
        &self,
        _user_id: &str,
        db_name: &str,
        key: &str,
    ) -> ClientResult<Option<ValueWithMetadata>> {
        self.ensure_connected()?;
        if let Some(message) = self.query_failure.lock().clone() {
            return Err(ClientError::Query(message));
        }
        Ok(self
            .values
            .lock()
            .get(&(db_name.to_string(), key.to_string()))
            .cloned())
    }

    fn query_receipt(&self, tx_id: &str) -> ClientResult<ReceiptStatus> {
        self.receipt_queries.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(ClientError::Lookup("not connected".into()));
        }
        if let Some(message) = self.receipt_failure.lock().clone() {
            return Err(ClientError::Lookup(message));
        }
        Ok(match self.receipts.lock().get(tx_id) {
            Some(receipt) => ReceiptStatus::Ready(receipt.clone()),
            None => ReceiptStatus::Pending,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
