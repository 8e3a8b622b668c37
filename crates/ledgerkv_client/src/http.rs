//! HTTP connector implementation.
//!
//! Requests are CBOR bodies POSTed to a replica. The HTTP client itself is
//! abstracted via a trait so any HTTP library (or an in-process loopback)
//! can carry the bytes.

use crate::config::{ConnectionConfig, ReplicaEndpoint};
use crate::error::{ClientError, ClientResult};
use crate::transport::ReplicaConnector;
use ledgerkv_protocol::{
    CborMessage, DataTxEnvelope, HelloRequest, HelloResponse, QueryValueRequest,
    QueryValueResponse, ReceiptRequest, ReceiptResponse, ReceiptStatus, SubmitRequest,
    SubmitResponse, ValueLookup, ValueWithMetadata, HELLO_PATH, QUERY_PATH, RECEIPT_PATH,
    SUBMIT_PATH,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;

    /// Installs the root CA certificates used to verify replicas.
    ///
    /// Called once by [`HttpConnector::new`]. Clients without TLS ignore it.
    fn set_root_cas(&mut self, _root_cas: &[PathBuf]) -> Result<(), String> {
        Ok(())
    }
}

/// HTTP-based replica connector.
///
/// Requests go to the current replica of the set. When a replica cannot be
/// reached, reads and handshakes move on to the next one and fail only after
/// every replica has been tried. Submissions are sent once: a transport
/// error is returned as retryable and later requests go to the next replica.
pub struct HttpConnector<C: HttpClient> {
    replicas: Vec<ReplicaEndpoint>,
    request_timeout: Duration,
    client: C,
    current: AtomicUsize,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpConnector<C> {
    /// Creates a connector for the replica set described by `config`.
    pub fn new(config: &ConnectionConfig, mut client: C) -> ClientResult<Self> {
        config.validate()?;
        client
            .set_root_cas(&config.root_cas)
            .map_err(|e| ClientError::Config(format!("root CAs rejected: {}", e)))?;
        Ok(Self {
            replicas: config.replica_set.clone(),
            request_timeout: config.request_timeout,
            client,
            current: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        })
    }

    /// Returns the replica requests are currently routed to.
    pub fn current_replica(&self) -> &ReplicaEndpoint {
        &self.replicas[self.current.load(Ordering::SeqCst) % self.replicas.len()]
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_cbor<Req, Res>(
        &self,
        path: &str,
        request: &Req,
        fail_over: bool,
        on_error: fn(String) -> ClientError,
    ) -> ClientResult<Res>
    where
        Req: CborMessage,
        Res: CborMessage,
    {
        if !self.is_connected() {
            return Err(on_error("not connected".into()));
        }

        let body = request.encode()?;
        let start = self.current.load(Ordering::SeqCst);
        let attempts = if fail_over { self.replicas.len() } else { 1 };

        for attempt in 0..attempts {
            let index = (start + attempt) % self.replicas.len();
            let replica = &self.replicas[index];
            let url = format!("{}{}", replica.endpoint.trim_end_matches('/'), path);

            match self.client.post(&url, body.clone(), self.request_timeout) {
                Ok(response) => {
                    if index != start {
                        self.current.store(index, Ordering::SeqCst);
                    }
                    *self.last_error.write() = None;
                    return Res::decode(&response).map_err(|e| {
                        ClientError::Protocol(format!(
                            "undecodable response from {}: {}",
                            replica.id, e
                        ))
                    });
                }
                Err(e) => {
                    warn!(replica = %replica.id, path, error = %e, "replica unreachable");
                    *self.last_error.write() = Some(e.clone());
                    if !fail_over {
                        self.current
                            .store((index + 1) % self.replicas.len(), Ordering::SeqCst);
                        return Err(on_error(format!("replica {} failed: {}", replica.id, e)));
                    }
                }
            }
        }

        let message = self
            .last_error()
            .unwrap_or_else(|| "no replica reachable".into());
        Err(on_error(format!("all replicas failed: {}", message)))
    }
}

impl<C: HttpClient> ReplicaConnector for HttpConnector<C> {
    fn hello(&self, request: &HelloRequest) -> ClientResult<HelloResponse> {
        self.post_cbor(HELLO_PATH, request, true, ClientError::Connection)
    }

    fn submit(&self, envelope: &DataTxEnvelope) -> ClientResult<String> {
        let request = SubmitRequest {
            envelope: envelope.clone(),
        };
        let response: SubmitResponse =
            self.post_cbor(SUBMIT_PATH, &request, false, |e| {
                ClientError::submission_retryable(e)
            })?;

        if !response.accepted {
            return Err(ClientError::submission_fatal(
                response
                    .error
                    .unwrap_or_else(|| "transaction rejected".into()),
            ));
        }
        if response.tx_id != envelope.tx_id() {
            return Err(ClientError::Protocol(format!(
                "replica acknowledged {} for submitted {}",
                response.tx_id,
                envelope.tx_id()
            )));
        }

        debug!(tx_id = %response.tx_id, replica = %self.current_replica().id, "submitted");
        Ok(response.tx_id)
    }

    fn query_value(
        &self,
        user_id: &str,
        db_name: &str,
        key: &str,
    ) -> ClientResult<Option<ValueWithMetadata>> {
        let request = QueryValueRequest {
            user_id: user_id.to_string(),
            db_name: db_name.to_string(),
            key: key.to_string(),
        };
        let response: QueryValueResponse =
            self.post_cbor(QUERY_PATH, &request, true, ClientError::Query)?;

        match response.lookup {
            ValueLookup::Found(value) => Ok(Some(value)),
            ValueLookup::NotFound => Ok(None),
            ValueLookup::Failed(message) => Err(ClientError::Query(message)),
        }
    }

    fn query_receipt(&self, tx_id: &str) -> ClientResult<ReceiptStatus> {
        let request = ReceiptRequest {
            tx_id: tx_id.to_string(),
        };
        let response: ReceiptResponse =
            self.post_cbor(RECEIPT_PATH, &request, true, ClientError::Lookup)?;

        match (response.status, response.error) {
            (Some(status), _) => Ok(status),
            (None, Some(message)) => Err(ClientError::Lookup(message)),
            (None, None) => Err(ClientError::Protocol(
                "receipt response carries neither status nor error".into(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to an in-process
/// replica.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, String> {
        let path = url.find("/ledger/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
