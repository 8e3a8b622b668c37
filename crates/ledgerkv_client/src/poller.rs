//! Deadline-bounded receipt polling.

use crate::config::PollConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::ReplicaConnector;
use ledgerkv_protocol::{ReceiptStatus, TxReceipt};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Cancels a receipt wait from another thread.
///
/// Clones share the same flag. Cancelling wakes a waiting poller
/// immediately instead of at its next tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every wait observing this token.
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for `duration` or until cancelled. Returns true if cancelled.
    pub fn wait_for(&self, duration: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if condvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Waits for the receipt of a submitted transaction.
///
/// Runs on the caller's thread. The wait is bounded by
/// [`PollConfig::timeout`]: it gives up no earlier than the timeout and no
/// later than one interval (plus one lookup) after it.
pub struct ReceiptPoller<'a, C: ReplicaConnector + ?Sized> {
    connector: &'a C,
    config: PollConfig,
}

impl<'a, C: ReplicaConnector + ?Sized> ReceiptPoller<'a, C> {
    /// Creates a poller over a connector.
    pub fn new(connector: &'a C, config: PollConfig) -> Self {
        Self { connector, config }
    }

    /// Performs a single lookup.
    pub fn poll_once(&self, tx_id: &str) -> ClientResult<Option<TxReceipt>> {
        match self.connector.query_receipt(tx_id)? {
            ReceiptStatus::Ready(receipt) => Ok(Some(receipt)),
            ReceiptStatus::Pending => Ok(None),
        }
    }

    /// Polls until the receipt is available, the deadline passes, or the
    /// token is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Lookup`] as soon as a lookup fails.
    /// - [`ClientError::Timeout`] when the deadline passes.
    /// - [`ClientError::Cancelled`] when `cancel` fires.
    pub fn await_receipt(
        &self,
        tx_id: &str,
        cancel: Option<&CancelToken>,
    ) -> ClientResult<TxReceipt> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let mut attempts = 0u32;

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(ClientError::Cancelled);
            }

            attempts += 1;
            if let Some(receipt) = self.poll_once(tx_id)? {
                debug!(tx_id, attempts, block = receipt.header.number, "receipt ready");
                return Ok(receipt);
            }
            trace!(tx_id, attempts, "receipt pending");

            let now = Instant::now();
            if now >= deadline {
                debug!(tx_id, attempts, "receipt wait timed out");
                return Err(ClientError::Timeout {
                    tx_id: tx_id.to_string(),
                    waited: now.duration_since(started),
                });
            }

            let pause = self.config.interval.min(deadline - now);
            match cancel {
                Some(token) => {
                    if token.wait_for(pause) {
                        return Err(ClientError::Cancelled);
                    }
                }
                None => std::thread::sleep(pause),
            }
        }
    }
}
