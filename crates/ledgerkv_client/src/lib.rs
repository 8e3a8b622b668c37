//! # LedgerKV Client
//!
//! Transaction sessions against a LedgerKV replica set.
//!
//! This crate provides:
//! - Sessions bound to one user identity and one replica set
//! - Data transactions with a read-set pinned at first read and a
//!   last-write-wins write-set
//! - Commit coordination: freeze, sign, submit, optionally wait
//! - Deadline-bounded, cancellable receipt polling
//! - Interpretation of validation verdicts
//! - An HTTP connector abstraction with replica fail-over
//! - A directory-backed store for transaction evidence
//!
//! ## Commit model
//!
//! Concurrency control is optimistic. A transaction records the committed
//! version of every key it reads; the replica set validates those versions
//! when it orders the transaction and marks it VALID or INVALID. An INVALID
//! verdict is a normal outcome delivered in the receipt, not an error.
//!
//! ```text
//! DataTx (reads/writes) -> CommitCoordinator (freeze, sign, submit)
//!     -> [sync] ReceiptPoller -> verdict
//!     -> [async] tx id; later Session::await_receipt -> verdict
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use ledgerkv_client::{MockConnector, ReceiptExt, Session, SessionConfig};
//! use ledgerkv_protocol::HmacSigner;
//! use std::sync::Arc;
//!
//! let signer = Arc::new(HmacSigner::new("alice", b"alice-key".to_vec()));
//! let session = Session::open(MockConnector::new(), signer, SessionConfig::new())?;
//!
//! let mut tx = session.data_tx()?;
//! tx.put("bdb", "key1", b"value1".to_vec(), None)?;
//! let outcome = tx.commit(true)?;
//!
//! if let Some(receipt) = &outcome.receipt {
//!     let verdict = receipt.verdict()?;
//!     println!("{} valid={} {}", outcome.tx_id, verdict.is_valid, verdict.reason);
//! }
//! # Ok::<(), ledgerkv_client::ClientError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod config;
mod data_tx;
mod error;
mod evidence;
mod http;
mod poller;
mod session;
mod transport;
mod validation;

pub use commit::{CommitCoordinator, CommitOutcome};
pub use config::{
    ClientConfig, ConnectionConfig, PollConfig, ReplicaEndpoint, SessionConfig, UserConfig,
};
pub use data_tx::{DataTx, PendingWrite, ReadEntry, TxKey, TxStatus, TxValue};
pub use error::{ClientError, ClientResult};
pub use evidence::{EvidenceStore, TxEvidence};
pub use http::{HttpClient, HttpConnector, LoopbackClient, LoopbackServer};
pub use poller::{CancelToken, ReceiptPoller};
pub use session::{Session, SessionStats};
pub use transport::{MockConnector, ReplicaConnector};
pub use validation::{interpret, ReceiptExt, Verdict};
