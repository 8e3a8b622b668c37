//! # LedgerKV Testkit
//!
//! Test utilities for LedgerKV.
//!
//! This crate provides:
//! - An in-memory replica that orders transactions into blocks, validates
//!   them (signatures, access control, MVCC) and serves receipts
//! - Fixture users, keys and a ready-made demo replica
//! - Property-based test generators using proptest
//!
//! The replica is a test double, not a server: it has no consensus, no
//! persistence and no network listener. Requests reach it as CBOR bodies
//! through [`MemoryReplica::handle_post`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerkv_testkit::prelude::*;
//!
//! let replica = demo_replica(ReplicaConfig::default());
//! let signer = signer_for("alice");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod fixtures;
pub mod generators;
pub mod replica;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{ReplicaError, ReplicaResult};
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replica::*;
}

pub use error::{ReplicaError, ReplicaResult};
pub use fixtures::*;
pub use generators::*;
pub use replica::*;
