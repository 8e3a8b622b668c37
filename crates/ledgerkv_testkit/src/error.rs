//! Error types for the in-memory replica.

use ledgerkv_protocol::CodecError;
use thiserror::Error;

/// Result type for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Errors raised by the in-memory replica while serving a request.
///
/// Validation failures are not errors: they become flags in the block.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// The replica has been taken offline.
    #[error("replica {0} is offline")]
    Offline(String),

    /// The request body could not be decoded, or the response encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No handler is registered for the path.
    #[error("unknown path: {0}")]
    UnknownPath(String),
}
