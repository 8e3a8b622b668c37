//! Signing and verification of commit envelopes.
//!
//! Signatures are HMAC-SHA256 tags computed over the CBOR encoding of a
//! `DataTx`. Each user has a secret key known to the user and to the replica
//! set; generating and distributing those keys is the application's job.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Result type for signing and verification.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised while signing or verifying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The signer could not produce a signature.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// No key is registered for the user.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// A required signature is absent.
    #[error("missing signature for user {0}")]
    MissingSignature(String),

    /// A signature does not match the payload.
    #[error("invalid signature for user {0}")]
    InvalidSignature(String),

    /// The payload could not be encoded for verification.
    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

/// Produces signatures on behalf of one user identity.
pub trait Signer: Send + Sync {
    /// Returns the user id this signer signs for.
    fn user_id(&self) -> &str;

    /// Signs a payload.
    fn sign(&self, payload: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// Verifies signatures produced by a [`Signer`].
pub trait SignatureVerifier: Send + Sync {
    /// Checks that `signature` is `user_id`'s signature over `payload`.
    fn verify(&self, user_id: &str, payload: &[u8], signature: &[u8]) -> CryptoResult<()>;
}

/// HMAC-SHA256 signer holding one user's secret key.
#[derive(Clone)]
pub struct HmacSigner {
    user_id: String,
    key: Vec<u8>,
}

impl HmacSigner {
    /// Creates a signer for `user_id` with the given secret key.
    pub fn new(user_id: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            user_id: user_id.into(),
            key,
        }
    }
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn sign(&self, payload: &[u8]) -> CryptoResult<Vec<u8>> {
        if self.key.is_empty() {
            return Err(CryptoError::SigningFailed(format!(
                "empty signing key for user {}",
                self.user_id
            )));
        }
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// HMAC-SHA256 verifier with a registry of user keys.
#[derive(Clone, Default)]
pub struct HmacVerifier {
    keys: BTreeMap<String, Vec<u8>>,
}

impl HmacVerifier {
    /// Creates a verifier with no registered users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user's key.
    pub fn with_user(mut self, user_id: impl Into<String>, key: Vec<u8>) -> Self {
        self.keys.insert(user_id.into(), key);
        self
    }

    /// Registers a user's key in place.
    pub fn register(&mut self, user_id: impl Into<String>, key: Vec<u8>) {
        self.keys.insert(user_id.into(), key);
    }

    /// Returns true if a key is registered for the user.
    pub fn knows(&self, user_id: &str) -> bool {
        self.keys.contains_key(user_id)
    }
}

impl fmt::Debug for HmacVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacVerifier")
            .field("users", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, user_id: &str, payload: &[u8], signature: &[u8]) -> CryptoResult<()> {
        let key = self
            .keys
            .get(user_id)
            .ok_or_else(|| CryptoError::UnknownUser(user_id.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidSignature(format!("{user_id}: {e}")))?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| CryptoError::InvalidSignature(user_id.to_string()))
    }
}

/// SHA-256 over the concatenation of `parts`.
///
/// Used for block header chaining and transaction roots.
pub fn block_hash(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}
