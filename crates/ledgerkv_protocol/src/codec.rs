//! CBOR encoding of protocol values.
//!
//! Every message and ledger structure in this crate derives serde and is
//! written with `ciborium`. Struct fields are emitted in declaration order and
//! all maps are `BTreeMap`s, so equal values always produce equal bytes. That
//! property is what makes a signature over an encoded `DataTx` reproducible.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Convenience methods for types that travel as a single CBOR document.
pub trait CborMessage: Serialize + DeserializeOwned + Sized {
    /// Encodes to CBOR.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        self::encode(self)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        self::decode(bytes)
    }
}
