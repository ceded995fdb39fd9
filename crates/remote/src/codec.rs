//! Pluggable serialization for envelopes, arguments and results.

use crate::error::Result;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

/// Wire serialization format used by a chain.
///
/// Both ends of a connection must use the same codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// CBOR via `ciborium`.
    #[default]
    Cbor,
    /// `bincode` 1.x with default options.
    Bincode,
    /// JSON via `serde_json`.
    Json,
}

impl Codec {
    /// Encode a value into bytes.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        let vec = match self {
            Self::Cbor => {
                let mut vec = Vec::new();
                ciborium::ser::into_writer(value, &mut vec)?;
                vec
            }
            Self::Bincode => bincode::serialize(value)?,
            Self::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(vec))
    }

    /// Decode bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the data is not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        let value = match self {
            Self::Cbor => ciborium::de::from_reader(data)?,
            Self::Bincode => bincode::deserialize(data)?,
            Self::Json => serde_json::from_slice(data)?,
        };
        Ok(value)
    }
}
