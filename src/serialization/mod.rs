pub mod extract;
pub mod value;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, Result};

/// A storable record: anything serde can move through the collection's
/// wire format. Field access on stored records goes through the encoded
/// bytes (see [`extract`]), never through the concrete type.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Canonical byte representation used by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// Self-describing text format, nested key/value maps (JSON).
    TagTree,
    /// Length-prefixed binary format with explicit integer widths and a
    /// distinguished nil (MessagePack, map-keyed).
    Packed,
}

impl Default for WireFormat {
    fn default() -> Self {
        WireFormat::TagTree
    }
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, record: &T) -> Result<Vec<u8>> {
        match self {
            WireFormat::TagTree => {
                serde_json::to_vec(record).map_err(|e| Error::EncodeFailure(e.to_string()))
            }
            WireFormat::Packed => {
                rmp_serde::to_vec_named(record).map_err(|e| Error::EncodeFailure(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            WireFormat::TagTree => {
                serde_json::from_slice(bytes).map_err(|e| Error::DecodeFailure(e.to_string()))
            }
            WireFormat::Packed => {
                rmp_serde::from_slice(bytes).map_err(|e| Error::DecodeFailure(e.to_string()))
            }
        }
    }

    /// Decode into the format-agnostic tree representation. Both formats are
    /// self-describing, so shard payloads can be reshaped (compaction,
    /// repartitioning) without knowing the caller's record type.
    pub fn decode_generic(&self, bytes: &[u8]) -> Result<Value> {
        self.decode(bytes)
    }

    pub fn decode_values(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        self.decode(bytes)
    }

    pub fn encode_values(&self, values: &[Value]) -> Result<Vec<u8>> {
        self.encode(&values)
    }

    /// Format tag stored in the shard payload header.
    pub fn header_byte(&self) -> u8 {
        match self {
            WireFormat::TagTree => 0,
            WireFormat::Packed => 1,
        }
    }

    pub fn from_header_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(WireFormat::TagTree),
            1 => Ok(WireFormat::Packed),
            other => Err(Error::DecodeFailure(format!("unknown format tag {}", other))),
        }
    }
}

/// Rehydrate a caller record from the generic tree form.
pub fn record_from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::DecodeFailure(e.to_string()))
}
