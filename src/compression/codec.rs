use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Compression applied to a shard payload body.
///
/// The variant is fixed when the shard file is created and recorded in the
/// payload header, so readers can decompress after a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    /// Identity codec, bytes pass through untouched.
    None,
    /// General purpose byte-stream compressor (LZ4 block format).
    General,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::None
    }
}

impl Codec {
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::General => lz4::block::compress(data, None, true)
                .map_err(|e| Error::CodecFailure(e.to_string())),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::General => lz4::block::decompress(data, None)
                .map_err(|e| Error::CodecFailure(e.to_string())),
        }
    }

    /// Codec tag stored in the shard payload header.
    pub fn header_byte(&self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::General => 1,
        }
    }

    pub fn from_header_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Codec::None),
            1 => Ok(Codec::General),
            other => Err(Error::CodecFailure(format!("unknown codec tag {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let data = b"hello world".to_vec();
        let compressed = Codec::None.compress(&data).unwrap();
        assert_eq!(compressed, data);
        assert_eq!(Codec::None.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn general_round_trips() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let compressed = Codec::General.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Codec::General.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn general_rejects_garbage() {
        assert!(Codec::General.decompress(&[0xff, 0x01, 0x02]).is_err());
    }

    #[test]
    fn header_byte_round_trips() {
        for codec in [Codec::None, Codec::General] {
            assert_eq!(Codec::from_header_byte(codec.header_byte()).unwrap(), codec);
        }
        assert!(Codec::from_header_byte(9).is_err());
    }
}
