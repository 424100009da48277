//! Dynamic field extraction.
//!
//! Partition routing and index-key derivation need the string form of a
//! single top-level field on the hot write path. Both functions here read
//! the encoded byte stream directly instead of materializing the caller's
//! record type: the tag-tree walker parses the self-describing tree, the
//! packed walker steps over raw MessagePack markers and skips every entry
//! it does not need.

use rmp::Marker;
use serde_json::{Number, Value};

use crate::core::error::{Error, Result};
use crate::serialization::value::stringify_scalar;
use crate::serialization::WireFormat;

/// String form of a named top-level field, or `None` when the field is
/// absent or not a scalar.
pub fn extract_field(bytes: &[u8], field: &str, format: WireFormat) -> Result<Option<String>> {
    match format {
        WireFormat::TagTree => extract_tag_tree(bytes, field),
        WireFormat::Packed => extract_packed(bytes, field),
    }
}

/// Extraction for the write path's partition routing.
pub fn partition_key(bytes: &[u8], field: &str, format: WireFormat) -> Result<String> {
    extract_field(bytes, field, format)?
        .ok_or_else(|| Error::PartitionKeyNotFound(field.to_string()))
}

/// Extraction for the write path's index maintenance.
pub fn index_key(bytes: &[u8], field: &str, format: WireFormat) -> Result<String> {
    extract_field(bytes, field, format)?.ok_or_else(|| Error::IndexKeyNotFound(field.to_string()))
}

fn extract_tag_tree(bytes: &[u8], field: &str) -> Result<Option<String>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::DecodeFailure(e.to_string()))?;
    let map = match value.as_object() {
        Some(map) => map,
        None => return Ok(None),
    };
    Ok(map.get(field).and_then(stringify_scalar))
}

fn extract_packed(bytes: &[u8], field: &str) -> Result<Option<String>> {
    let mut cur = Cursor::new(bytes);
    let entries = match cur.read_marker()? {
        Marker::FixMap(n) => n as usize,
        Marker::Map16 => cur.read_u16()? as usize,
        Marker::Map32 => cur.read_u32()? as usize,
        _ => return Ok(None),
    };

    for _ in 0..entries {
        let key_marker = cur.read_marker()?;
        match cur.str_after(key_marker)? {
            Some(key) if key == field => return cur.scalar_to_string(),
            _ => cur.skip_value()?,
        }
    }
    Ok(None)
}

/// Minimal MessagePack walker over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::DecodeFailure("truncated packed record".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_marker(&mut self) -> Result<Marker> {
        Ok(Marker::from_u8(self.read_u8()?))
    }

    /// The string body of an already-read marker, or `None` when the marker
    /// does not introduce a string. Non-string keys are legal MessagePack;
    /// the caller skips their values.
    fn str_after(&mut self, marker: Marker) -> Result<Option<&'a str>> {
        let len = match marker {
            Marker::FixStr(n) => n as usize,
            Marker::Str8 => self.read_u8()? as usize,
            Marker::Str16 => self.read_u16()? as usize,
            Marker::Str32 => self.read_u32()? as usize,
            other => {
                self.skip_after(other)?;
                return Ok(None);
            }
        };
        let body = self.take(len)?;
        std::str::from_utf8(body)
            .map(Some)
            .map_err(|e| Error::DecodeFailure(e.to_string()))
    }

    /// Read the next value and return its scalar string form, `None` for
    /// maps, arrays, binary and extension values.
    fn scalar_to_string(&mut self) -> Result<Option<String>> {
        let marker = self.read_marker()?;
        let repr = match marker {
            Marker::Null => Some("null".to_string()),
            Marker::True => Some("true".to_string()),
            Marker::False => Some("false".to_string()),
            Marker::FixPos(n) => Some(Number::from(n).to_string()),
            Marker::FixNeg(n) => Some(Number::from(n).to_string()),
            Marker::U8 => Some(Number::from(self.read_u8()?).to_string()),
            Marker::U16 => Some(Number::from(self.read_u16()?).to_string()),
            Marker::U32 => Some(Number::from(self.read_u32()?).to_string()),
            Marker::U64 => Some(Number::from(self.read_u64()?).to_string()),
            Marker::I8 => Some(Number::from(self.read_u8()? as i8).to_string()),
            Marker::I16 => Some(Number::from(self.read_u16()? as i16).to_string()),
            Marker::I32 => Some(Number::from(self.read_u32()? as i32).to_string()),
            Marker::I64 => Some(Number::from(self.read_u64()? as i64).to_string()),
            Marker::F32 => {
                let bits = self.read_u32()?;
                Number::from_f64(f32::from_bits(bits) as f64).map(|n| n.to_string())
            }
            Marker::F64 => {
                let bits = self.read_u64()?;
                Number::from_f64(f64::from_bits(bits)).map(|n| n.to_string())
            }
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                return Ok(self.str_after(marker)?.map(|s| s.to_string()));
            }
            other => {
                self.skip_after(other)?;
                None
            }
        };
        Ok(repr)
    }

    fn skip_value(&mut self) -> Result<()> {
        let marker = self.read_marker()?;
        self.skip_after(marker)
    }

    fn skip_after(&mut self, marker: Marker) -> Result<()> {
        match marker {
            Marker::Null
            | Marker::True
            | Marker::False
            | Marker::FixPos(_)
            | Marker::FixNeg(_) => {}
            Marker::U8 | Marker::I8 => {
                self.take(1)?;
            }
            Marker::U16 | Marker::I16 => {
                self.take(2)?;
            }
            Marker::U32 | Marker::I32 | Marker::F32 => {
                self.take(4)?;
            }
            Marker::U64 | Marker::I64 | Marker::F64 => {
                self.take(8)?;
            }
            Marker::FixStr(n) => {
                self.take(n as usize)?;
            }
            Marker::Str8 | Marker::Bin8 => {
                let len = self.read_u8()? as usize;
                self.take(len)?;
            }
            Marker::Str16 | Marker::Bin16 => {
                let len = self.read_u16()? as usize;
                self.take(len)?;
            }
            Marker::Str32 | Marker::Bin32 => {
                let len = self.read_u32()? as usize;
                self.take(len)?;
            }
            Marker::FixArray(n) => self.skip_values(n as usize)?,
            Marker::Array16 => {
                let len = self.read_u16()? as usize;
                self.skip_values(len)?;
            }
            Marker::Array32 => {
                let len = self.read_u32()? as usize;
                self.skip_values(len)?;
            }
            Marker::FixMap(n) => self.skip_values(2 * n as usize)?,
            Marker::Map16 => {
                let len = self.read_u16()? as usize;
                self.skip_values(2 * len)?;
            }
            Marker::Map32 => {
                let len = self.read_u32()? as usize;
                self.skip_values(2 * len)?;
            }
            Marker::FixExt1 => {
                self.take(2)?;
            }
            Marker::FixExt2 => {
                self.take(3)?;
            }
            Marker::FixExt4 => {
                self.take(5)?;
            }
            Marker::FixExt8 => {
                self.take(9)?;
            }
            Marker::FixExt16 => {
                self.take(17)?;
            }
            Marker::Ext8 => {
                let len = self.read_u8()? as usize;
                self.take(len + 1)?;
            }
            Marker::Ext16 => {
                let len = self.read_u16()? as usize;
                self.take(len + 1)?;
            }
            Marker::Ext32 => {
                let len = self.read_u32()? as usize;
                self.take(len + 1)?;
            }
            Marker::Reserved => {
                return Err(Error::DecodeFailure(
                    "reserved marker in packed record".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn skip_values(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.skip_value()?;
        }
        Ok(())
    }
}
