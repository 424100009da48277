use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::compression::codec::Codec;
use crate::core::error::{Error, Result};
use crate::serialization::extract::extract_field;
use crate::serialization::value::stringify_scalar;
use crate::serialization::{record_from_value, Record, WireFormat};
use crate::storage::layout::{atomic_write, sidecar_for};
use crate::storage::metadata::{ShardInfo, ShardMetadata};

pub const SHARD_MAGIC: [u8; 4] = *b"NYRU";
pub const SHARD_VERSION: u8 = 1;
pub const SHARD_HEADER_LEN: usize = 8;

/// One partition's on-disk document array.
///
/// The payload file starts with an 8 byte header (magic, version, codec tag,
/// format tag, reserved) followed by the codec-compressed encoded document
/// array. A `meta.json` sidecar carries document count, timestamps and
/// per-tracked-field min/max bounds. Payload and sidecar are both replaced
/// atomically (write temp, rename); a failed sidecar write only marks the
/// shard dirty because the sidecar is recomputable from the payload.
#[derive(Debug)]
pub struct Shard {
    id: String,
    path: PathBuf,
    sidecar_path: PathBuf,
    codec: Codec,
    format: WireFormat,
    file_protection: Option<u32>,
    state: RwLock<ShardState>,
}

#[derive(Debug)]
struct ShardState {
    meta: ShardMetadata,
    dirty: bool,
}

impl Shard {
    /// Create the payload file for a new partition with an empty document
    /// array.
    pub fn create(
        id: &str,
        path: PathBuf,
        codec: Codec,
        format: WireFormat,
        file_protection: Option<u32>,
    ) -> Result<Self> {
        if path.exists() {
            return Err(Error::ShardAlreadyExists(id.to_string()));
        }
        let shard = Shard {
            id: id.to_string(),
            sidecar_path: sidecar_for(&path),
            path,
            codec,
            format,
            file_protection,
            state: RwLock::new(ShardState {
                meta: ShardMetadata::empty(),
                dirty: false,
            }),
        };
        let body = shard.format.encode_values(&[])?;
        shard.write_payload(&body)?;
        {
            let mut state = shard.state.write();
            shard.write_sidecar(&mut state);
        }
        debug!(shard = %shard.id, "created shard");
        Ok(shard)
    }

    /// Open an existing payload file. The header is authoritative for codec
    /// and format; a missing or corrupt sidecar is recomputed from the
    /// payload.
    pub fn open(
        id: &str,
        path: PathBuf,
        file_protection: Option<u32>,
        tracked_fields: &[String],
    ) -> Result<Self> {
        let raw = fs::read(&path)?;
        let (codec, format) = parse_header(&raw)?;
        let sidecar_path = sidecar_for(&path);

        let meta = match fs::read(&sidecar_path)
            .map_err(Error::from)
            .and_then(|bytes| serde_json::from_slice::<ShardMetadata>(&bytes).map_err(Error::from))
        {
            Ok(meta) => meta,
            Err(err) => {
                warn!(shard = %id, "sidecar unreadable, recomputing metadata: {}", err);
                let body = codec.decompress(&raw[SHARD_HEADER_LEN..])?;
                let values = format.decode_values(&body)?;
                recompute_metadata(&values, tracked_fields, Utc::now())
            }
        };

        let shard = Shard {
            id: id.to_string(),
            path,
            sidecar_path,
            codec,
            format,
            file_protection,
            state: RwLock::new(ShardState { meta, dirty: true }),
        };
        {
            let mut state = shard.state.write();
            shard.write_sidecar(&mut state);
        }
        Ok(shard)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn doc_count(&self) -> usize {
        self.state.read().meta.document_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.read().meta.created_at
    }

    pub fn info(&self) -> ShardInfo {
        let state = self.state.read();
        ShardInfo {
            id: self.id.clone(),
            document_count: state.meta.document_count,
            created_at: state.meta.created_at,
            updated_at: state.meta.updated_at,
            field_stats: state.meta.field_stats.clone(),
        }
    }

    /// Append one encoded record to the document array.
    pub fn append(&self, record_bytes: &[u8], tracked_fields: &[String]) -> Result<()> {
        let element = self.format.decode_generic(record_bytes)?;
        let mut state = self.state.write();

        let body = self.read_body()?;
        let mut values = self.format.decode_values(&body)?;
        values.push(element);
        let body = self.format.encode_values(&values)?;
        self.write_payload(&body)?;

        state.meta.document_count = values.len();
        state.meta.updated_at = Utc::now();
        for field in tracked_fields {
            if let Some(key) = extract_field(record_bytes, field, self.format)? {
                state.meta.observe_field(field, &key);
            }
        }
        self.write_sidecar(&mut state);
        Ok(())
    }

    /// Decode the document array into the generic tree form.
    pub fn load_values(&self) -> Result<Vec<Value>> {
        let _shared = self.state.read();
        let body = self.read_body()?;
        self.format.decode_values(&body)
    }

    /// Decode the document array element by element into the caller's type.
    pub fn load_all<T: Record>(&self) -> Result<ShardIter<T>> {
        Ok(ShardIter {
            values: self.load_values()?.into_iter(),
            _marker: PhantomData,
        })
    }

    /// Replace the document array wholesale and refresh metadata.
    pub fn save_values(&self, values: &[Value], tracked_fields: &[String]) -> Result<()> {
        let body = self.format.encode_values(values)?;
        let mut state = self.state.write();
        self.write_payload(&body)?;
        let created_at = state.meta.created_at;
        state.meta = recompute_metadata(values, tracked_fields, created_at);
        self.write_sidecar(&mut state);
        Ok(())
    }

    /// Encode each record and replace the document array.
    pub fn save_all<T: Record>(&self, records: &[T], tracked_fields: &[String]) -> Result<()> {
        let mut values = Vec::with_capacity(records.len());
        for record in records {
            let bytes = self.format.encode(record)?;
            values.push(self.format.decode_generic(&bytes)?);
        }
        self.save_values(&values, tracked_fields)
    }

    /// Decompressed encoded document array, as stored. Compaction reads
    /// absorbed shards through this without caring about record types.
    pub fn raw_body(&self) -> Result<Vec<u8>> {
        let _shared = self.state.read();
        self.read_body()
    }

    /// Replace the encoded document array, recomputing metadata from it.
    pub fn set_raw_body(&self, body: &[u8], tracked_fields: &[String]) -> Result<()> {
        let values = self.format.decode_values(body)?;
        self.save_values(&values, tracked_fields)
    }

    /// Remove payload and sidecar from disk. The sidecar may already be
    /// gone; the payload may not.
    pub fn delete_files(&self) -> Result<()> {
        let _exclusive = self.state.write();
        fs::remove_file(&self.path)?;
        if let Err(err) = fs::remove_file(&self.sidecar_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn read_body(&self) -> Result<Vec<u8>> {
        let raw = fs::read(&self.path)?;
        let (codec, _format) = parse_header(&raw)?;
        codec.decompress(&raw[SHARD_HEADER_LEN..])
    }

    fn write_payload(&self, body: &[u8]) -> Result<()> {
        let compressed = self.codec.compress(body)?;
        let mut file = Vec::with_capacity(SHARD_HEADER_LEN + compressed.len());
        file.extend_from_slice(&SHARD_MAGIC);
        file.push(SHARD_VERSION);
        file.push(self.codec.header_byte());
        file.push(self.format.header_byte());
        file.push(0); // reserved
        file.extend_from_slice(&compressed);
        atomic_write(&self.path, &file, self.file_protection).map_err(|source| {
            Error::ShardPersistFailure {
                id: self.id.clone(),
                source,
            }
        })
    }

    fn write_sidecar(&self, state: &mut ShardState) {
        let result = serde_json::to_vec_pretty(&state.meta)
            .map_err(std::io::Error::other)
            .and_then(|bytes| atomic_write(&self.sidecar_path, &bytes, self.file_protection));
        match result {
            Ok(()) => state.dirty = false,
            Err(err) => {
                // Non-fatal: the sidecar is derived state.
                state.dirty = true;
                warn!(shard = %self.id, "sidecar write failed: {}", err);
            }
        }
    }
}

fn parse_header(raw: &[u8]) -> Result<(Codec, WireFormat)> {
    if raw.len() < SHARD_HEADER_LEN || raw[..4] != SHARD_MAGIC {
        return Err(Error::DecodeFailure("not a shard payload file".to_string()));
    }
    if raw[4] != SHARD_VERSION {
        return Err(Error::DecodeFailure(format!(
            "unsupported shard version {}",
            raw[4]
        )));
    }
    if raw[7] != 0 {
        return Err(Error::DecodeFailure(
            "non-zero reserved header byte".to_string(),
        ));
    }
    Ok((
        Codec::from_header_byte(raw[5])?,
        WireFormat::from_header_byte(raw[6])?,
    ))
}

fn recompute_metadata(
    values: &[Value],
    tracked_fields: &[String],
    created_at: DateTime<Utc>,
) -> ShardMetadata {
    let mut meta = ShardMetadata::empty();
    meta.created_at = created_at;
    meta.document_count = values.len();
    for value in values {
        for field in tracked_fields {
            if let Some(key) = value.get(field).and_then(stringify_scalar) {
                meta.observe_field(field, &key);
            }
        }
    }
    meta
}

/// Per-element decoding iterator over one shard's document array.
pub struct ShardIter<T> {
    values: std::vec::IntoIter<Value>,
    _marker: PhantomData<T>,
}

impl<T: Record> Iterator for ShardIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.values.next().map(record_from_value)
    }
}
