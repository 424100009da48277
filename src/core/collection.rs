use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::compression::codec::Codec;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::CollectionStats;
use crate::core::types::{CancellationToken, Deadline};
use crate::index::manager::IndexManager;
use crate::query::executor::DocumentStream;
use crate::query::planner::{plan_query, QueryPlan};
use crate::query::predicate::{Operator, Predicate};
use crate::serialization::extract;
use crate::serialization::value::stringify_scalar;
use crate::serialization::{record_from_value, Record, WireFormat};
use crate::storage::compaction::CompactionHandle;
use crate::storage::layout::{atomic_write, StorageLayout};
use crate::storage::shard_manager::ShardManager;

/// Partition assigned to every record of an unpartitioned collection.
pub const DEFAULT_PARTITION: &str = "default";

/// Per-collection configuration persisted as `collection.json`, so a
/// reopened engine knows how to route and which indexes to rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionManifest {
    name: String,
    partition_key: Option<String>,
    indexed_fields: Vec<String>,
    codec: Codec,
    format: WireFormat,
}

/// One named collection: its shards, its secondary indexes, its partition
/// map entry and its published stats snapshot.
///
/// `state` is the collection mutator from the concurrency model: every
/// mutating operation holds it exclusively, reads share it, and the
/// compaction task takes it only for the shard-swap window.
pub(crate) struct Collection {
    name: String,
    format: WireFormat,
    codec: Codec,
    manifest_path: PathBuf,
    file_protection: Option<u32>,
    state: RwLock<CollectionState>,
    stats: Mutex<Arc<CollectionStats>>,
    cancel: CancellationToken,
}

pub(crate) struct CollectionState {
    partition_key: Option<String>,
    shards: Arc<ShardManager>,
    indexes: IndexManager,
    compaction: Option<CompactionHandle>,
}

impl Collection {
    pub fn create(name: &str, layout: &StorageLayout, config: &Config) -> Result<Arc<Self>> {
        let shards = Arc::new(ShardManager::new(
            layout.collection_dir(name),
            config.codec,
            config.format,
            config.file_protection,
        )?);
        let collection = Arc::new(Collection {
            name: name.to_string(),
            format: config.format,
            codec: config.codec,
            manifest_path: layout.manifest_path(name),
            file_protection: config.file_protection,
            state: RwLock::new(CollectionState {
                partition_key: None,
                shards,
                indexes: IndexManager::new(),
                compaction: None,
            }),
            stats: Mutex::new(Arc::new(CollectionStats::empty(name))),
            cancel: CancellationToken::new(),
        });
        {
            let state = collection.state.read();
            collection.write_manifest(&state)?;
        }
        collection.start_compaction(config)?;
        debug!(collection = name, "created collection");
        Ok(collection)
    }

    pub fn open(name: &str, layout: &StorageLayout, config: &Config) -> Result<Arc<Self>> {
        let bytes = std::fs::read(layout.manifest_path(name))?;
        let manifest: CollectionManifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::DecodeFailure(e.to_string()))?;

        let shards = Arc::new(ShardManager::new(
            layout.collection_dir(name),
            manifest.codec,
            manifest.format,
            config.file_protection,
        )?);
        shards.set_tracked_fields(tracked_fields(
            &manifest.indexed_fields,
            manifest.partition_key.as_deref(),
        ));
        shards.load_existing()?;

        let mut indexes = IndexManager::new();
        for field in &manifest.indexed_fields {
            indexes.create_index(field);
        }
        for shard in shards.all_shards() {
            let values = shard.load_values()?;
            for value in &values {
                for field in &manifest.indexed_fields {
                    if let Some(key) = value.get(field).and_then(stringify_scalar) {
                        let bytes = manifest.format.encode(value)?;
                        indexes.insert(field, &key, bytes);
                    }
                }
            }
        }

        let collection = Arc::new(Collection {
            name: name.to_string(),
            format: manifest.format,
            codec: manifest.codec,
            manifest_path: layout.manifest_path(name),
            file_protection: config.file_protection,
            state: RwLock::new(CollectionState {
                partition_key: manifest.partition_key,
                shards,
                indexes,
                compaction: None,
            }),
            stats: Mutex::new(Arc::new(CollectionStats::empty(name))),
            cancel: CancellationToken::new(),
        });
        collection.refresh_stats(&collection.state.read());
        collection.start_compaction(config)?;
        debug!(collection = name, "opened collection");
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Latest published stats snapshot.
    pub fn stats(&self) -> Arc<CollectionStats> {
        self.stats.lock().clone()
    }

    pub fn partition_key(&self) -> Option<String> {
        self.state.read().partition_key.clone()
    }

    pub fn count_documents(&self) -> usize {
        let state = self.state.read();
        state
            .shards
            .all_shards()
            .iter()
            .map(|s| s.doc_count())
            .sum()
    }

    /// Cancel streams and stop the compaction task, waiting for an
    /// in-flight pass to finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.state.write().compaction.take();
        if let Some(mut handle) = handle {
            handle.stop();
        }
    }

    // ---- write path ----------------------------------------------------

    pub fn insert_record<T: Record>(&self, document: &T) -> Result<()> {
        let bytes = self.format.encode(document)?;
        let mut state = self.state.write();
        self.insert_bytes_locked(&mut state, &bytes)?;
        self.refresh_stats(&state);
        Ok(())
    }

    pub fn bulk_insert<T: Record>(&self, documents: &[T], deadline: Deadline) -> Result<()> {
        let mut state = self.state.write();
        for document in documents {
            deadline.check()?;
            self.cancel.check()?;
            let bytes = self.format.encode(document)?;
            self.insert_bytes_locked(&mut state, &bytes)?;
        }
        self.refresh_stats(&state);
        Ok(())
    }

    /// Route one encoded record: validate, pick the partition, append to
    /// its shard, mirror into every index. Validation and key extraction
    /// happen before any write so a bad record is rejected whole.
    fn insert_bytes_locked(&self, state: &mut CollectionState, bytes: &[u8]) -> Result<()> {
        let value = self.format.decode_generic(bytes)?;
        if !value.is_object() {
            return Err(Error::InvalidDocument(
                "top-level value must be a map".to_string(),
            ));
        }

        let partition = match &state.partition_key {
            Some(field) => extract::partition_key(bytes, field, self.format)?,
            None => DEFAULT_PARTITION.to_string(),
        };

        let fields = state.indexes.indexed_fields();
        let mut keys = Vec::with_capacity(fields.len());
        for field in &fields {
            keys.push(extract::index_key(bytes, field, self.format)?);
        }

        state.shards.append(&partition, bytes)?;
        for (field, key) in fields.iter().zip(keys) {
            state.indexes.insert(field, &key, bytes.to_vec());
        }
        Ok(())
    }

    /// Replace every record matched by the predicate with `document`.
    ///
    /// The replacement is routed like an insert: it must carry the
    /// partition field, and a matched record whose shard no longer agrees
    /// with the replacement's partition value moves to the right shard.
    pub fn update<T, F>(&self, document: &T, matches: F, deadline: Deadline) -> Result<usize>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let new_bytes = self.format.encode(document)?;
        let new_value = self.format.decode_generic(&new_bytes)?;
        if !new_value.is_object() {
            return Err(Error::InvalidDocument(
                "top-level value must be a map".to_string(),
            ));
        }

        let mut state = self.state.write();
        let target_partition = match &state.partition_key {
            Some(field) => extract::partition_key(&new_bytes, field, self.format)?,
            None => DEFAULT_PARTITION.to_string(),
        };
        let fields = state.indexes.indexed_fields();
        let mut new_keys = Vec::with_capacity(fields.len());
        for field in &fields {
            new_keys.push(extract::index_key(&new_bytes, field, self.format)?);
        }

        let mut updated = 0;
        let mut rerouted = 0;
        for shard in state.shards.all_shards() {
            deadline.check()?;
            self.cancel.check()?;
            let values = shard.load_values()?;
            let mut replaced = Vec::with_capacity(values.len());
            let mut changed = false;
            for value in values {
                let record: T = record_from_value(value.clone())?;
                if matches(&record) {
                    let old_bytes = self.format.encode(&record)?;
                    self.unindex_record(&mut state.indexes, &fields, &old_bytes)?;
                    for (field, key) in fields.iter().zip(&new_keys) {
                        state.indexes.insert(field, key, new_bytes.clone());
                    }
                    if shard.id() == target_partition {
                        replaced.push(new_value.clone());
                    } else {
                        rerouted += 1;
                    }
                    changed = true;
                    updated += 1;
                } else {
                    replaced.push(value);
                }
            }
            if changed {
                shard.save_values(&replaced, &state.shards.tracked_fields())?;
            }
        }

        if updated == 0 {
            return Err(Error::DocumentNotFound);
        }
        for _ in 0..rerouted {
            state.shards.append(&target_partition, &new_bytes)?;
        }
        self.refresh_stats(&state);
        Ok(updated)
    }

    /// Remove every record matched by the predicate; returns the count.
    pub fn delete<T, F>(&self, matches: F, deadline: Deadline) -> Result<usize>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let mut state = self.state.write();
        let fields = state.indexes.indexed_fields();

        let mut removed = 0;
        for shard in state.shards.all_shards() {
            deadline.check()?;
            self.cancel.check()?;
            let values = shard.load_values()?;
            let mut kept = Vec::with_capacity(values.len());
            for value in values {
                let record: T = record_from_value(value.clone())?;
                if matches(&record) {
                    let old_bytes = self.format.encode(&record)?;
                    self.unindex_record(&mut state.indexes, &fields, &old_bytes)?;
                    removed += 1;
                } else {
                    kept.push(value);
                }
            }
            if kept.len() != shard.doc_count() {
                shard.save_values(&kept, &state.shards.tracked_fields())?;
            }
        }

        if removed > 0 {
            self.refresh_stats(&state);
        }
        Ok(removed)
    }

    fn unindex_record(
        &self,
        indexes: &mut IndexManager,
        fields: &[String],
        bytes: &[u8],
    ) -> Result<()> {
        for field in fields {
            if let Some(key) = extract::extract_field(bytes, field, self.format)? {
                indexes.delete(field, &key, bytes);
            }
        }
        Ok(())
    }

    // ---- schema operations ---------------------------------------------

    /// Idempotent index creation; existing records are backfilled so index
    /// coverage does not depend on call order.
    pub fn create_index(&self, field: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.indexes.has_index(field) {
            return Ok(());
        }
        state.indexes.create_index(field);
        let tracked = tracked_fields(
            &state.indexes.indexed_fields(),
            state.partition_key.as_deref(),
        );
        state.shards.set_tracked_fields(tracked);

        for shard in state.shards.all_shards() {
            let values = shard.load_values()?;
            for value in &values {
                if let Some(key) = value.get(field).and_then(stringify_scalar) {
                    let bytes = self.format.encode(value)?;
                    state.indexes.insert(field, &key, bytes);
                }
            }
            shard.save_values(&values, &state.shards.tracked_fields())?;
        }

        self.write_manifest(&state)?;
        self.refresh_stats(&state);
        Ok(())
    }

    /// Route future inserts by this field. Existing shards keep their
    /// records until `repartition` is called.
    pub fn set_partition_key(&self, field: &str) -> Result<()> {
        let mut state = self.state.write();
        state.partition_key = Some(field.to_string());
        let tracked = tracked_fields(&state.indexes.indexed_fields(), Some(field));
        state.shards.set_tracked_fields(tracked);
        self.write_manifest(&state)?;
        Ok(())
    }

    /// Re-shard every record by a new partition field. All records must
    /// carry the field; the collection is untouched when any does not.
    pub fn repartition(&self, field: &str, deadline: Deadline) -> Result<()> {
        let mut state = self.state.write();

        let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for shard in state.shards.all_shards() {
            deadline.check()?;
            self.cancel.check()?;
            for value in shard.load_values()? {
                let key = value
                    .get(field)
                    .and_then(stringify_scalar)
                    .ok_or_else(|| Error::PartitionKeyNotFound(field.to_string()))?;
                groups.entry(key).or_default().push(value);
            }
        }

        state.partition_key = Some(field.to_string());
        let tracked = tracked_fields(&state.indexes.indexed_fields(), Some(field));
        state.shards.set_tracked_fields(tracked);

        state.shards.remove_all_shards()?;
        for (partition, values) in &groups {
            deadline.check()?;
            let shard = state.shards.get_or_create_shard(partition)?;
            shard.save_values(values, &state.shards.tracked_fields())?;
        }

        state.indexes.clear();
        let fields = state.indexes.indexed_fields();
        for values in groups.values() {
            for value in values {
                for indexed in &fields {
                    if let Some(key) = value.get(indexed).and_then(stringify_scalar) {
                        let bytes = self.format.encode(value)?;
                        state.indexes.insert(indexed, &key, bytes);
                    }
                }
            }
        }

        self.write_manifest(&state)?;
        self.refresh_stats(&state);
        Ok(())
    }

    pub fn cleanup_empty_shards(&self) -> Result<usize> {
        let state = self.state.write();
        let removed = state.shards.cleanup_empty_shards()?;
        if removed > 0 {
            self.refresh_stats(&state);
        }
        Ok(removed)
    }

    // ---- read path -----------------------------------------------------

    /// Plan a query against the current stats snapshot.
    pub fn plan(&self, predicates: &[Predicate]) -> QueryPlan {
        let state = self.state.read();
        plan_query(predicates, &self.stats(), state.partition_key.as_deref())
    }

    /// Build the lazy result stream for a conjunction of predicates. The
    /// collection lock is released before the stream is consumed; the
    /// stream holds the chosen shards directly.
    pub fn stream<T: Record>(
        &self,
        predicates: Vec<Predicate>,
        deadline: Deadline,
    ) -> DocumentStream<T> {
        let state = self.state.read();
        let plan = plan_query(&predicates, &self.stats(), state.partition_key.as_deref());
        match plan {
            QueryPlan::IndexScan { predicate } => {
                let records = probe_index(&state.indexes, &predicate);
                DocumentStream::over_index(
                    self.format,
                    records,
                    predicates,
                    self.cancel.clone(),
                    deadline,
                )
            }
            QueryPlan::ShardScan { shard_ids, .. } => {
                let shards = shard_ids
                    .iter()
                    .filter_map(|id| state.shards.get_shard(id).ok())
                    .collect();
                DocumentStream::over_shards(shards, predicates, self.cancel.clone(), deadline)
            }
            QueryPlan::FullScan => DocumentStream::over_shards(
                state.shards.all_shards(),
                predicates,
                self.cancel.clone(),
                deadline,
            ),
        }
    }

    // ---- compaction ----------------------------------------------------

    fn start_compaction(self: &Arc<Self>, config: &Config) -> Result<()> {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let threshold = config.compaction_threshold;
        let handle = CompactionHandle::spawn(&self.name, config.compaction_interval, move || {
            if cancel.is_cancelled() {
                return false;
            }
            let Some(collection) = weak.upgrade() else {
                return false;
            };
            match collection.compact_once(threshold) {
                Ok(0) => {}
                Ok(merged) => debug!(collection = %collection.name, merged, "compacted shards"),
                Err(err) => {
                    // Background failures never surface to foreground work.
                    warn!(collection = %collection.name, "compaction pass failed: {}", err);
                }
            }
            true
        })?;
        self.state.write().compaction = Some(handle);
        Ok(())
    }

    /// One compaction pass: merge undersized shards into the oldest one.
    ///
    /// Candidate payloads are read and decoded under the shared guard; the
    /// exclusive guard is only held for the swap. A shard that changed
    /// between the two phases is left alone for the next pass.
    pub fn compact_once(&self, threshold: usize) -> Result<usize> {
        let (primary, recorded) = {
            let state = self.state.read();
            let candidates = state.shards.compaction_candidates(threshold);
            if candidates.len() < 2 {
                return Ok(0);
            }
            let primary = candidates[0].clone();
            let mut recorded = Vec::new();
            for shard in &candidates[1..] {
                let count = shard.doc_count();
                match shard
                    .raw_body()
                    .and_then(|body| self.format.decode_values(&body))
                {
                    Ok(values) => recorded.push((shard.clone(), count, values)),
                    Err(err) => {
                        warn!(shard = %shard.id(), "skipping shard during compaction: {}", err);
                    }
                }
            }
            (primary, recorded)
        };
        if recorded.is_empty() {
            return Ok(0);
        }

        let state = self.state.write();
        if !state.shards.contains(primary.id()) {
            return Ok(0);
        }
        let mut merged = self.format.decode_values(&primary.raw_body()?)?;
        let mut absorbed = Vec::new();
        for (shard, count, values) in recorded {
            if state.shards.contains(shard.id()) && shard.doc_count() == count {
                merged.extend(values);
                absorbed.push(shard);
            }
        }
        if absorbed.is_empty() {
            return Ok(0);
        }

        let body = self.format.encode_values(&merged)?;
        state.shards.finish_compaction(&primary, &absorbed, &body)?;
        self.refresh_stats(&state);
        Ok(absorbed.len())
    }

    // ---- internals -----------------------------------------------------

    fn refresh_stats(&self, state: &CollectionState) {
        let snapshot =
            CollectionStats::build(&self.name, state.shards.all_shard_info(), &state.indexes);
        *self.stats.lock() = Arc::new(snapshot);
    }

    fn write_manifest(&self, state: &CollectionState) -> Result<()> {
        let manifest = CollectionManifest {
            name: self.name.clone(),
            partition_key: state.partition_key.clone(),
            indexed_fields: state.indexes.indexed_fields(),
            codec: self.codec,
            format: self.format,
        };
        let bytes =
            serde_json::to_vec_pretty(&manifest).map_err(|e| Error::EncodeFailure(e.to_string()))?;
        atomic_write(&self.manifest_path, &bytes, self.file_protection)?;
        Ok(())
    }
}

fn tracked_fields(indexed: &[String], partition_key: Option<&str>) -> Vec<String> {
    let mut fields = indexed.to_vec();
    if let Some(pk) = partition_key {
        if !fields.iter().any(|f| f == pk) {
            fields.push(pk.to_string());
        }
    }
    fields.sort();
    fields
}

/// Run the driving predicate against the index. Results follow index
/// traversal order: ascending key, insertion order within a key.
fn probe_index(indexes: &IndexManager, predicate: &Predicate) -> Vec<Vec<u8>> {
    use crate::serialization::value::compare_scalar_strs;

    let field = predicate.field.as_str();
    let scalar = |v: &Value| stringify_scalar(v);
    match &predicate.op {
        Operator::Equal(v) => scalar(v)
            .map(|key| indexes.search(field, &key))
            .unwrap_or_default(),
        Operator::In(values) => {
            let mut keys: Vec<String> = values.iter().filter_map(|v| scalar(v)).collect();
            keys.sort_by(|a, b| compare_scalar_strs(a, b));
            keys.dedup_by(|a, b| compare_scalar_strs(a, b).is_eq());
            keys.iter()
                .flat_map(|key| indexes.search(field, key))
                .collect()
        }
        Operator::Between(low, high) => match (scalar(low), scalar(high)) {
            (Some(low), Some(high)) => {
                indexes.range_search(field, Some(&low), Some(&high), true)
            }
            _ => Vec::new(),
        },
        Operator::GreaterThan(v) => scalar(v)
            .map(|key| indexes.range_search(field, Some(&key), None, false))
            .unwrap_or_default(),
        Operator::GreaterOrEqual(v) => scalar(v)
            .map(|key| indexes.range_search(field, Some(&key), None, true))
            .unwrap_or_default(),
        Operator::LessThan(v) => scalar(v)
            .map(|key| indexes.range_search(field, None, Some(&key), false))
            .unwrap_or_default(),
        Operator::LessOrEqual(v) => scalar(v)
            .map(|key| indexes.range_search(field, None, Some(&key), true))
            .unwrap_or_default(),
        Operator::StartsWith(prefix) => {
            indexes.range_search(field, Some(prefix.as_str()), None, true)
        }
        // Not indexable; the planner never sends these here.
        Operator::NotEqual(_) | Operator::Contains(_) => Vec::new(),
    }
}
