use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::collection::Collection;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::{CollectionStats, IndexFieldStats};
use crate::core::types::Deadline;
use crate::query::builder::Query;
use crate::query::executor::DocumentStream;
use crate::query::planner::QueryPlan;
use crate::query::predicate::Predicate;
use crate::serialization::Record;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::storage::metadata::ShardInfo;

/// Embedded document database engine.
///
/// One directory per collection under the configured base path. Writes are
/// serialized per collection; reads run against published snapshots and
/// stream lazily. Collections are created on first insert.
pub struct Database {
    config: Config,
    layout: StorageLayout,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    _lock: FileLock,
}

impl Database {
    /// Open (or initialize) the engine at `config.path`, reloading every
    /// collection found on disk.
    pub fn open(config: Config) -> Result<Self> {
        let layout = StorageLayout::new(config.path.clone())?;
        let lock = FileLock::acquire(&layout.lock_path())?;

        let mut collections = HashMap::new();
        for entry in fs::read_dir(&layout.base_dir)? {
            let path = entry?.path();
            if !path.is_dir() || !path.join("collection.json").is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let collection = Collection::open(name, &layout, &config)?;
            collections.insert(name.to_string(), collection);
        }
        debug!(collections = collections.len(), "opened database");

        Ok(Database {
            config,
            layout,
            collections: RwLock::new(collections),
            _lock: lock,
        })
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.operation_timeout)
    }

    fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    fn get_or_create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(collection) = self.get_collection(name) {
            return Ok(collection);
        }
        let mut map = self.collections.write();
        if let Some(collection) = map.get(name) {
            return Ok(collection.clone());
        }
        let collection = Collection::create(name, &self.layout, &self.config)?;
        map.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    // ---- writes --------------------------------------------------------

    pub fn insert<T: Record>(&self, collection: &str, document: &T) -> Result<()> {
        self.get_or_create_collection(collection)?
            .insert_record(document)
    }

    pub fn bulk_insert<T: Record>(&self, collection: &str, documents: &[T]) -> Result<()> {
        self.get_or_create_collection(collection)?
            .bulk_insert(documents, self.deadline())
    }

    /// Replace every matching record with `document`; errors with
    /// [`crate::Error::DocumentNotFound`] when nothing matched.
    pub fn update<T, F>(&self, collection: &str, document: &T, matches: F) -> Result<usize>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        self.get_or_create_collection(collection)?
            .update(document, matches, self.deadline())
    }

    /// Remove every matching record; returns how many were removed.
    pub fn delete<T, F>(&self, collection: &str, matches: F) -> Result<usize>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        match self.get_collection(collection) {
            Some(c) => c.delete(matches, self.deadline()),
            None => Ok(0),
        }
    }

    // ---- reads ---------------------------------------------------------

    /// All documents of a collection, eagerly collected.
    pub fn fetch<T: Record>(&self, collection: &str) -> Result<Vec<T>> {
        self.fetch_stream(collection)?.collect()
    }

    /// All documents of a collection as a lazy stream.
    pub fn fetch_stream<T: Record>(&self, collection: &str) -> Result<DocumentStream<T>> {
        self.stream_with(collection, Vec::new())
    }

    /// Start a composable query against a collection.
    pub fn query<T: Record>(&self, collection: &str) -> Query<'_, T> {
        Query::new(self, collection)
    }

    pub(crate) fn stream_with<T: Record>(
        &self,
        collection: &str,
        predicates: Vec<Predicate>,
    ) -> Result<DocumentStream<T>> {
        match self.get_collection(collection) {
            Some(c) => Ok(c.stream(predicates, self.deadline())),
            None => Ok(DocumentStream::over_shards(
                Vec::new(),
                predicates,
                Default::default(),
                self.deadline(),
            )),
        }
    }

    pub(crate) fn plan_with(&self, collection: &str, predicates: &[Predicate]) -> QueryPlan {
        match self.get_collection(collection) {
            Some(c) => c.plan(predicates),
            None => QueryPlan::FullScan,
        }
    }

    // ---- schema and maintenance ----------------------------------------

    /// Create a secondary index (idempotent) and backfill it from the
    /// collection's existing shards.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        self.get_or_create_collection(collection)?.create_index(field)
    }

    /// Route future inserts of the collection by this field.
    pub fn set_partition_key(&self, collection: &str, field: &str) -> Result<()> {
        self.get_or_create_collection(collection)?
            .set_partition_key(field)
    }

    /// Re-shard every stored record by a new partition field.
    pub fn repartition_collection(&self, collection: &str, field: &str) -> Result<()> {
        self.get_or_create_collection(collection)?
            .repartition(field, self.deadline())
    }

    /// Remove a collection and everything it stores.
    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        let removed = self.collections.write().remove(collection);
        if let Some(c) = removed {
            c.shutdown();
            fs::remove_dir_all(self.layout.collection_dir(collection))?;
            debug!(collection, "dropped collection");
        }
        Ok(())
    }

    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count_documents(&self, collection: &str) -> Result<usize> {
        Ok(self
            .get_collection(collection)
            .map(|c| c.count_documents())
            .unwrap_or(0))
    }

    /// Per-index summaries from the collection's latest stats snapshot.
    pub fn index_stats(&self, collection: &str) -> Result<HashMap<String, IndexFieldStats>> {
        Ok(self
            .collection_stats(collection)
            .map(|s| s.index_stats.clone())
            .unwrap_or_default())
    }

    /// Per-shard metadata from the collection's latest stats snapshot.
    pub fn shard_stats(&self, collection: &str) -> Result<Vec<ShardInfo>> {
        Ok(self
            .collection_stats(collection)
            .map(|s| s.shard_stats.clone())
            .unwrap_or_default())
    }

    fn collection_stats(&self, collection: &str) -> Option<Arc<CollectionStats>> {
        self.get_collection(collection).map(|c| c.stats())
    }

    /// Delete shards holding no documents; returns how many were removed.
    pub fn cleanup_empty_shards(&self, collection: &str) -> Result<usize> {
        match self.get_collection(collection) {
            Some(c) => c.cleanup_empty_shards(),
            None => Ok(0),
        }
    }

    /// Run one compaction pass immediately instead of waiting for the
    /// background interval.
    pub fn compact_collection(&self, collection: &str) -> Result<usize> {
        match self.get_collection(collection) {
            Some(c) => c.compact_once(self.config.compaction_threshold),
            None => Ok(0),
        }
    }

    /// Stop background work for every collection. Called automatically on
    /// drop; exposed for deterministic teardown.
    pub fn close(&self) {
        for collection in self.collections.read().values() {
            collection.shutdown();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}
