use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::compression::codec::Codec;
use crate::core::error::{Error, Result};
use crate::serialization::WireFormat;
use crate::storage::layout::{sidecar_for, validate_partition_value, SHARD_EXTENSION};
use crate::storage::metadata::ShardInfo;
use crate::storage::shard::Shard;

/// Owns the shards of one collection and maps partition value to shard.
///
/// `tracked_fields` is the set of fields whose min/max bounds every shard
/// maintains: the collection's indexed fields plus its partition field, so
/// the planner can prune shards even after compaction has mixed partitions
/// into one file.
#[derive(Debug)]
pub struct ShardManager {
    dir: PathBuf,
    codec: Codec,
    format: WireFormat,
    file_protection: Option<u32>,
    tracked_fields: RwLock<Vec<String>>,
    shards: RwLock<HashMap<String, Arc<Shard>>>,
}

impl ShardManager {
    pub fn new(
        dir: PathBuf,
        codec: Codec,
        format: WireFormat,
        file_protection: Option<u32>,
    ) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(ShardManager {
            dir,
            codec,
            format,
            file_protection,
            tracked_fields: RwLock::new(Vec::new()),
            shards: RwLock::new(HashMap::new()),
        })
    }

    /// Open every `*.nyaru` payload already present in the collection
    /// directory.
    pub fn load_existing(&self) -> Result<()> {
        let tracked = self.tracked_fields();
        let mut map = self.shards.write();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let shard = Shard::open(&id, path, self.file_protection, &tracked)?;
            map.insert(id, Arc::new(shard));
        }
        debug!(shards = map.len(), "loaded collection shards");
        Ok(())
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn tracked_fields(&self) -> Vec<String> {
        self.tracked_fields.read().clone()
    }

    pub fn set_tracked_fields(&self, fields: Vec<String>) {
        *self.tracked_fields.write() = fields;
    }

    /// Idempotent shard creation; concurrent callers observe the same
    /// instance.
    pub fn get_or_create_shard(&self, partition: &str) -> Result<Arc<Shard>> {
        if let Some(shard) = self.shards.read().get(partition) {
            return Ok(shard.clone());
        }

        validate_partition_value(partition)?;
        let mut map = self.shards.write();
        if let Some(shard) = map.get(partition) {
            return Ok(shard.clone());
        }
        let path = self.dir.join(format!("{}.{}", partition, SHARD_EXTENSION));
        let shard = Arc::new(Shard::create(
            partition,
            path,
            self.codec,
            self.format,
            self.file_protection,
        )?);
        map.insert(partition.to_string(), shard.clone());
        Ok(shard)
    }

    pub fn get_shard(&self, id: &str) -> Result<Arc<Shard>> {
        self.shards
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ShardNotFound(id.to_string()))
    }

    pub fn all_shards(&self) -> Vec<Arc<Shard>> {
        let mut shards: Vec<_> = self.shards.read().values().cloned().collect();
        // Deterministic scan order for a given set of shards.
        shards.sort_by(|a, b| a.id().cmp(b.id()));
        shards
    }

    pub fn all_shard_info(&self) -> Vec<ShardInfo> {
        self.all_shards().iter().map(|s| s.info()).collect()
    }

    /// Route one encoded record to its partition's shard.
    pub fn append(&self, partition: &str, record_bytes: &[u8]) -> Result<Arc<Shard>> {
        let shard = self.get_or_create_shard(partition)?;
        shard.append(record_bytes, &self.tracked_fields())?;
        Ok(shard)
    }

    /// Drop every shard, files included. Used by repartitioning.
    pub fn remove_all_shards(&self) -> Result<()> {
        let mut map = self.shards.write();
        for shard in map.values() {
            shard.delete_files()?;
        }
        map.clear();
        Ok(())
    }

    /// Delete shards with no documents; returns how many were removed.
    pub fn cleanup_empty_shards(&self) -> Result<usize> {
        let mut map = self.shards.write();
        let empty: Vec<String> = map
            .iter()
            .filter(|(_, shard)| shard.doc_count() == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &empty {
            if let Some(shard) = map.remove(id) {
                shard.delete_files()?;
            }
        }
        Ok(empty.len())
    }

    /// Shards small enough to merge, oldest first.
    pub fn compaction_candidates(&self, threshold: usize) -> Vec<Arc<Shard>> {
        let mut candidates: Vec<_> = self
            .shards
            .read()
            .values()
            .filter(|shard| shard.doc_count() < threshold)
            .cloned()
            .collect();
        candidates.sort_by_key(|shard| (shard.created_at(), shard.id().to_string()));
        candidates
    }

    /// Second half of a compaction pass: swap the merged body into the
    /// primary and drop the absorbed shards. Runs under the collection
    /// mutator.
    pub fn finish_compaction(
        &self,
        primary: &Arc<Shard>,
        absorbed: &[Arc<Shard>],
        merged_body: &[u8],
    ) -> Result<()> {
        primary.set_raw_body(merged_body, &self.tracked_fields())?;
        let mut map = self.shards.write();
        for shard in absorbed {
            shard.delete_files()?;
            map.remove(shard.id());
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shards.read().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, ShardManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ShardManager::new(
            dir.path().join("Users"),
            Codec::None,
            WireFormat::TagTree,
            None,
        )
        .unwrap();
        (dir, manager)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (_dir, manager) = manager();
        let first = manager.get_or_create_shard("east").unwrap();
        let second = manager.get_or_create_shard("east").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.all_shards().len(), 1);
    }

    #[test]
    fn missing_shard_lookup_fails() {
        let (_dir, manager) = manager();
        assert!(matches!(
            manager.get_shard("west"),
            Err(Error::ShardNotFound(id)) if id == "west"
        ));
    }

    #[test]
    fn cleanup_removes_only_empty_shards() {
        let (_dir, manager) = manager();
        manager.get_or_create_shard("empty").unwrap();
        let record = serde_json::json!({"region": "east"});
        let bytes = WireFormat::TagTree.encode(&record).unwrap();
        manager.append("east", &bytes).unwrap();

        assert_eq!(manager.cleanup_empty_shards().unwrap(), 1);
        assert!(manager.get_shard("empty").is_err());
        assert_eq!(manager.get_shard("east").unwrap().doc_count(), 1);
    }

    #[test]
    fn load_existing_restores_the_map() {
        let dir = tempfile::tempdir().unwrap();
        let collection_dir = dir.path().join("Users");
        {
            let manager = ShardManager::new(
                collection_dir.clone(),
                Codec::None,
                WireFormat::TagTree,
                None,
            )
            .unwrap();
            let bytes = WireFormat::TagTree
                .encode(&serde_json::json!({"region": "east"}))
                .unwrap();
            manager.append("east", &bytes).unwrap();
        }

        let manager =
            ShardManager::new(collection_dir, Codec::None, WireFormat::TagTree, None).unwrap();
        manager.load_existing().unwrap();
        assert_eq!(manager.get_shard("east").unwrap().doc_count(), 1);
    }
}
