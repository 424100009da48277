use std::collections::HashMap;

use crate::index::manager::IndexManager;
use crate::storage::metadata::ShardInfo;

/// Summary of one secondary index, used for plan selection.
#[derive(Debug, Clone)]
pub struct IndexFieldStats {
    /// Total payloads stored in the index.
    pub entry_count: usize,
    /// Distinct keys in the index.
    pub distinct_keys: usize,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl IndexFieldStats {
    /// Expected records behind one key (at least one while non-empty).
    pub fn avg_bucket_size(&self) -> usize {
        if self.distinct_keys == 0 {
            0
        } else {
            self.entry_count.div_ceil(self.distinct_keys)
        }
    }
}

/// Immutable per-collection snapshot consumed by the query planner.
///
/// Rebuilt after every mutating operation while the collection mutator is
/// held; readers clone the `Arc` and plan against a frozen view.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub collection: String,
    pub document_count: usize,
    pub index_stats: HashMap<String, IndexFieldStats>,
    pub shard_stats: Vec<ShardInfo>,
}

impl CollectionStats {
    pub fn build(collection: &str, shard_stats: Vec<ShardInfo>, indexes: &IndexManager) -> Self {
        let document_count = shard_stats.iter().map(|s| s.document_count).sum();

        let mut index_stats = HashMap::new();
        for field in indexes.indexed_fields() {
            if let Some(index) = indexes.index(&field) {
                index_stats.insert(
                    field,
                    IndexFieldStats {
                        entry_count: index.entry_count(),
                        distinct_keys: index.key_count(),
                        min: index.min_key().map(|k| k.0.clone()),
                        max: index.max_key().map(|k| k.0.clone()),
                    },
                );
            }
        }

        CollectionStats {
            collection: collection.to_string(),
            document_count,
            index_stats,
            shard_stats,
        }
    }

    pub fn empty(collection: &str) -> Self {
        CollectionStats {
            collection: collection.to_string(),
            document_count: 0,
            index_stats: HashMap::new(),
            shard_stats: Vec::new(),
        }
    }
}
