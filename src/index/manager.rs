use std::cmp::Ordering;
use std::collections::HashMap;

use crate::index::btree::BTreeIndex;
use crate::serialization::value::compare_scalar_strs;

/// Default minimum degree for collection indexes.
const INDEX_MIN_DEGREE: usize = 16;

/// Index key over the string form of a field value. Ordering is
/// scalar-aware: numeric-looking keys compare numerically, everything else
/// lexicographically, matching predicate evaluation exactly.
#[derive(Debug, Clone)]
pub struct IndexKey(pub String);

impl IndexKey {
    pub fn new(value: impl Into<String>) -> Self {
        IndexKey(value.into())
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_scalar_strs(&self.0, &other.0)
    }
}

/// Named secondary indexes of one collection.
///
/// Lookups against fields that were never indexed return empty results
/// rather than errors, so the query planner can probe and fall through.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<String, BTreeIndex<IndexKey>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: creating an existing index keeps its contents.
    pub fn create_index(&mut self, field: &str) {
        self.indexes
            .entry(field.to_string())
            .or_insert_with(|| BTreeIndex::new(INDEX_MIN_DEGREE));
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.indexes.keys().cloned().collect();
        fields.sort();
        fields
    }

    pub fn index(&self, field: &str) -> Option<&BTreeIndex<IndexKey>> {
        self.indexes.get(field)
    }

    pub fn insert(&mut self, field: &str, key: &str, bytes: Vec<u8>) {
        if let Some(index) = self.indexes.get_mut(field) {
            index.insert(IndexKey::new(key), bytes);
        }
    }

    pub fn delete(&mut self, field: &str, key: &str, bytes: &[u8]) -> bool {
        match self.indexes.get_mut(field) {
            Some(index) => index.delete(&IndexKey::new(key), bytes),
            None => false,
        }
    }

    pub fn search(&self, field: &str, key: &str) -> Vec<Vec<u8>> {
        self.indexes
            .get(field)
            .and_then(|index| index.search(&IndexKey::new(key)))
            .map(|list| list.to_vec())
            .unwrap_or_default()
    }

    pub fn range_search(
        &self,
        field: &str,
        low: Option<&str>,
        high: Option<&str>,
        inclusive: bool,
    ) -> Vec<Vec<u8>> {
        match self.indexes.get(field) {
            Some(index) => {
                let low = low.map(IndexKey::new);
                let high = high.map(IndexKey::new);
                index.range_search(low.as_ref(), high.as_ref(), inclusive)
            }
            None => Vec::new(),
        }
    }

    /// Drop every index's contents but keep the index definitions. Used
    /// when a collection is rebuilt from scratch.
    pub fn clear(&mut self) {
        for index in self.indexes.values_mut() {
            *index = BTreeIndex::new(INDEX_MIN_DEGREE);
        }
    }
}
