use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serialization::value::compare_scalar_strs;

/// Observed min/max string values of one tracked field within a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBounds {
    pub min: String,
    pub max: String,
}

impl FieldBounds {
    pub fn of(value: &str) -> Self {
        FieldBounds {
            min: value.to_string(),
            max: value.to_string(),
        }
    }

    pub fn observe(&mut self, value: &str) {
        if compare_scalar_strs(value, &self.min).is_lt() {
            self.min = value.to_string();
        }
        if compare_scalar_strs(value, &self.max).is_gt() {
            self.max = value.to_string();
        }
    }

    /// Whether `[min, max]` covers the given value.
    pub fn contains(&self, value: &str) -> bool {
        compare_scalar_strs(value, &self.min).is_ge() && compare_scalar_strs(value, &self.max).is_le()
    }

    /// Whether `[min, max]` overlaps the (optionally open-ended) range.
    pub fn overlaps(&self, low: Option<&str>, high: Option<&str>) -> bool {
        if let Some(low) = low {
            if compare_scalar_strs(&self.max, low).is_lt() {
                return false;
            }
        }
        if let Some(high) = high {
            if compare_scalar_strs(&self.min, high).is_gt() {
                return false;
            }
        }
        true
    }
}

/// Sidecar metadata persisted next to each shard payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMetadata {
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub field_stats: HashMap<String, FieldBounds>,
}

impl ShardMetadata {
    pub fn empty() -> Self {
        let now = Utc::now();
        ShardMetadata {
            document_count: 0,
            created_at: now,
            updated_at: now,
            field_stats: HashMap::new(),
        }
    }

    pub fn observe_field(&mut self, field: &str, value: &str) {
        self.field_stats
            .entry(field.to_string())
            .and_modify(|bounds| bounds.observe(value))
            .or_insert_with(|| FieldBounds::of(value));
    }
}

/// Point-in-time copy of one shard's identity and metadata.
#[derive(Debug, Clone)]
pub struct ShardInfo {
    pub id: String,
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub field_stats: HashMap<String, FieldBounds>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_grow_monotonically() {
        let mut bounds = FieldBounds::of("30");
        bounds.observe("25");
        bounds.observe("45");
        bounds.observe("35");
        assert_eq!(bounds.min, "25");
        assert_eq!(bounds.max, "45");
    }

    #[test]
    fn numeric_bounds_compare_numerically() {
        let mut bounds = FieldBounds::of("9");
        bounds.observe("100");
        assert_eq!(bounds.min, "9");
        assert_eq!(bounds.max, "100");
        assert!(bounds.contains("50"));
        assert!(!bounds.contains("8"));
    }

    #[test]
    fn overlap_handles_open_ranges() {
        let bounds = FieldBounds {
            min: "25".to_string(),
            max: "45".to_string(),
        };
        assert!(bounds.overlaps(Some("30"), Some("40")));
        assert!(bounds.overlaps(None, Some("25")));
        assert!(bounds.overlaps(Some("45"), None));
        assert!(!bounds.overlaps(Some("46"), None));
        assert!(!bounds.overlaps(None, Some("24")));
    }

    #[test]
    fn sidecar_serializes_with_camel_case_keys() {
        let mut meta = ShardMetadata::empty();
        meta.document_count = 2;
        meta.observe_field("age", "30");
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"documentCount\":2"));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"fieldStats\""));
    }
}
