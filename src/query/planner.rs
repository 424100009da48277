use crate::core::stats::{CollectionStats, IndexFieldStats};
use crate::query::predicate::{Operator, Predicate};
use crate::serialization::value::stringify_scalar;
use crate::storage::metadata::FieldBounds;

/// Execution strategy chosen for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Probe the secondary index driven by this predicate; remaining
    /// predicates filter the probed records.
    IndexScan { predicate: Predicate },
    /// Scan only the shards whose bounds for the partition field overlap
    /// the predicate.
    ShardScan {
        field: String,
        shard_ids: Vec<String>,
    },
    /// Scan every shard of the collection.
    FullScan,
}

/// Pick the strategy for a conjunction of predicates.
///
/// Order: the most selective indexable predicate with an index wins, then
/// a shard-pruning predicate on the partition field, then a full scan.
/// Ties break deterministically: equality before range, lower estimate
/// before higher, field name last.
pub fn plan_query(
    predicates: &[Predicate],
    stats: &CollectionStats,
    partition_field: Option<&str>,
) -> QueryPlan {
    let mut best: Option<(usize, usize, String, Predicate)> = None;
    for predicate in predicates {
        if !predicate.op.is_indexable() {
            continue;
        }
        let Some(field_stats) = stats.index_stats.get(&predicate.field) else {
            continue;
        };
        let class = if predicate.op.is_equality() { 0 } else { 1 };
        let estimate = estimate_index_matches(&predicate.op, field_stats);
        let better = match &best {
            None => true,
            Some((c, e, f, _)) => (class, estimate, predicate.field.as_str()) < (*c, *e, f.as_str()),
        };
        if better {
            best = Some((class, estimate, predicate.field.clone(), predicate.clone()));
        }
    }
    if let Some((_, _, _, predicate)) = best {
        return QueryPlan::IndexScan { predicate };
    }

    if let Some(partition_field) = partition_field {
        let candidate = predicates
            .iter()
            .filter(|p| p.field == partition_field && p.op.is_indexable())
            .min_by_key(|p| if p.op.is_equality() { 0 } else { 1 });
        if let Some(predicate) = candidate {
            let mut shard_ids: Vec<String> = stats
                .shard_stats
                .iter()
                .filter(|shard| {
                    shard_may_match(shard.field_stats.get(partition_field), &predicate.op)
                })
                .map(|shard| shard.id.clone())
                .collect();
            shard_ids.sort();
            return QueryPlan::ShardScan {
                field: partition_field.to_string(),
                shard_ids,
            };
        }
    }

    QueryPlan::FullScan
}

/// Expected matching records for an index probe, from the index summary.
fn estimate_index_matches(op: &Operator, stats: &IndexFieldStats) -> usize {
    match op {
        Operator::Equal(_) => stats.avg_bucket_size(),
        Operator::In(values) => stats.avg_bucket_size() * values.len(),
        Operator::Between(_, _)
        | Operator::GreaterThan(_)
        | Operator::LessThan(_)
        | Operator::GreaterOrEqual(_)
        | Operator::LessOrEqual(_) => stats.entry_count.div_ceil(2),
        Operator::StartsWith(_) => stats.entry_count.div_ceil(3),
        Operator::NotEqual(_) | Operator::Contains(_) => stats.entry_count,
    }
}

/// Conservative overlap test between one shard's `[min, max]` bounds and a
/// predicate. Shards without bounds for the field are always scanned.
fn shard_may_match(bounds: Option<&FieldBounds>, op: &Operator) -> bool {
    let Some(bounds) = bounds else {
        return true;
    };
    let scalar = |v: &serde_json::Value| stringify_scalar(v);
    match op {
        Operator::Equal(v) => scalar(v).map_or(true, |s| bounds.contains(&s)),
        Operator::In(values) => values
            .iter()
            .any(|v| scalar(v).map_or(true, |s| bounds.contains(&s))),
        Operator::Between(low, high) => {
            let low = scalar(low);
            let high = scalar(high);
            bounds.overlaps(low.as_deref(), high.as_deref())
        }
        Operator::GreaterThan(v) | Operator::GreaterOrEqual(v) => {
            scalar(v).map_or(true, |s| bounds.overlaps(Some(&s), None))
        }
        Operator::LessThan(v) | Operator::LessOrEqual(v) => {
            scalar(v).map_or(true, |s| bounds.overlaps(None, Some(&s)))
        }
        Operator::StartsWith(prefix) => bounds.overlaps(Some(prefix), None),
        Operator::NotEqual(_) | Operator::Contains(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stats::IndexFieldStats;
    use crate::storage::metadata::ShardInfo;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn stats_with_index(field: &str, entries: usize, keys: usize) -> CollectionStats {
        let mut stats = CollectionStats::empty("Users");
        stats.index_stats.insert(
            field.to_string(),
            IndexFieldStats {
                entry_count: entries,
                distinct_keys: keys,
                min: None,
                max: None,
            },
        );
        stats
    }

    fn shard_entry(id: &str, field: &str, min: &str, max: &str) -> ShardInfo {
        let mut field_stats = HashMap::new();
        field_stats.insert(
            field.to_string(),
            FieldBounds {
                min: min.to_string(),
                max: max.to_string(),
            },
        );
        ShardInfo {
            id: id.to_string(),
            document_count: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            field_stats,
        }
    }

    #[test]
    fn indexed_predicate_wins_over_partition() {
        let mut stats = stats_with_index("name", 100, 50);
        stats.shard_stats.push(shard_entry("east", "region", "east", "east"));
        let predicates = vec![
            Predicate::new("region", Operator::equal("east")),
            Predicate::new("name", Operator::equal("Alice")),
        ];
        let plan = plan_query(&predicates, &stats, Some("region"));
        assert_eq!(
            plan,
            QueryPlan::IndexScan {
                predicate: predicates[1].clone()
            }
        );
    }

    #[test]
    fn equality_beats_range_on_the_same_index() {
        let mut stats = stats_with_index("age", 100, 10);
        stats
            .index_stats
            .insert("score".to_string(), IndexFieldStats {
                entry_count: 4,
                distinct_keys: 4,
                min: None,
                max: None,
            });
        let predicates = vec![
            // Range over a tiny index still loses to equality.
            Predicate::new("score", Operator::greater_than(1)),
            Predicate::new("age", Operator::equal(30)),
        ];
        let plan = plan_query(&predicates, &stats, None);
        assert_eq!(
            plan,
            QueryPlan::IndexScan {
                predicate: predicates[1].clone()
            }
        );
    }

    #[test]
    fn partition_predicate_prunes_shards() {
        let mut stats = CollectionStats::empty("Users");
        stats.shard_stats.push(shard_entry("east", "region", "east", "east"));
        stats.shard_stats.push(shard_entry("west", "region", "west", "west"));
        let predicates = vec![Predicate::new("region", Operator::equal("west"))];
        let plan = plan_query(&predicates, &stats, Some("region"));
        assert_eq!(
            plan,
            QueryPlan::ShardScan {
                field: "region".to_string(),
                shard_ids: vec!["west".to_string()],
            }
        );
    }

    #[test]
    fn numeric_partition_range_prunes_numerically() {
        let mut stats = CollectionStats::empty("Metrics");
        stats.shard_stats.push(shard_entry("9", "bucket", "9", "9"));
        stats.shard_stats.push(shard_entry("100", "bucket", "100", "100"));
        let predicates = vec![Predicate::new("bucket", Operator::greater_than(50))];
        let plan = plan_query(&predicates, &stats, Some("bucket"));
        assert_eq!(
            plan,
            QueryPlan::ShardScan {
                field: "bucket".to_string(),
                shard_ids: vec!["100".to_string()],
            }
        );
    }

    #[test]
    fn no_usable_predicate_falls_back_to_full_scan() {
        let stats = stats_with_index("name", 10, 10);
        let predicates = vec![
            Predicate::new("name", Operator::contains("li")),
            Predicate::new("age", Operator::equal(json!(30))),
        ];
        assert_eq!(plan_query(&predicates, &stats, None), QueryPlan::FullScan);
        assert_eq!(plan_query(&[], &stats, None), QueryPlan::FullScan);
    }
}
