use std::cmp::Ordering;

use serde_json::Value;

use crate::serialization::value::{compare_scalar_strs, stringify_scalar};

/// One comparison over a named top-level field. Multiple predicates on a
/// query conjunct.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Operator) -> Self {
        Predicate {
            field: field.into(),
            op,
        }
    }

    /// Evaluate against a decoded document. A document without the field
    /// (or with a non-scalar value there) never matches.
    pub fn matches(&self, document: &Value) -> bool {
        match document.get(&self.field).and_then(stringify_scalar) {
            Some(actual) => self.op.matches_scalar(&actual),
            None => false,
        }
    }
}

/// Comparison operators of the query DSL. Operands are scalar values;
/// comparisons use the same scalar-aware ordering as the indexes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    LessThan(Value),
    GreaterOrEqual(Value),
    LessOrEqual(Value),
    /// Inclusive on both ends.
    Between(Value, Value),
    In(Vec<Value>),
    StartsWith(String),
    Contains(String),
}

impl Operator {
    pub fn equal(value: impl Into<Value>) -> Self {
        Operator::Equal(value.into())
    }

    pub fn not_equal(value: impl Into<Value>) -> Self {
        Operator::NotEqual(value.into())
    }

    pub fn greater_than(value: impl Into<Value>) -> Self {
        Operator::GreaterThan(value.into())
    }

    pub fn less_than(value: impl Into<Value>) -> Self {
        Operator::LessThan(value.into())
    }

    pub fn greater_or_equal(value: impl Into<Value>) -> Self {
        Operator::GreaterOrEqual(value.into())
    }

    pub fn less_or_equal(value: impl Into<Value>) -> Self {
        Operator::LessOrEqual(value.into())
    }

    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Operator::Between(low.into(), high.into())
    }

    pub fn in_list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Operator::In(values.into_iter().map(Into::into).collect())
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Operator::StartsWith(prefix.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Operator::Contains(needle.into())
    }

    /// Whether an index over the field can drive this operator.
    pub fn is_indexable(&self) -> bool {
        !matches!(self, Operator::NotEqual(_) | Operator::Contains(_))
    }

    /// Equality-class operators probe single keys; everything else walks a
    /// key range. The planner prefers equality.
    pub fn is_equality(&self) -> bool {
        matches!(self, Operator::Equal(_) | Operator::In(_))
    }

    pub(crate) fn matches_scalar(&self, actual: &str) -> bool {
        let cmp = |operand: &Value| -> Option<Ordering> {
            stringify_scalar(operand).map(|s| compare_scalar_strs(actual, &s))
        };
        match self {
            Operator::Equal(v) => cmp(v) == Some(Ordering::Equal),
            Operator::NotEqual(v) => matches!(cmp(v), Some(o) if o != Ordering::Equal),
            Operator::GreaterThan(v) => cmp(v) == Some(Ordering::Greater),
            Operator::LessThan(v) => cmp(v) == Some(Ordering::Less),
            Operator::GreaterOrEqual(v) => matches!(cmp(v), Some(o) if o != Ordering::Less),
            Operator::LessOrEqual(v) => matches!(cmp(v), Some(o) if o != Ordering::Greater),
            Operator::Between(low, high) => {
                matches!(cmp(low), Some(o) if o != Ordering::Less)
                    && matches!(cmp(high), Some(o) if o != Ordering::Greater)
            }
            Operator::In(values) => values.iter().any(|v| cmp(v) == Some(Ordering::Equal)),
            Operator::StartsWith(prefix) => actual.starts_with(prefix.as_str()),
            Operator::Contains(needle) => actual.contains(needle.as_str()),
        }
    }
}
