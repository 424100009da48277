use std::cmp::Ordering;

use serde_json::Value;

/// String form of a scalar field value. Strings pass through, numbers use
/// their canonical decimal form, booleans map to "true"/"false", null maps
/// to "null". Maps and arrays have no string form.
pub fn stringify_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Total order over scalar string forms. Two keys that both parse as finite
/// numbers compare numerically, everything else compares lexicographically.
///
/// This one comparator drives B-tree key order, shard bound pruning and
/// predicate evaluation, so an index probe, a targeted shard scan and a full
/// scan agree on which records match.
pub fn compare_scalar_strs(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        if x.is_finite() && y.is_finite() {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_stringify_canonically() {
        assert_eq!(stringify_scalar(&json!("Alice")).unwrap(), "Alice");
        assert_eq!(stringify_scalar(&json!(30)).unwrap(), "30");
        assert_eq!(stringify_scalar(&json!(30.5)).unwrap(), "30.5");
        assert_eq!(stringify_scalar(&json!(true)).unwrap(), "true");
        assert_eq!(stringify_scalar(&json!(null)).unwrap(), "null");
        assert!(stringify_scalar(&json!([1, 2])).is_none());
        assert!(stringify_scalar(&json!({"a": 1})).is_none());
    }

    #[test]
    fn numeric_strings_compare_numerically() {
        assert_eq!(compare_scalar_strs("9", "100"), Ordering::Less);
        assert_eq!(compare_scalar_strs("30", "30.0"), Ordering::Equal);
        assert_eq!(compare_scalar_strs("-5", "3"), Ordering::Less);
    }

    #[test]
    fn non_numeric_strings_compare_lexically() {
        assert_eq!(compare_scalar_strs("Alice", "Bob"), Ordering::Less);
        assert_eq!(compare_scalar_strs("Alice", "Alice"), Ordering::Equal);
        assert_eq!(compare_scalar_strs("10", "Bob"), Ordering::Less);
    }
}
