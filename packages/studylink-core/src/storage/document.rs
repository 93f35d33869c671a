//! Document field manipulation shared by the store adapters.
//!
//! These functions give both adapters identical merge, update and prefix
//! semantics.

use serde_json::Value;

use super::{FieldOp, Fields};
use crate::error::{Error, Result};

/// Upper bound appended to a prefix to form a range query.
pub const PREFIX_RANGE_END: char = '\u{f8ff}';

/// Deep-merge `incoming` into `target`. Nested objects merge key by key,
/// every other value replaces what was there.
pub fn merge_fields(target: &mut Fields, incoming: Fields) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_fields(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply one [`FieldOp`] to a document body.
pub fn apply_op(fields: &mut Fields, op: &FieldOp) -> Result<()> {
    let segments = split_path(op.path())?;
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| Error::Internal("empty field path".into()))?;

    match op {
        FieldOp::Delete { .. } => {
            if let Some(parent) = find_parent(fields, parents) {
                parent.remove(*leaf);
            }
        }
        FieldOp::Set { value, .. } => {
            let parent = ensure_parent(fields, parents)?;
            parent.insert(leaf.to_string(), value.clone());
        }
        FieldOp::ArrayUnion { values, .. } => {
            let parent = ensure_parent(fields, parents)?;
            let slot = parent
                .entry(leaf.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
        FieldOp::ArrayRemove { values, .. } => {
            let parent = ensure_parent(fields, parents)?;
            let slot = parent
                .entry(leaf.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(items) => items.retain(|item| !values.contains(item)),
                other => *other = Value::Array(Vec::new()),
            }
        }
    }
    Ok(())
}

/// True when the string at `field` sorts within `[prefix, prefix + U+F8FF]`.
pub fn prefix_matches(fields: &Fields, field: &str, prefix: &str) -> bool {
    match fields.get(field) {
        Some(Value::String(value)) => {
            let upper = prefix_upper_bound(prefix);
            value.as_str() >= prefix && value.as_str() <= upper.as_str()
        }
        _ => false,
    }
}

/// `prefix` followed by [`PREFIX_RANGE_END`].
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut upper = String::with_capacity(prefix.len() + PREFIX_RANGE_END.len_utf8());
    upper.push_str(prefix);
    upper.push(PREFIX_RANGE_END);
    upper
}

/// Interpret a stored JSON value as a document body.
pub fn into_fields(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::StorageCorrupted(format!(
            "document body is not an object: {}",
            other
        ))),
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Internal(format!("invalid field path '{}'", path)));
    }
    Ok(segments)
}

fn find_parent<'a>(fields: &'a mut Fields, parents: &[&str]) -> Option<&'a mut Fields> {
    let mut current = fields;
    for segment in parents {
        current = match current.get_mut(*segment) {
            Some(Value::Object(map)) => map,
            _ => return None,
        };
    }
    Some(current)
}

fn ensure_parent<'a>(fields: &'a mut Fields, parents: &[&str]) -> Result<&'a mut Fields> {
    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !slot.is_object() {
            *slot = Value::Object(Fields::new());
        }
        current = slot
            .as_object_mut()
            .ok_or_else(|| Error::Internal(format!("'{}' is not an object", segment)))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        into_fields(value).unwrap()
    }

    #[test]
    fn test_merge_keeps_unrelated_fields() {
        let mut doc = fields(json!({
            "friendIds": ["carol"],
            "pending": { "old": { "senderId": "a" } }
        }));
        merge_fields(
            &mut doc,
            fields(json!({ "pending": { "new": { "senderId": "b" } } })),
        );

        assert_eq!(doc["friendIds"], json!(["carol"]));
        assert!(doc["pending"].get("old").is_some());
        assert!(doc["pending"].get("new").is_some());
    }

    #[test]
    fn test_update_ops() {
        let mut doc = fields(json!({
            "friendIds": ["carol"],
            "pending": { "r1": { "senderId": "bob" } }
        }));

        apply_op(&mut doc, &FieldOp::array_union("friendIds", "bob")).unwrap();
        apply_op(&mut doc, &FieldOp::array_union("friendIds", "bob")).unwrap();
        apply_op(&mut doc, &FieldOp::delete("pending.r1")).unwrap();
        apply_op(&mut doc, &FieldOp::delete("pending.missing.deep")).unwrap();

        assert_eq!(doc["friendIds"], json!(["carol", "bob"]));
        assert_eq!(doc["pending"], json!({}));

        apply_op(&mut doc, &FieldOp::array_remove("friendIds", "carol")).unwrap();
        apply_op(&mut doc, &FieldOp::array_remove("friendIds", "nobody")).unwrap();
        assert_eq!(doc["friendIds"], json!(["bob"]));

        apply_op(&mut doc, &FieldOp::set("pending.r2.status", json!("pending"))).unwrap();
        assert_eq!(doc["pending"]["r2"]["status"], json!("pending"));
    }

    #[test]
    fn test_array_remove_on_missing_field_creates_empty_array() {
        let mut doc = Fields::new();
        apply_op(&mut doc, &FieldOp::array_remove("friendIds", "bob")).unwrap();
        assert_eq!(doc["friendIds"], json!([]));
    }

    #[test]
    fn test_invalid_path() {
        let mut doc = Fields::new();
        assert!(apply_op(&mut doc, &FieldOp::delete("pending..x")).is_err());
    }

    #[test]
    fn test_prefix_range() {
        let doc = fields(json!({ "username": "alice", "age": 3 }));
        assert!(prefix_matches(&doc, "username", "ali"));
        assert!(prefix_matches(&doc, "username", "alice"));
        assert!(prefix_matches(&doc, "username", ""));
        assert!(!prefix_matches(&doc, "username", "alx"));
        assert!(!prefix_matches(&doc, "username", "Ali"));
        assert!(!prefix_matches(&doc, "age", "3"));
        assert!(!prefix_matches(&doc, "email", "a"));
    }
}
