//! Recursive merge of dynamic JSON values.
//!
//! Used to union the `ServerCapabilities` of every backend into the single
//! capability set advertised to the client. The rule is asymmetric on
//! purpose: where both sides carry a concrete leaf, the earlier backend
//! wins.

use serde_json::Value;

/// Merge `new` into `old` and return the result.
///
/// - null on either side yields the other side
/// - objects merge per key, recursing on keys present in both
/// - arrays union set-like, preserving `old`'s order
/// - anything else (scalar leaves, mismatched kinds) keeps `old`
pub fn merge(old: Value, new: Value) -> Value {
    match (old, new) {
        (old, Value::Null) => old,
        (Value::Null, new) => new,
        (Value::Object(mut old), Value::Object(new)) => {
            for (key, new_value) in new {
                match old.remove(&key) {
                    Some(old_value) => {
                        old.insert(key, merge(old_value, new_value));
                    }
                    None => {
                        old.insert(key, new_value);
                    }
                }
            }
            Value::Object(old)
        }
        (Value::Array(mut old), Value::Array(new)) => {
            for value in new {
                if !old.contains(&value) {
                    old.push(value);
                }
            }
            Value::Array(old)
        }
        (old, _) => old,
    }
}
