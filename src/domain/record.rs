//! Flat record representation and reference-field flattening
//!
//! Remote ITSM records carry "reference" fields whose raw value is a nested
//! object `{"value": <id>, "display_value": <label>}`. Everything downstream
//! of the fetcher works on flat records only, so flattening happens exactly
//! once, at ingestion.

use serde_json::Value;

/// An ordered mapping from field name to scalar value.
///
/// Invariant: after [`flatten_record`] no value is itself an object.
pub type Record = serde_json::Map<String, Value>;

/// Prefix for the display-value companion field of a flattened reference.
pub const DISPLAY_VALUE_PREFIX: &str = "dv_";

/// Flattens every reference field of `record` in place and returns it.
///
/// For each field `F` whose value is an object containing the key `"value"`,
/// the field is rewritten in place to `F = value` and a companion `dv_F` is
/// set to the object's `"display_value"` (empty string when absent).
/// Non-reference fields pass through unchanged and keep their position;
/// companions append. Re-flattening an already-flat record is a no-op.
pub fn flatten_record(mut record: Record) -> Record {
    let keys: Vec<String> = record
        .iter()
        .filter(|(_, v)| is_reference(v))
        .map(|(k, _)| k.clone())
        .collect();

    for key in keys {
        // Taking the value in place keeps the key's slot in the ordered
        // map; removal would shuffle later fields.
        let taken = match record.get_mut(&key) {
            Some(value) => std::mem::take(value),
            None => continue,
        };
        let obj = match taken {
            Value::Object(obj) => obj,
            // A companion write may have replaced the value since the key
            // was collected; put it back untouched.
            other => {
                record.insert(key, other);
                continue;
            }
        };
        let id = obj.get("value").cloned().unwrap_or(Value::Null);
        let display = obj
            .get("display_value")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        record.insert(key.clone(), id);
        record.insert(
            format!("{DISPLAY_VALUE_PREFIX}{key}"),
            Value::String(display),
        );
    }

    record
}

fn is_reference(value: &Value) -> bool {
    matches!(value, Value::Object(obj) if obj.contains_key("value"))
}

/// Returns the record's value for `field` as a non-empty string, if any.
///
/// Numbers are stringified so a numeric natural key still matches its
/// stored text form.
pub fn key_value(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
