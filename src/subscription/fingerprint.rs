//! Canonical identity of a `(query_path, args)` pair.
//!
//! Arguments are first mapped to their wire form, then written as JSON with
//! object keys sorted at every level. Two argument values therefore share a
//! fingerprint exactly when they would be sent as the same wire payload up
//! to key order:
//!
//! - key order is ignored, array order is significant
//! - `Int64(5)`, `Float(5.0)` and `"5"` are three different arguments
//! - no arguments (`None`) is the same as an empty object

use serde_json::Value as JsonValue;

use crate::codec::{encode_value, EncodeOptions, Value};
use crate::error::Result;

/// Separates the query path from the canonical arguments. Query paths are
/// identifiers and never contain it.
const SEPARATOR: char = '\u{1f}';

/// Compute the dedup fingerprint for a subscription.
pub fn query_fingerprint(query_path: &str, args: Option<&Value>) -> Result<String> {
    let wire = match args {
        None | Some(Value::Undefined) => JsonValue::Object(Default::default()),
        Some(value) => encode_value(value, &EncodeOptions::default())?,
    };
    let mut out = String::with_capacity(query_path.len() + 32);
    out.push_str(query_path);
    out.push(SEPARATOR);
    write_canonical(&wire, &mut out);
    Ok(out)
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}
