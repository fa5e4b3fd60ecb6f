//! Canonical JSON encoding.
//!
//! The canonical form (lexicographically sorted object keys, no
//! insignificant whitespace, shortest number rendering) is what gets
//! base64url-encoded as AEAD associated data and covered by envelope
//! signatures. Two peers serializing the same public data must produce
//! byte-identical output.

use crate::{Result, SecsyncError};
use serde_json::Value;

/// Canonicalize a JSON value.
pub fn canonicalize(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, entry)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_value(entry, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        // Scalars already render in shortest form.
        other => {
            let rendered = serde_json::to_string(other)
                .map_err(|e| SecsyncError::serialization(e.to_string()))?;
            out.push_str(&rendered);
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<()> {
    let rendered =
        serde_json::to_string(s).map_err(|e| SecsyncError::serialization(e.to_string()))?;
    out.push_str(&rendered);
    Ok(())
}

/// Canonicalize any serializable value.
pub fn canonicalize_serializable<T: serde::Serialize>(value: &T) -> Result<String> {
    let json =
        serde_json::to_value(value).map_err(|e| SecsyncError::serialization(e.to_string()))?;
    canonicalize(&json)
}
