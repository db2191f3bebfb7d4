// SPDX-License-Identifier: Apache-2.0
//! Canonical encoding for operation variables.
//!
//! Two watches of the same document are the same query entry exactly when
//! their variables encode to the same canonical text. Object keys are
//! emitted in sorted order; everything else follows compact JSON.

use std::collections::BTreeMap;

use serde_json::Value;

/// Encodes `value` as canonical compact JSON with sorted object keys.
#[must_use]
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Scalars and null: `Value`'s Display is already compact JSON.
        leaf => out.push_str(&leaf.to_string()),
    }
}
