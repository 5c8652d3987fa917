//! Canonical JSON emission for fingerprinting.
//!
//! Deterministic serialization of a `serde_json::Value`:
//!
//! 1. Object keys are emitted in lexicographic (byte-order) order at
//!    every nesting level.
//! 2. Arrays whose elements are all scalars (null, bool, number, string)
//!    are sorted by their canonical emission. Arrays containing objects
//!    or arrays keep producer order — the aggregator already emits those
//!    deterministically.
//! 3. No whitespace between tokens.
//!
//! This keeps merge/ordering nondeterminism in upstream producers from
//! causing spurious hash churn.

use std::fmt::Write as _;

use serde_json::Value;

/// Emits `value` in canonical form.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut output = String::new();
    emit_value(value, &mut output);
    output
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(output, "{n}");
        },
        Value::String(s) => emit_string(s, output),
        Value::Array(items) => {
            output.push('[');
            if items.iter().all(is_scalar) {
                let mut rendered: Vec<String> = items.iter().map(canonicalize).collect();
                rendered.sort();
                for (i, item) in rendered.iter().enumerate() {
                    if i > 0 {
                        output.push(',');
                    }
                    output.push_str(item);
                }
            } else {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        output.push(',');
                    }
                    emit_value(item, output);
                }
            }
            output.push(']');
        },
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            output.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    output.push(',');
                }
                emit_string(key, output);
                output.push(':');
                emit_value(&fields[*key], output);
            }
            output.push('}');
        },
    }
}

/// Minimal JSON string escaping: quote, backslash, and the control
/// range U+0000..=U+001F (short escapes where defined).
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}
