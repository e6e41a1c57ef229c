//! Canonical JSON: sorted keys at every level, no whitespace, minimal string escaping.
//! Signing input and AEAD associated data are both computed from this form.
//!
//! Integers, and floats with no fractional part below 1e21, are written as plain integers
//! (`1.0` becomes `1`). Other floats use the shortest round-trip form serde_json prints, so
//! exponents read `1e21` where JavaScript would print `1e+21`.

use serde_json::{Number, Value};

/// Canonical UTF-8 bytes of `value`.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    canonical_json_bytes_excluding(value, &[])
}

/// Canonical bytes of `value` with the given object keys dropped at every nesting level.
pub fn canonical_json_bytes_excluding(value: &Value, exclude: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_value(&mut out, value, exclude);
    out
}

/// Re-canonicalize JSON text. Canonical input is returned byte-identical.
pub fn canonicalize(bytes: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(canonical_json_bytes(&value))
}

fn write_number(out: &mut Vec<u8>, n: &Number) {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => {
            out.extend_from_slice((f as i128).to_string().as_bytes())
        }
        _ => out.extend_from_slice(n.to_string().as_bytes()),
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value, exclude: &[&str]) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item, exclude);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Sorted explicitly: serde_json's map order depends on the `preserve_order` feature.
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !exclude.contains(&k.as_str()))
                .collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                write_value(out, &map[key.as_str()], exclude);
            }
            out.push(b'}');
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}
