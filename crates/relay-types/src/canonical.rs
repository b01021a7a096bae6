//! # Canonical Serialization
//!
//! The exact bytes that get signed and verified.
//!
//! Rules:
//! - object keys are sorted at every nesting level; keys that look like
//!   array indices come first in numeric order, every other key follows in
//!   UTF-16 code-unit order (the ordering a JavaScript producer observes)
//! - arrays keep their element order
//! - numbers use the shortest round-trip form, without a fraction for
//!   integral values
//! - every `/` in the output is escaped as `\/`
//!
//! Both sides of the bus call this module; any divergence breaks every
//! signature.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Canonical form of any JSON value.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out.replace('/', "\\/")
}

/// Canonical UTF-8 bytes of a field map.
#[must_use]
pub fn canonical_bytes(fields: &Map<String, Value>) -> Vec<u8> {
    let mut out = String::new();
    write_object(&mut out, fields);
    out.replace('/', "\\/").into_bytes()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| compare_keys(a, b));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_string(out: &mut String, s: &str) {
    // serde_json escapes exactly the characters JSON requires, like JSON.stringify.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if n.is_i64() || n.is_u64() {
        out.push_str(&n.to_string());
        return;
    }
    match n.as_f64() {
        Some(f) => out.push_str(&format_float(f)),
        None => out.push_str(&n.to_string()),
    }
}

/// Shortest round-trip decimal, laid out the way `Number.prototype.toString`
/// lays it out.
fn format_float(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if !f.is_finite() {
        return "null".to_string();
    }

    let sign = if f < 0.0 { "-" } else { "" };
    // `{:e}` yields the shortest digits that round-trip, e.g. "1.2345e-7".
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return format!("{f}"),
    };
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let exponent: i32 = match exponent.parse() {
        Ok(e) => e,
        Err(_) => return format!("{f}"),
    };

    let k = digits.len() as i32;
    let n = exponent + 1;

    let body = if k <= n && n <= 21 {
        format!("{digits}{}", "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int_part, frac_part) = digits.split_at(n as usize);
        format!("{int_part}.{frac_part}")
    } else if -6 < n && n <= 0 {
        format!("0.{}{digits}", "0".repeat((-n) as usize))
    } else {
        let exp_sign = if n - 1 >= 0 { "+" } else { "-" };
        let exp_abs = (n - 1).abs();
        if k == 1 {
            format!("{digits}e{exp_sign}{exp_abs}")
        } else {
            let (first, rest) = digits.split_at(1);
            format!("{first}.{rest}e{exp_sign}{exp_abs}")
        }
    };
    format!("{sign}{body}")
}

/// Canonical array index: a decimal integer below 2^32 - 1 without leading zeros.
fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|i| *i != u32::MAX)
}

fn compare_keys(a: &str, b: &str) -> Ordering {
    match (array_index(a), array_index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.encode_utf16().cmp(b.encode_utf16()),
    }
}
