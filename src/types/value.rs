use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::condition::CompareOp;

// Attribute and feature values are plain JSON. Conditions authored for other
// engine implementations depend on JavaScript's loose coercions, so every
// comparison below mirrors what `==`, `<`, `+ ""` and `* 1` do there.

/// JavaScript truthiness. An absent value is falsy.
#[must_use]
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

/// String coercion (`value + ""`).
#[must_use]
pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                if item.is_null() {
                    String::new()
                } else {
                    to_js_string(item)
                }
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_owned(),
    }
}

/// Numeric coercion (`value * 1`). Returns NaN where JavaScript would.
#[must_use]
pub fn to_js_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => parse_js_number(s),
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => parse_js_number(&to_js_string(single)),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

fn parse_js_number(s: &str) -> f64 {
    let trimmed = s.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-')) =>
        {
            trimmed.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().map_or_else(|| n.to_string(), format_f64)
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn format_f64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_owned()
    } else if f.is_infinite() {
        let name = if f > 0.0 { "Infinity" } else { "-Infinity" };
        name.to_owned()
    } else if f == 0.0 {
        "0".to_owned()
    } else if f.abs() >= 1e21 || f.abs() < 1e-6 {
        // Exponent form with an explicit sign on positive exponents.
        let formatted = format!("{f:e}");
        match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => formatted,
        }
    } else if f.fract() == 0.0 && f.abs() < 1e18 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

/// Strict equality (`===`), extended structurally to arrays and objects.
#[must_use]
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => a == b,
    }
}

/// Compare an attribute value to an operand. Ordering operators follow the
/// abstract relational comparison: two strings compare by UTF-16 code
/// units, anything else numerically, and NaN never orders.
#[must_use]
pub fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => json_eq(actual, expected),
        CompareOp::Neq => !json_eq(actual, expected),
        CompareOp::Gt => js_cmp(actual, expected) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            js_cmp(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => js_cmp(actual, expected) == Some(Ordering::Less),
        CompareOp::Lte => matches!(
            js_cmp(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

fn js_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        _ => to_js_number(a).partial_cmp(&to_js_number(b)),
    }
}

/// Type tag used by the `$type` operator.
#[must_use]
pub fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
