//! Cell value helpers
//!
//! Cells are `serde_json::Value`s. Join keys are compared through a canonical
//! text form so that values read from Postgres (`::text`), parsed from JSON or
//! typed in by users line up.

use serde_json::Value;

use crate::types::{ColumnType, parse_date};

const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Null and the empty string both mean "no value"
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Canonical text key of a cell, `None` for blank cells
///
/// Integral floats collapse to their integer form so `3.0` and `3` match.
pub fn value_key(value: &Value) -> Option<String> {
    if is_blank(value) {
        return None;
    }
    Some(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_key(n),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

fn number_key(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Text shown to users for a cell
pub fn render_value(value: &Value) -> String {
    value_key(value).unwrap_or_default()
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_date(value: &Value) -> Option<chrono::NaiveDate> {
    value.as_str().and_then(parse_date)
}

fn as_timestamp(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Type-aware equality used by the diff
///
/// Blank variants are equal to each other, numbers compare within a relative
/// tolerance, and dates compare by calendar day. Values that fail to parse as
/// their column type fall back to comparing their text keys.
pub fn values_equal(column_type: &ColumnType, a: &Value, b: &Value) -> bool {
    match (is_blank(a), is_blank(b)) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }

    let typed = match column_type {
        ColumnType::Integer | ColumnType::Decimal { .. } => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => {
                let scale = x.abs().max(y.abs()).max(1.0);
                Some((x - y).abs() <= RELATIVE_TOLERANCE * scale)
            }
            _ => None,
        },
        ColumnType::Boolean => match (as_bool(a), as_bool(b)) {
            (Some(x), Some(y)) => Some(x == y),
            _ => None,
        },
        ColumnType::Date => match (as_date(a), as_date(b)) {
            (Some(x), Some(y)) => Some(x == y),
            _ => None,
        },
        ColumnType::Timestamp => match (as_timestamp(a), as_timestamp(b)) {
            (Some(x), Some(y)) => Some(x == y),
            _ => None,
        },
        ColumnType::Json => Some(a == b),
        ColumnType::String | ColumnType::Enum { .. } => None,
    };

    typed.unwrap_or_else(|| value_key(a) == value_key(b))
}
