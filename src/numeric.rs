//! Lenient numeric parsing for imported cell values.

use serde_json::Value;

/// Convert an arbitrary cell value into a finite number.
///
/// Numbers pass through, text has thousands separators and surrounding
/// whitespace removed before parsing, and everything else (null, booleans,
/// arrays, objects, unparsable or non-finite text) becomes `0.0`.
///
/// # Examples
/// ```
/// use coilstock::numeric::parse_number;
/// use serde_json::json;
///
/// assert_eq!(parse_number(&json!("1,234.5")), 1234.5);
/// assert_eq!(parse_number(&json!(42)), 42.0);
/// assert_eq!(parse_number(&json!(null)), 0.0);
/// ```
pub fn parse_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => parse_text(s),
        _ => 0.0,
    }
}

/// Parse a text cell, treating anything that is not a finite number as zero.
pub fn parse_text(text: &str) -> f64 {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    match cleaned.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Round to three decimal places, halves away from zero.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
