//! Turns imported spreadsheet records into canonical stock rows.

use serde_json::{Map, Value};

use crate::numeric::{parse_number, round3};
use crate::row::Row;

/// One record from the first sheet of an upload, keyed by header text.
pub type Record = Map<String, Value>;

pub const CATEGORY_FIELD: &str = "Item Category Code";
pub const DESCRIPTION_FIELD: &str = "Item Description";
pub const QUANTITY_FIELD: &str = "Total Quantity";

/// Material categories kept on import, already trimmed and lower-cased.
pub const ALLOWED_CATEGORIES: [&str; 3] = ["colorbond", "zincalume", "galvanised"];

const KG_PER_MT: f64 = 1000.0;

/// Trimmed, lower-cased category of a record; empty when the field is missing.
pub fn category_key(record: &Record) -> String {
    field_text(record, CATEGORY_FIELD).trim().to_lowercase()
}

pub fn is_allowed_category(key: &str) -> bool {
    ALLOWED_CATEGORIES.contains(&key)
}

/// Build the row for a single record, or `None` when it is filtered out.
pub fn normalize_record(record: &Record) -> Option<Row> {
    if !is_allowed_category(&category_key(record)) {
        return None;
    }

    let coil = field_text(record, DESCRIPTION_FIELD).trim().to_string();
    if coil.is_empty() {
        return None;
    }

    let kilograms = record.get(QUANTITY_FIELD).map(parse_number).unwrap_or(0.0);
    Some(Row::new(coil, round3(kilograms / KG_PER_MT)))
}

/// Normalize a whole upload, preserving record order.
pub fn normalize_records(records: &[Record]) -> Vec<Row> {
    let rows: Vec<Row> = records.iter().filter_map(normalize_record).collect();
    log::debug!("normalized {} of {} imported records", rows.len(), records.len());
    rows
}

// Text view of a field: strings as-is, whole numbers without a fraction,
// other numbers via Display, anything else empty.
fn field_text(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        _ => String::new(),
    }
}
