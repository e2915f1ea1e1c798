use std::io::Cursor;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use serde_json::{Number, Value};

use crate::error::StockError;
use crate::normalizer::Record;

/// Read records from an uploaded Excel workbook (`.xlsx`, `.xls`, ...).
///
/// Only the first worksheet is read. Its first row supplies the field names
/// and every following non-blank row becomes one record. Blank cells are
/// returned as empty strings so every record carries every header.
///
/// # Arguments
/// * `bytes` - Raw contents of the uploaded file
///
/// # Returns
/// * `Result<Vec<Record>, StockError>` - The records in sheet order or an import error
pub fn from_excel(bytes: &[u8]) -> Result<Vec<Record>, StockError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| StockError::Import("No sheets found in workbook".to_string()))?;

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Ok(Vec::new()),
    };

    let records = rows
        .filter(|row| row.iter().any(|c| !is_blank(c)))
        .map(|row| {
            let cells = row.iter().map(cell_value).collect::<Vec<_>>();
            build_record(&headers, cells)
        })
        .collect();

    Ok(records)
}

/// Read records from CSV text using the same header-row convention as
/// [`from_excel`].
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Rows
/// with fewer fields than the header are padded with empty strings.
pub fn from_csv(text: &str) -> Result<Vec<Record>, StockError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = reader
        .records()
        .enumerate()
        .map(|(line, result)| {
            result.map_err(|e| StockError::Import(format!("CSV row {}: {}", line + 1, e)))
        })
        .filter(|result| match result {
            Ok(row) => row.iter().any(|field| !field.trim().is_empty()),
            Err(_) => true,
        });

    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row?.iter().map(|h| h.trim().to_string()).collect(),
        None => return Ok(Vec::new()),
    };

    rows.map(|row| {
        let cells = row?
            .iter()
            .map(|field| Value::String(field.to_string()))
            .collect();
        Ok(build_record(&headers, cells))
    })
    .collect()
}

/// Detect the upload type from its file name and parse it.
///
/// # Errors
/// * `StockError::Import` for unknown extensions or unreadable content
pub fn load_records(file_name: &str, bytes: &[u8]) -> Result<Vec<Record>, StockError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| StockError::Import(format!("CSV is not valid UTF-8: {}", e)))?;
            from_csv(text)
        }
        Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls") | Some("ods") => from_excel(bytes),
        Some(ext) => Err(StockError::Import(format!("Unsupported file extension: {}", ext))),
        None => Err(StockError::Import("File has no extension".to_string())),
    }
}

// Pair headers with cells; short rows are padded with empty strings.
fn build_record(headers: &[String], cells: Vec<Value>) -> Record {
    let mut cells = cells.into_iter();
    let mut record = Record::new();
    for header in headers {
        let value = cells.next().unwrap_or_else(|| Value::String(String::new()));
        if header.is_empty() {
            continue;
        }
        record.insert(header.clone(), value);
    }
    record
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::String(String::new()),
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::Number((*i).into()),
        Data::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(String::new())),
        Data::Bool(b) => Value::Bool(*b),
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "Item Category Code,Item Description,Total Quantity\n\
                          Colorbond,\"CB 0.42, Surfmist\",\"1,500\"\n\
                          steel,Plain,200\n";

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let records = from_csv(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Item Description"], json!("CB 0.42, Surfmist"));
        assert_eq!(records[0]["Total Quantity"], json!("1,500"));
        assert_eq!(records[1]["Item Category Code"], json!("steel"));
    }

    #[test]
    fn short_csv_rows_get_empty_strings() {
        let records = from_csv("A,B,C\n1\n").unwrap();
        assert_eq!(records[0]["B"], json!(""));
        assert_eq!(records[0]["C"], json!(""));
    }

    #[test]
    fn doubled_quotes_unescape() {
        let records = from_csv("A,B,C\na,\"say \"\"hi\"\"\",c\n").unwrap();
        assert_eq!(records[0]["B"], json!(r#"say "hi""#));
        assert_eq!(records[0]["C"], json!("c"));
    }

    #[test]
    fn quoted_line_breaks_stay_in_one_record() {
        let text = "Item Category Code,Item Description,Total Quantity\n\
                    Colorbond,\"CB Surfmist\n0.42mm\",5500\n\
                    Zincalume,ZA,2250\n";
        let records = from_csv(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Item Description"], json!("CB Surfmist\n0.42mm"));
        assert_eq!(records[0]["Total Quantity"], json!("5500"));

        let rows = crate::normalizer::normalize_records(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].coil(), "CB Surfmist\n0.42mm");
        assert_eq!(rows[0].total_available_stock_mt(), 5.5);
    }

    #[test]
    fn bom_and_blank_lines_are_ignored() {
        let records = from_csv("\u{feff}A,B\n\n1,2\n\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["A"], json!("1"));
    }

    #[test]
    fn extension_selects_parser() {
        assert_eq!(load_records("stock.CSV", SAMPLE.as_bytes()).unwrap().len(), 2);
        assert!(matches!(
            load_records("stock.txt", b"x"),
            Err(StockError::Import(_))
        ));
        assert!(matches!(load_records("stock", b"x"), Err(StockError::Import(_))));
    }

    #[test]
    fn garbage_workbook_is_an_import_error() {
        assert!(matches!(
            load_records("stock.xlsx", b"definitely not a zip"),
            Err(StockError::Import(_))
        ));
    }

    #[test]
    fn excel_cells_map_to_json_values() {
        assert_eq!(cell_value(&Data::Empty), json!(""));
        assert_eq!(cell_value(&Data::Int(5500)), json!(5500));
        assert_eq!(cell_value(&Data::Float(12.5)), json!(12.5));
        assert_eq!(cell_value(&Data::String("x".into())), json!("x"));
        assert!(is_blank(&Data::String("  ".into())));
    }
}
