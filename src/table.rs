use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::aggregate::{Totals, totals};
use crate::error::StockError;
use crate::row::{Row, RowPatch};

pub const AS_AT_DATE_FORMAT: &str = "%Y-%m-%d";

/// The canonical, ordered stock table plus its two metadata fields.
///
/// Rows enter in bulk through [`TableState::replace_all`] and change one at a
/// time through [`TableState::patch_row`]; both keep every row's free stock
/// consistent with its inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct TableState {
    rows: Vec<Row>,
    as_at_date: String,
    source_file_name: String,
}

/// Read-only copy of the table handed to save, export and display.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub as_at_date: String,
    pub source_file_name: String,
    pub rows: Vec<Row>,
}

impl TableSnapshot {
    pub fn totals(&self) -> Totals {
        totals(&self.rows)
    }
}

impl Default for TableState {
    fn default() -> Self {
        Self::new()
    }
}

impl TableState {
    /// Empty table dated today.
    pub fn new() -> Self {
        TableState {
            rows: Vec::new(),
            as_at_date: today(),
            source_file_name: String::new(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn as_at_date(&self) -> &str {
        &self.as_at_date
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    /// Swap in a whole new row set, e.g. after an import or a load.
    pub fn replace_all(&mut self, rows: Vec<Row>, source_file_name: impl Into<String>) {
        self.rows = rows.into_iter().map(Row::recompute).collect();
        self.source_file_name = source_file_name.into();
    }

    /// Apply an edit to exactly one row.
    pub fn patch_row(&mut self, index: usize, patch: &RowPatch) -> Result<&Row, StockError> {
        let len = self.rows.len();
        let row = self
            .rows
            .get_mut(index)
            .ok_or(StockError::RowOutOfRange { index, len })?;
        *row = row.apply_patch(patch);
        Ok(row)
    }

    pub fn set_as_at_date(&mut self, date: &str) -> Result<(), StockError> {
        self.as_at_date = validate_as_at_date(date)?;
        Ok(())
    }

    /// Drop every row and the source file name; the as-at date resets to today.
    pub fn clear(&mut self) {
        *self = TableState::new();
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            as_at_date: self.as_at_date.clone(),
            source_file_name: self.source_file_name.clone(),
            rows: self.rows.clone(),
        }
    }

    pub fn totals(&self) -> Totals {
        totals(&self.rows)
    }
}

/// Check a `YYYY-MM-DD` date and return it in canonical form.
pub fn validate_as_at_date(date: &str) -> Result<String, StockError> {
    let trimmed = date.trim();
    NaiveDate::parse_from_str(trimmed, AS_AT_DATE_FORMAT)
        .map(|d| d.format(AS_AT_DATE_FORMAT).to_string())
        .map_err(|_| StockError::InvalidAsAtDate(date.to_string()))
}

fn today() -> String {
    Local::now().date_naive().format(AS_AT_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableState {
        let mut table = TableState::new();
        table.replace_all(
            vec![Row::new("A", 5.5), Row::new("B", 2.25), Row::new("C", 1.0)],
            "stock.xlsx",
        );
        table
    }

    #[test]
    fn replace_all_drops_previous_rows() {
        let mut table = sample();
        table.replace_all(vec![Row::new("Z", 9.0)], "next.xlsx");
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].coil(), "Z");
        assert_eq!(table.source_file_name(), "next.xlsx");
    }

    #[test]
    fn replace_all_keeps_free_stock_consistent() {
        let row = Row::new("A", 4.0).apply_patch(&RowPatch::block(1.0));
        let mut table = TableState::new();
        table.replace_all(vec![row], "loaded");
        assert_eq!(table.rows()[0].free_stock_mt(), 3.0);
    }

    #[test]
    fn patch_touches_only_the_target_row() {
        let mut table = sample();
        let before = table.snapshot();
        table.patch_row(1, &RowPatch::block(1.0)).unwrap();
        assert_eq!(table.rows()[0], before.rows[0]);
        assert_eq!(table.rows()[2], before.rows[2]);
        assert_eq!(table.rows()[1].free_stock_mt(), 1.25);
        assert!(table.rows().iter().all(Row::is_consistent));
    }

    #[test]
    fn patch_out_of_range_fails_without_change() {
        let mut table = sample();
        let before = table.clone();
        let err = table.patch_row(3, &RowPatch::block(1.0)).unwrap_err();
        assert!(matches!(err, StockError::RowOutOfRange { index: 3, len: 3 }));
        assert_eq!(table, before);
    }

    #[test]
    fn clear_empties_table() {
        let mut table = sample();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.source_file_name(), "");
    }

    #[test]
    fn as_at_date_is_validated() {
        let mut table = TableState::new();
        table.set_as_at_date("2024-03-01").unwrap();
        assert_eq!(table.as_at_date(), "2024-03-01");
        assert!(table.set_as_at_date("01/03/2024").is_err());
        assert!(table.set_as_at_date("2024-02-30").is_err());
        assert_eq!(table.as_at_date(), "2024-03-01");
    }

    #[test]
    fn snapshot_totals_match_rows() {
        let t = sample().snapshot().totals();
        assert_eq!(t.count, 3);
        assert_eq!(t.total_available_stock_mt, 8.75);
    }
}
