use serde::{Deserialize, Serialize};

use crate::numeric::round3;

/// Display and storage unit for every stock quantity.
pub const UNIT_MT: &str = "MT";

/// One coil's stock record.
///
/// `free_stock_mt` is derived; it is only ever written by [`Row::recompute`],
/// so rows come from [`Row::new`], [`Row::apply_patch`] or deserialization,
/// which recomputes it too.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredRow")]
pub struct Row {
    coil: String,
    unit: String,
    total_available_stock_mt: f64,
    block_stock_mt: f64,
    free_stock_mt: f64,
    tentative_shipment_date: String,
}

// Field-for-field image of `Row` as stored or posted; the free stock it
// carries is ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRow {
    coil: String,
    unit: String,
    total_available_stock_mt: f64,
    block_stock_mt: f64,
    #[serde(rename = "freeStockMt", default)]
    _free_stock_mt: f64,
    tentative_shipment_date: String,
}

impl From<StoredRow> for Row {
    fn from(stored: StoredRow) -> Self {
        Row {
            coil: stored.coil,
            unit: stored.unit,
            total_available_stock_mt: stored.total_available_stock_mt,
            block_stock_mt: sanitize_block(stored.block_stock_mt),
            free_stock_mt: 0.0,
            tentative_shipment_date: stored.tentative_shipment_date,
        }
        .recompute()
    }
}

/// Partial update for the two user-editable fields of a row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowPatch {
    #[serde(default)]
    pub block_stock_mt: Option<f64>,
    #[serde(default)]
    pub tentative_shipment_date: Option<String>,
}

impl RowPatch {
    pub fn block(block_stock_mt: f64) -> Self {
        RowPatch {
            block_stock_mt: Some(block_stock_mt),
            ..Default::default()
        }
    }

    pub fn shipment_date(date: impl Into<String>) -> Self {
        RowPatch {
            tentative_shipment_date: Some(date.into()),
            ..Default::default()
        }
    }

}

impl Row {
    /// Freshly imported row: nothing blocked, no shipment date.
    pub fn new(coil: impl Into<String>, total_available_stock_mt: f64) -> Self {
        Row {
            coil: coil.into(),
            unit: UNIT_MT.to_string(),
            total_available_stock_mt: round3(total_available_stock_mt),
            block_stock_mt: 0.0,
            free_stock_mt: 0.0,
            tentative_shipment_date: String::new(),
        }
        .recompute()
    }

    pub fn coil(&self) -> &str {
        &self.coil
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn total_available_stock_mt(&self) -> f64 {
        self.total_available_stock_mt
    }

    pub fn block_stock_mt(&self) -> f64 {
        self.block_stock_mt
    }

    pub fn free_stock_mt(&self) -> f64 {
        self.free_stock_mt
    }

    pub fn tentative_shipment_date(&self) -> &str {
        &self.tentative_shipment_date
    }

    /// Free stock for the given inputs, floored at zero.
    pub fn free_stock_for(total_available_stock_mt: f64, block_stock_mt: f64) -> f64 {
        round3((total_available_stock_mt - block_stock_mt).max(0.0))
    }

    /// Return the row with `free_stock_mt` derived from its inputs again.
    pub fn recompute(mut self) -> Self {
        self.free_stock_mt = Self::free_stock_for(self.total_available_stock_mt, self.block_stock_mt);
        self
    }

    /// Merge `patch` onto a copy of this row and recompute free stock.
    ///
    /// Fields absent from the patch keep their current values; the total is
    /// never touched by an edit.
    pub fn apply_patch(&self, patch: &RowPatch) -> Row {
        let mut next = self.clone();
        if let Some(block) = patch.block_stock_mt {
            next.block_stock_mt = sanitize_block(block);
        }
        if let Some(date) = &patch.tentative_shipment_date {
            next.tentative_shipment_date = date.clone();
        }
        next.recompute()
    }

    pub fn is_consistent(&self) -> bool {
        self.free_stock_mt == Self::free_stock_for(self.total_available_stock_mt, self.block_stock_mt)
    }
}

// Blocked quantity is non-negative and finite; anything else counts as nothing blocked.
fn sanitize_block(block: f64) -> f64 {
    if block.is_finite() && block > 0.0 {
        block
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_row_has_everything_free() {
        let row = Row::new("Colorbond 0.42 Monument", 5.5);
        assert_eq!(row.unit, "MT");
        assert_eq!(row.block_stock_mt, 0.0);
        assert_eq!(row.free_stock_mt, 5.5);
        assert_eq!(row.tentative_shipment_date, "");
        assert!(row.is_consistent());
    }

    #[test]
    fn blocking_more_than_total_clamps_to_zero() {
        let row = Row::new("Zincalume 0.55", 5.5);
        let patched = row.apply_patch(&RowPatch::block(6.0));
        assert_eq!(patched.block_stock_mt, 6.0);
        assert_eq!(patched.free_stock_mt, 0.0);
        assert!(patched.is_consistent());
    }

    #[test]
    fn partial_block_is_rounded() {
        let row = Row::new("Colorbond", 7.75);
        let patched = row.apply_patch(&RowPatch::block(1.1234));
        assert_eq!(patched.free_stock_mt, 6.627);
    }

    #[test]
    fn date_patch_keeps_block_and_recomputes() {
        let row = Row::new("Colorbond", 3.0).apply_patch(&RowPatch::block(1.0));
        let patched = row.apply_patch(&RowPatch::shipment_date("Week 42"));
        assert_eq!(patched.block_stock_mt, 1.0);
        assert_eq!(patched.free_stock_mt, 2.0);
        assert_eq!(patched.tentative_shipment_date, "Week 42");
        assert_eq!(patched.total_available_stock_mt, 3.0);
    }

    #[test]
    fn negative_or_nan_block_counts_as_zero() {
        let row = Row::new("Colorbond", 2.0);
        assert_eq!(row.apply_patch(&RowPatch::block(-1.0)).free_stock_mt, 2.0);
        assert_eq!(row.apply_patch(&RowPatch::block(f64::NAN)).block_stock_mt, 0.0);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(Row::new("A", 1.0)).unwrap();
        assert_eq!(json["totalAvailableStockMt"], 1.0);
        assert_eq!(json["freeStockMt"], 1.0);
        assert_eq!(json["tentativeShipmentDate"], "");
    }

    #[test]
    fn deserializing_recomputes_free_stock() {
        let row: Row = serde_json::from_value(serde_json::json!({
            "coil": "CB Surfmist",
            "unit": "MT",
            "totalAvailableStockMt": 4.0,
            "blockStockMt": 1.0,
            "freeStockMt": 99.0,
            "tentativeShipmentDate": ""
        }))
        .unwrap();
        assert_eq!(row.free_stock_mt(), 3.0);
        assert!(row.is_consistent());
    }

    #[test]
    fn stored_form_round_trips_through_bincode() {
        let row = Row::new("ZA 0.55", 2.25).apply_patch(&RowPatch::block(0.5));
        let bytes = bincode::serialize(&row).unwrap();
        let back: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, row);
    }
}
