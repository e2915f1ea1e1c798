use serde::Serialize;

use crate::numeric::round3;
use crate::row::Row;

/// Footer totals shown under the stock table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub count: usize,
    pub total_available_stock_mt: f64,
    pub block_stock_mt: f64,
    pub free_stock_mt: f64,
}

/// Sum every quantity column from scratch.
pub fn totals(rows: &[Row]) -> Totals {
    let (total, block, free) = rows.iter().fold((0.0, 0.0, 0.0), |(t, b, f), row| {
        (
            t + row.total_available_stock_mt(),
            b + row.block_stock_mt(),
            f + row.free_stock_mt(),
        )
    });

    Totals {
        count: rows.len(),
        total_available_stock_mt: round3(total),
        block_stock_mt: round3(block),
        free_stock_mt: round3(free),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowPatch;

    #[test]
    fn sums_available_stock() {
        let rows = vec![Row::new("A", 5.5), Row::new("B", 2.25)];
        let t = totals(&rows);
        assert_eq!(t.count, 2);
        assert_eq!(t.total_available_stock_mt, 7.75);
        assert_eq!(t.block_stock_mt, 0.0);
        assert_eq!(t.free_stock_mt, 7.75);
    }

    #[test]
    fn free_total_respects_clamping() {
        let rows = vec![
            Row::new("A", 5.5).apply_patch(&RowPatch::block(6.0)),
            Row::new("B", 2.25).apply_patch(&RowPatch::block(0.25)),
        ];
        let t = totals(&rows);
        assert_eq!(t.block_stock_mt, 6.25);
        assert_eq!(t.free_stock_mt, 2.0);
    }

    #[test]
    fn float_noise_is_rounded_away() {
        let rows = vec![Row::new("A", 0.1), Row::new("B", 0.2)];
        assert_eq!(totals(&rows).total_available_stock_mt, 0.3);
    }

    #[test]
    fn empty_table_is_all_zero() {
        assert_eq!(totals(&[]), Totals::default());
    }
}
