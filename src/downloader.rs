use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook};

use crate::error::StockError;
use crate::table::TableSnapshot;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const HEADERS: [&str; 7] = [
    "Sr. No.",
    "Coil",
    "Unit",
    "Total Available Stock (MT)",
    "Block Stock (MT)",
    "Free Stock (MT)",
    "Tentative Shipment Date",
];
const COLUMN_WIDTHS: [f64; 7] = [8.0, 40.0, 8.0, 26.0, 18.0, 18.0, 26.0];
const THREE_DECIMALS: &str = "0.000";

/// A generated file ready to be offered as a download.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Download name for an export dated `as_at_date`, e.g. `Coils_Stock_20240301.xlsx`.
pub fn export_file_name(as_at_date: &str, extension: &str) -> String {
    format!("Coils_Stock_{}.{}", as_at_date.replace('-', ""), extension)
}

/// Convert the stock table to XLSX format
///
/// Writes a merged title row, a bold bordered header row, one row per coil
/// with the quantity columns shown to three decimals, and a totals row. The
/// sheet prints landscape, one page wide.
///
/// # Arguments
/// * `snapshot` - The table to export
///
/// # Returns
/// * `Result<ExportFile, StockError>` - The workbook bytes and download name, or an error
///
/// # Errors
/// * `StockError::EmptyTable` if there are no rows; no workbook is generated
pub fn to_xlsx(snapshot: &TableSnapshot) -> Result<ExportFile, StockError> {
    if snapshot.rows.is_empty() {
        return Err(StockError::EmptyTable("export"));
    }

    let title = Format::new()
        .set_bold()
        .set_font_size(14)
        .set_align(FormatAlign::Center);
    let header = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);
    let text = Format::new().set_border(FormatBorder::Thin);
    let number = Format::new()
        .set_num_format(THREE_DECIMALS)
        .set_border(FormatBorder::Thin);
    let total_label = Format::new().set_bold().set_border(FormatBorder::Thin);
    let total_number = Format::new()
        .set_bold()
        .set_num_format(THREE_DECIMALS)
        .set_border(FormatBorder::Thin);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Coils Stock")?;
    sheet.set_landscape();
    sheet.set_paper_size(9); // A4
    sheet.set_print_fit_to_pages(1, 0);

    let last_col = (HEADERS.len() - 1) as u16;
    sheet.merge_range(
        0,
        0,
        0,
        last_col,
        &format!("Coils Stock as at {}", snapshot.as_at_date),
        &title,
    )?;

    for (col, (name, width)) in HEADERS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(1, col, *name, &header)?;
        sheet.set_column_width(col, width)?;
    }
    sheet.set_freeze_panes(2, 0)?;

    let mut row_num: u32 = 2;
    for (i, row) in snapshot.rows.iter().enumerate() {
        sheet.write_number_with_format(row_num, 0, (i + 1) as f64, &text)?;
        sheet.write_string_with_format(row_num, 1, row.coil(), &text)?;
        sheet.write_string_with_format(row_num, 2, row.unit(), &text)?;
        sheet.write_number_with_format(row_num, 3, row.total_available_stock_mt(), &number)?;
        sheet.write_number_with_format(row_num, 4, row.block_stock_mt(), &number)?;
        sheet.write_number_with_format(row_num, 5, row.free_stock_mt(), &number)?;
        sheet.write_string_with_format(row_num, 6, row.tentative_shipment_date(), &text)?;
        row_num += 1;
    }

    let totals = snapshot.totals();
    sheet.merge_range(row_num, 0, row_num, 2, "Total", &total_label)?;
    sheet.write_number_with_format(row_num, 3, totals.total_available_stock_mt, &total_number)?;
    sheet.write_number_with_format(row_num, 4, totals.block_stock_mt, &total_number)?;
    sheet.write_number_with_format(row_num, 5, totals.free_stock_mt, &total_number)?;
    sheet.write_string_with_format(row_num, 6, "", &total_label)?;

    let bytes = workbook.save_to_buffer()?;
    log::info!(
        "generated xlsx export with {} rows ({} bytes)",
        snapshot.rows.len(),
        bytes.len()
    );

    Ok(ExportFile {
        file_name: export_file_name(&snapshot.as_at_date, "xlsx"),
        content_type: XLSX_CONTENT_TYPE,
        bytes,
    })
}

/// Convert the stock table to CSV format
///
/// Same columns as [`to_xlsx`] without the title and totals rows.
/// Fields containing commas, quotes or line breaks are quoted.
pub fn to_csv(snapshot: &TableSnapshot) -> Result<ExportFile, StockError> {
    if snapshot.rows.is_empty() {
        return Err(StockError::EmptyTable("export"));
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(HEADERS).map_err(csv_error)?;

    for (i, row) in snapshot.rows.iter().enumerate() {
        writer
            .write_record([
                (i + 1).to_string(),
                row.coil().to_string(),
                row.unit().to_string(),
                format!("{:.3}", row.total_available_stock_mt()),
                format!("{:.3}", row.block_stock_mt()),
                format!("{:.3}", row.free_stock_mt()),
                row.tentative_shipment_date().to_string(),
            ])
            .map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StockError::Export(e.to_string()))?;

    Ok(ExportFile {
        file_name: export_file_name(&snapshot.as_at_date, "csv"),
        content_type: CSV_CONTENT_TYPE,
        bytes,
    })
}

fn csv_error(err: csv::Error) -> StockError {
    StockError::Export(err.to_string())
}
