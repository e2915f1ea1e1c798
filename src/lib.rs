/*!
# Coil Stock

A small web service for keeping the shared coil stock table up to date.

## Overview

A signed-in user uploads the stock report exported from the ERP, the rows are
filtered down to the coil categories we carry and converted from kilograms to
metric tons, blocked quantities and tentative shipment dates are filled in by
hand, and the resulting table is saved for everyone and exported as a
formatted Excel sheet.

## Architecture

### Core
- **numeric**: lenient cell-to-number parsing and 3-decimal rounding
- **row**: the stock row, edit patches, and free-stock recomputation
- **normalizer**: category filter and unit conversion for imported records
- **aggregate**: column totals
- **table**: the ordered row list with its as-at date and source file name

### Collaborators
- **loader**: `.xlsx`/`.xls`/`.csv` uploads to records (calamine, csv)
- **downloader**: formatted `.xlsx` and `.csv` exports (rust_xlsxwriter, csv)
- **saving**: the single shared table document (gzip + bincode files)
- **login**: accounts with argon2 password hashes and in-memory sessions

### Session layer
- **workspace**: one user's table and identity, with load/import/edit/save/delete/export
- **guard**: single-slot action guard that rejects overlapping actions
- **app**: axum routes and cookie sessions (`web` feature)

## Free stock

Free stock is always `round3(max(total - blocked, 0))`. It is never entered
directly; every path that changes a row recomputes it.

## REST API Endpoints

- `POST /api/login`, `POST /api/logout` - Session management
- `GET /api/table` - Rows, totals and metadata
- `POST /api/import` - Multipart upload replacing all rows
- `PATCH /api/rows/{index}` - Edit block stock / shipment date
- `PUT /api/as-at-date` - Change the as-at date
- `POST /api/save`, `POST /api/load`, `DELETE /api/document` - Shared document
- `GET /api/export`, `GET /api/export.csv` - Downloads
*/

pub mod aggregate;
pub mod config;
pub mod downloader;
pub mod error;
pub mod guard;
pub mod loader;
pub mod login;
pub mod normalizer;
pub mod numeric;
pub mod row;
pub mod saving;
pub mod table;
pub mod workspace;

#[cfg(feature = "web")]
pub mod app;

pub use aggregate::{Totals, totals};
pub use error::StockError;
pub use row::{Row, RowPatch};
pub use saving::{DocumentStore, FileStore, MemoryStore, STOCK_DOCUMENT_KEY, TableDocument};
pub use table::{TableSnapshot, TableState};
pub use workspace::Workspace;
