//! Per-session state holder tying the stock table to its collaborators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::Totals;
use crate::downloader::{self, ExportFile};
use crate::error::StockError;
use crate::loader;
use crate::login::{Accounts, Identity, Session};
use crate::normalizer::{Record, normalize_records};
use crate::row::{Row, RowPatch};
use crate::saving::{DocumentStore, STOCK_DOCUMENT_KEY, TableDocument};
use crate::table::{TableSnapshot, TableState, validate_as_at_date};

/// What an import did to the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub source_file_name: String,
    pub records_read: usize,
    pub rows_kept: usize,
}

/// Result of reading the shared document.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { rows: usize, updated_at: Option<DateTime<Utc>> },
    NothingSaved,
}

/// One signed-in user's view of the stock table.
///
/// Every mutation goes through `&mut self`, so two actions can never overlap
/// on the same workspace; the web layer additionally wraps it in a
/// [`TaskGuard`](crate::guard::TaskGuard) so overlapping requests are rejected.
pub struct Workspace {
    identity: Option<Identity>,
    table: TableState,
    store: Arc<dyn DocumentStore>,
    last_seen_update: Option<DateTime<Utc>>,
}

impl Workspace {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Workspace {
            identity: None,
            table: TableState::new(),
            store,
            last_seen_update: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn table(&self) -> &TableState {
        &self.table
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.table.snapshot()
    }

    pub fn totals(&self) -> Totals {
        self.table.totals()
    }

    /// Authenticate and remember the identity. Loading is a separate step.
    pub fn sign_in(
        &mut self,
        accounts: &Accounts,
        email: &str,
        password: &str,
    ) -> Result<Session, StockError> {
        let session = accounts.sign_in(email, password)?;
        self.attach_identity(session.identity.clone());
        Ok(session)
    }

    /// Adopt an identity that was authenticated elsewhere.
    pub fn attach_identity(&mut self, identity: Identity) {
        if self.identity.as_ref() != Some(&identity) {
            self.table.clear();
            self.last_seen_update = None;
        }
        self.identity = Some(identity);
    }

    /// Forget the identity and everything in the table.
    pub fn sign_out(&mut self, accounts: &Accounts, session_id: &str) {
        accounts.sign_out(session_id);
        self.detach_identity();
    }

    pub fn detach_identity(&mut self) {
        self.identity = None;
        self.table.clear();
        self.last_seen_update = None;
    }

    /// Replace the table with the shared document, if one has been saved.
    ///
    /// Stored rows are recomputed on the way in, so a stale or hand-edited
    /// document cannot break the free-stock invariant.
    pub fn load(&mut self) -> Result<LoadOutcome, StockError> {
        self.require_identity()?;

        let document = match self.store.get(STOCK_DOCUMENT_KEY) {
            Ok(Some(document)) => document,
            Ok(None) => {
                log::info!("no saved stock table yet");
                return Ok(LoadOutcome::NothingSaved);
            }
            Err(e) => {
                log::error!("failed to load stock table: {}", e);
                return Err(e);
            }
        };

        let rows = document.rows.len();
        self.table.replace_all(document.rows, document.source_file_name);
        if let Err(e) = self.table.set_as_at_date(&document.as_at_date) {
            log::warn!("stored document has {}; keeping {}", e, self.table.as_at_date());
        }
        self.last_seen_update = document.updated_at;

        log::info!("loaded {} rows saved at {:?}", rows, document.updated_at);
        Ok(LoadOutcome::Loaded {
            rows,
            updated_at: document.updated_at,
        })
    }

    /// Parse an uploaded file and replace the whole table with its rows.
    ///
    /// On any parse failure the table is left as it was.
    pub fn import(&mut self, file_name: &str, bytes: &[u8]) -> Result<ImportSummary, StockError> {
        let records = loader::load_records(file_name, bytes).map_err(|e| {
            log::error!("import of {} failed: {}", file_name, e);
            e
        })?;
        Ok(self.import_records(file_name, &records))
    }

    pub fn import_records(&mut self, file_name: &str, records: &[Record]) -> ImportSummary {
        let rows = normalize_records(records);
        let summary = ImportSummary {
            source_file_name: file_name.to_string(),
            records_read: records.len(),
            rows_kept: rows.len(),
        };
        self.table.replace_all(rows, file_name);
        log::info!(
            "imported {}: kept {} of {} records",
            file_name,
            summary.rows_kept,
            summary.records_read
        );
        summary
    }

    /// Edit one row's block quantity and/or shipment date.
    pub fn edit(&mut self, index: usize, patch: &RowPatch) -> Result<Row, StockError> {
        self.table.patch_row(index, patch).cloned()
    }

    pub fn set_as_at_date(&mut self, date: &str) -> Result<(), StockError> {
        self.table.set_as_at_date(date)
    }

    /// Overwrite the shared document with this table.
    ///
    /// Last write wins. If someone else saved since this workspace last read
    /// or wrote the document, a warning is logged and the save goes ahead.
    pub fn save(&mut self) -> Result<TableDocument, StockError> {
        let identity = self.require_identity()?.clone();
        if self.table.is_empty() {
            return Err(StockError::EmptyTable("save"));
        }
        validate_as_at_date(self.table.as_at_date())?;

        match self.store.get(STOCK_DOCUMENT_KEY) {
            Ok(Some(remote)) if remote.updated_at > self.last_seen_update => {
                log::warn!(
                    "{} is overwriting a stock table saved at {:?} that this session never loaded",
                    identity.email,
                    remote.updated_at
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("could not read current stock table before saving: {}", e),
        }

        let saved = self
            .store
            .set(STOCK_DOCUMENT_KEY, TableDocument::from(self.table.snapshot()))
            .map_err(|e| {
                log::error!("failed to save stock table: {}", e);
                e
            })?;
        self.last_seen_update = saved.updated_at;

        log::info!("{} saved {} rows", identity.email, saved.rows.len());
        Ok(saved)
    }

    /// Delete the shared document and clear the table.
    pub fn delete(&mut self) -> Result<(), StockError> {
        let identity = self.require_identity()?.clone();
        self.store.delete(STOCK_DOCUMENT_KEY).map_err(|e| {
            log::error!("failed to delete stock table: {}", e);
            e
        })?;
        self.table.clear();
        self.last_seen_update = None;
        log::info!("{} deleted the stock table", identity.email);
        Ok(())
    }

    pub fn export_xlsx(&self) -> Result<ExportFile, StockError> {
        downloader::to_xlsx(&self.table.snapshot())
    }

    pub fn export_csv(&self) -> Result<ExportFile, StockError> {
        downloader::to_csv(&self.table.snapshot())
    }

    fn require_identity(&self) -> Result<&Identity, StockError> {
        self.identity.as_ref().ok_or(StockError::NotSignedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saving::MemoryStore;

    const CSV: &str = "Item Category Code,Item Description,Total Quantity\n\
                       Colorbond,CB Surfmist,5500\n\
                       steel,Plain,100\n\
                       ZincAlume,ZA 0.55,\"2,250\"\n";

    fn identity() -> Identity {
        Identity {
            email: "planner@example.com".to_string(),
        }
    }

    fn signed_in(store: Arc<MemoryStore>) -> Workspace {
        let mut ws = Workspace::new(store);
        ws.attach_identity(identity());
        ws
    }

    #[test]
    fn import_filters_and_converts() {
        let mut ws = signed_in(Arc::new(MemoryStore::new()));
        let summary = ws.import("stock.csv", CSV.as_bytes()).unwrap();
        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.rows_kept, 2);
        assert_eq!(ws.table().source_file_name(), "stock.csv");

        let totals = ws.totals();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.total_available_stock_mt, 7.75);
    }

    #[test]
    fn failed_import_keeps_previous_rows() {
        let mut ws = signed_in(Arc::new(MemoryStore::new()));
        ws.import("stock.csv", CSV.as_bytes()).unwrap();
        let before = ws.snapshot();
        assert!(ws.import("stock.pdf", b"%PDF").is_err());
        assert_eq!(ws.snapshot(), before);
    }

    #[test]
    fn save_without_identity_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let mut ws = Workspace::new(store.clone());
        ws.import("stock.csv", CSV.as_bytes()).unwrap();

        assert!(matches!(ws.save(), Err(StockError::NotSignedIn)));
        assert!(store.get(STOCK_DOCUMENT_KEY).unwrap().is_none());
        assert!(matches!(ws.load(), Err(StockError::NotSignedIn)));
        assert!(matches!(ws.delete(), Err(StockError::NotSignedIn)));
    }

    #[test]
    fn empty_table_cannot_be_saved_or_exported() {
        let store = Arc::new(MemoryStore::new());
        let mut ws = signed_in(store.clone());
        assert!(matches!(ws.save(), Err(StockError::EmptyTable("save"))));
        assert!(matches!(ws.export_xlsx(), Err(StockError::EmptyTable("export"))));
        assert!(store.get(STOCK_DOCUMENT_KEY).unwrap().is_none());
    }

    #[test]
    fn save_then_load_in_another_workspace() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = signed_in(store.clone());
        writer.import("stock.csv", CSV.as_bytes()).unwrap();
        writer.set_as_at_date("2024-03-01").unwrap();
        writer.edit(0, &RowPatch::block(6.0)).unwrap();
        writer.edit(1, &RowPatch::shipment_date("Week 12")).unwrap();
        let saved = writer.save().unwrap();
        assert!(saved.updated_at.is_some());

        let mut reader = signed_in(store);
        let outcome = reader.load().unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                rows: 2,
                updated_at: saved.updated_at
            }
        );
        assert_eq!(reader.snapshot(), writer.snapshot());
        assert_eq!(reader.table().rows()[0].free_stock_mt(), 0.0);
    }

    #[test]
    fn load_with_nothing_saved_keeps_table() {
        let mut ws = signed_in(Arc::new(MemoryStore::new()));
        ws.import("stock.csv", CSV.as_bytes()).unwrap();
        assert_eq!(ws.load().unwrap(), LoadOutcome::NothingSaved);
        assert_eq!(ws.table().len(), 2);
    }

    #[test]
    fn save_overwrites_a_newer_remote_document() {
        let store = Arc::new(MemoryStore::new());
        let mut first = signed_in(store.clone());
        let mut second = signed_in(store.clone());
        first.import("a.csv", CSV.as_bytes()).unwrap();
        second.import("b.csv", CSV.as_bytes()).unwrap();

        first.save().unwrap();
        second.save().unwrap();
        let remote = store.get(STOCK_DOCUMENT_KEY).unwrap().unwrap();
        assert_eq!(remote.source_file_name, "b.csv");
    }

    #[test]
    fn delete_removes_document_and_clears_table() {
        let store = Arc::new(MemoryStore::new());
        let mut ws = signed_in(store.clone());
        ws.import("stock.csv", CSV.as_bytes()).unwrap();
        ws.save().unwrap();
        ws.delete().unwrap();
        assert!(ws.table().is_empty());
        assert!(store.get(STOCK_DOCUMENT_KEY).unwrap().is_none());
    }

    #[test]
    fn edit_out_of_range_is_an_error() {
        let mut ws = signed_in(Arc::new(MemoryStore::new()));
        ws.import("stock.csv", CSV.as_bytes()).unwrap();
        assert!(matches!(
            ws.edit(5, &RowPatch::block(1.0)),
            Err(StockError::RowOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn switching_identity_clears_table() {
        let mut ws = signed_in(Arc::new(MemoryStore::new()));
        ws.import("stock.csv", CSV.as_bytes()).unwrap();
        ws.attach_identity(identity());
        assert_eq!(ws.table().len(), 2);
        ws.attach_identity(Identity {
            email: "other@example.com".to_string(),
        });
        assert!(ws.table().is_empty());
        ws.detach_identity();
        assert!(ws.identity().is_none());
    }
}
