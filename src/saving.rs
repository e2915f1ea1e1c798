use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StockError;
use crate::row::Row;
use crate::table::TableSnapshot;

/// The one well-known key the shared stock table lives under.
pub const STOCK_DOCUMENT_KEY: &str = "coils_stock";

/// The persisted stock table.
///
/// `updated_at` is assigned by the store on every write; whatever the caller
/// puts there is overwritten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDocument {
    pub as_at_date: String,
    pub source_file_name: String,
    pub rows: Vec<Row>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<TableSnapshot> for TableDocument {
    fn from(snapshot: TableSnapshot) -> Self {
        TableDocument {
            as_at_date: snapshot.as_at_date,
            source_file_name: snapshot.source_file_name,
            rows: snapshot.rows,
            updated_at: None,
        }
    }
}

/// Key-value document store holding whole table documents.
///
/// Writes are full overwrites; there is no version check, so the last writer wins.
pub trait DocumentStore: Send + Sync {
    /// Read the document under `key`, or `None` if nothing is stored.
    fn get(&self, key: &str) -> Result<Option<TableDocument>, StockError>;

    /// Overwrite the document under `key`, returning it with `updated_at` set.
    fn set(&self, key: &str, document: TableDocument) -> Result<TableDocument, StockError>;

    /// Remove the document under `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StockError>;
}

/// Stores each document as a gzip-compressed bincode file in a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StockError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.bin.gz", safe))
    }
}

impl DocumentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<TableDocument>, StockError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        load_document(&path).map(Some)
    }

    fn set(&self, key: &str, mut document: TableDocument) -> Result<TableDocument, StockError> {
        document.updated_at = Some(Utc::now());
        save_document(&document, &self.path_for(key), &self.dir)?;
        Ok(document)
    }

    fn delete(&self, key: &str) -> Result<(), StockError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// Write through a temp file in the same directory so readers never see a partial document.
fn save_document(document: &TableDocument, path: &Path, dir: &Path) -> Result<(), StockError> {
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, document)?;
        let encoder = writer
            .into_inner()
            .map_err(|e| StockError::Io(e.into_error()))?;
        encoder.finish()?.flush()?;
    }
    tmp.persist(path).map_err(|e| StockError::Io(e.error))?;
    Ok(())
}

fn load_document(path: &Path) -> Result<TableDocument, StockError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);
    Ok(deserialize_from(&mut reader)?)
}

/// In-process store, used by tests and throwaway servers.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, TableDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<TableDocument>, StockError> {
        let documents = self
            .documents
            .read()
            .map_err(|_| StockError::Storage("memory store poisoned".to_string()))?;
        Ok(documents.get(key).cloned())
    }

    fn set(&self, key: &str, mut document: TableDocument) -> Result<TableDocument, StockError> {
        document.updated_at = Some(Utc::now());
        let mut documents = self
            .documents
            .write()
            .map_err(|_| StockError::Storage("memory store poisoned".to_string()))?;
        documents.insert(key.to_string(), document.clone());
        Ok(document)
    }

    fn delete(&self, key: &str) -> Result<(), StockError> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| StockError::Storage("memory store poisoned".to_string()))?;
        documents.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowPatch;

    fn document() -> TableDocument {
        TableDocument {
            as_at_date: "2024-03-01".to_string(),
            source_file_name: "stock.xlsx".to_string(),
            rows: vec![
                Row::new("CB Surfmist", 5.5).apply_patch(&RowPatch::block(2.0)),
                Row::new("ZA 0.55", 2.25).apply_patch(&RowPatch::shipment_date("Week 12")),
            ],
            updated_at: None,
        }
    }

    #[test]
    fn file_store_keeps_what_was_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get(STOCK_DOCUMENT_KEY).unwrap().is_none());

        let saved = store.set(STOCK_DOCUMENT_KEY, document()).unwrap();
        assert!(saved.updated_at.is_some());

        let loaded = store.get(STOCK_DOCUMENT_KEY).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(store.path_for(STOCK_DOCUMENT_KEY).exists());
    }

    #[test]
    fn file_store_overwrites_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set(STOCK_DOCUMENT_KEY, document()).unwrap();

        let mut smaller = document();
        smaller.rows.truncate(1);
        smaller.source_file_name = "other.xlsx".to_string();
        store.set(STOCK_DOCUMENT_KEY, smaller).unwrap();

        let loaded = store.get(STOCK_DOCUMENT_KEY).unwrap().unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.source_file_name, "other.xlsx");
    }

    #[test]
    fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set(STOCK_DOCUMENT_KEY, document()).unwrap();
        store.delete(STOCK_DOCUMENT_KEY).unwrap();
        store.delete(STOCK_DOCUMENT_KEY).unwrap();
        assert!(store.get(STOCK_DOCUMENT_KEY).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(store.path_for(STOCK_DOCUMENT_KEY), b"not gzip").unwrap();
        let err = store.get(STOCK_DOCUMENT_KEY).unwrap_err();
        assert_eq!(err.error_code(), crate::error::error_code::STORAGE_ERROR);
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.path_for("../escape/me"),
            dir.path().join("___escape_me.bin.gz")
        );
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        let saved = store.set(STOCK_DOCUMENT_KEY, document()).unwrap();
        assert_eq!(store.get(STOCK_DOCUMENT_KEY).unwrap(), Some(saved));
        store.delete(STOCK_DOCUMENT_KEY).unwrap();
        assert_eq!(store.get(STOCK_DOCUMENT_KEY).unwrap(), None);
    }
}
