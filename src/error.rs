use thiserror::Error;

use crate::guard::Action;

/// Stable, machine-readable error codes returned in JSON error bodies.
///
/// Clients match on `code`, never on the message text.
pub mod error_code {
    pub const NOT_SIGNED_IN: &str = "NOT_SIGNED_IN";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const ACCOUNT_EXISTS: &str = "ACCOUNT_EXISTS";
    pub const EMPTY_TABLE: &str = "EMPTY_TABLE";
    pub const INVALID_AS_AT_DATE: &str = "INVALID_AS_AT_DATE";
    pub const ROW_OUT_OF_RANGE: &str = "ROW_OUT_OF_RANGE";
    pub const BUSY: &str = "BUSY";
    pub const IMPORT_FAILED: &str = "IMPORT_FAILED";
    pub const EXPORT_FAILED: &str = "EXPORT_FAILED";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

/// Errors raised by the stock workspace and its collaborators.
#[derive(Error, Debug)]
pub enum StockError {
    #[error("Please sign in first")]
    NotSignedIn,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account for {0} already exists")]
    AccountExists(String),

    #[error("No rows to {0}")]
    EmptyTable(&'static str),

    #[error("Invalid as-at date '{0}', expected YYYY-MM-DD")]
    InvalidAsAtDate(String),

    #[error("Row {index} does not exist (table has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("Cannot start {requested} while {in_flight} is in progress")]
    Busy { requested: Action, in_flight: Action },

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StockError {
    pub fn error_code(&self) -> &'static str {
        match self {
            StockError::NotSignedIn => error_code::NOT_SIGNED_IN,
            StockError::InvalidCredentials => error_code::INVALID_CREDENTIALS,
            StockError::AccountExists(_) => error_code::ACCOUNT_EXISTS,
            StockError::EmptyTable(_) => error_code::EMPTY_TABLE,
            StockError::InvalidAsAtDate(_) => error_code::INVALID_AS_AT_DATE,
            StockError::RowOutOfRange { .. } => error_code::ROW_OUT_OF_RANGE,
            StockError::Busy { .. } => error_code::BUSY,
            StockError::Import(_) => error_code::IMPORT_FAILED,
            StockError::Export(_) => error_code::EXPORT_FAILED,
            StockError::Storage(_) | StockError::Io(_) | StockError::Serialization(_) => {
                error_code::STORAGE_ERROR
            }
        }
    }
}

impl From<calamine::Error> for StockError {
    fn from(err: calamine::Error) -> Self {
        StockError::Import(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for StockError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        StockError::Export(err.to_string())
    }
}

impl From<bincode::Error> for StockError {
    fn from(err: bincode::Error) -> Self {
        StockError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StockError {
    fn from(err: serde_json::Error) -> Self {
        StockError::Serialization(err.to_string())
    }
}

#[cfg(feature = "web")]
mod response {
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};

    use super::StockError;

    impl StockError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                StockError::NotSignedIn | StockError::InvalidCredentials => {
                    StatusCode::UNAUTHORIZED
                }
                StockError::AccountExists(_) | StockError::Busy { .. } => StatusCode::CONFLICT,
                StockError::EmptyTable(_)
                | StockError::InvalidAsAtDate(_)
                | StockError::Import(_) => StatusCode::BAD_REQUEST,
                StockError::RowOutOfRange { .. } => StatusCode::NOT_FOUND,
                StockError::Export(_)
                | StockError::Storage(_)
                | StockError::Io(_)
                | StockError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for StockError {
        fn into_response(self) -> Response {
            let body = serde_json::json!({
                "status": "error",
                "code": self.error_code(),
                "message": self.to_string(),
            });
            (self.status_code(), Json(body)).into_response()
        }
    }
}
