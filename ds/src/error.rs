//! DocStore error types

use thiserror::Error;

/// Errors raised by the document/jurisdiction store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column(s) in jurisdiction input: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("invalid jurisdiction record: {0}")]
    InvalidRecord(String),
}
