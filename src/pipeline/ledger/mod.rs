//! Persisted classification records, one per source document key.

pub mod backend;
pub mod records;

pub use backend::*;
pub use records::*;

use thiserror::Error;

use crate::pipeline::classify::ClassifyError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Ledger backend unavailable: {0}")]
    Unavailable(String),
}
