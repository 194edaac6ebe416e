//! Dependency-ordered section synthesis.
//!
//! For each target node: load guidance, gather routed evidence, include
//! previews of already-written related sections, ask the oracle, score the
//! result, optionally revise it, and persist it whatever the score.

pub mod evidence;
pub mod artifact;
pub mod context;
pub mod quality;
pub mod orchestrator;
pub mod assemble;

pub use evidence::*;
pub use artifact::*;
pub use context::*;
pub use quality::*;
pub use orchestrator::*;
pub use assemble::*;

use thiserror::Error;

use crate::pipeline::ledger::LedgerError;
use crate::pipeline::oracle::OracleError;
use crate::pipeline::retry::RetryError;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Evidence parse error: {0}")]
    EvidenceFormat(#[from] serde_json::Error),

    #[error("Oracle call failed: {0}")]
    Oracle(RetryError<OracleError>),

    #[error("Ledger read failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl From<RetryError<OracleError>> for GenerationError {
    fn from(err: RetryError<OracleError>) -> Self {
        match err {
            RetryError::Cancelled => GenerationError::Cancelled,
            other => GenerationError::Oracle(other),
        }
    }
}
