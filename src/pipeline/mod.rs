pub mod text;
pub mod fs_helpers;
pub mod dependency; // Generation order over the content dependency graph
pub mod retry; // Rate-limit aware retry with an explicit limiter
pub mod oracle; // External text-completion boundary
pub mod classify; // Placement + reference traversal
pub mod ledger; // Persisted classification records
pub mod generation; // Dependency-ordered section synthesis

use serde::Serialize;

/// One failed unit of work in a run: a document key or a taxonomy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub key: String,
    pub error: String,
}

impl FailureEntry {
    pub fn new(key: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            key: key.into(),
            error: error.to_string(),
        }
    }
}
