//! Idempotent classification ledger.
//!
//! Records are JSON `ClassificationRecord`s. A record is usable only when
//! every required field holds a real node id; anything else (missing,
//! placeholder, undecodable) triggers re-classification. Load/classify/save
//! for one key is serialized through a per-key async mutex.
//!
//! Each stored record carries the raw key it was saved under. A record whose
//! key differs from the one asked for belongs to another document and reads
//! as missing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{LedgerBackend, LedgerError};
use crate::pipeline::classify::{ClassificationRecord, Classifier, ClassifyError, SourceDocument};
use crate::pipeline::FailureEntry;

/// Values that mean "no decision" rather than a node id (compared trimmed, case-insensitive).
pub const PLACEHOLDER_VALUES: &[&str] = &[
    "", "unknown", "n/a", "na", "none", "null", "...", ".", "-", "pending", "tbd",
];

pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    PLACEHOLDER_VALUES
        .iter()
        .any(|p| value.eq_ignore_ascii_case(p))
}

/// True iff module, placement and every reference hold non-placeholder values.
/// An empty reference list is allowed.
pub fn is_valid(record: &ClassificationRecord) -> bool {
    if is_placeholder(&record.module) {
        return false;
    }
    match record.placement_section.as_deref() {
        Some(section) if !is_placeholder(section) => {}
        _ => return false,
    }
    record
        .reference_sections
        .iter()
        .all(|tag| !is_placeholder(&tag.node))
}

/// On-disk shape: the record fields plus the key they belong to.
#[derive(Serialize)]
struct StoredRecordRef<'a> {
    key: &'a str,
    #[serde(flatten)]
    record: &'a ClassificationRecord,
}

#[derive(Deserialize)]
struct StoredRecord {
    key: String,
    #[serde(flatten)]
    record: ClassificationRecord,
}

/// What the ledger holds for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    Valid(ClassificationRecord),
    Placeholder(ClassificationRecord),
    Missing,
    /// Bytes present but not a record.
    Corrupt(String),
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid(_) => "valid",
            Self::Placeholder(_) => "placeholder",
            Self::Missing => "missing",
            Self::Corrupt(_) => "corrupt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// A valid record already existed; nothing was asked or written.
    Skipped(ClassificationRecord),
    Classified(ClassificationRecord),
}

impl PersistOutcome {
    pub fn record(&self) -> &ClassificationRecord {
        match self {
            Self::Skipped(r) | Self::Classified(r) => r,
        }
    }
}

/// Totals for one `classify_all` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationBatchSummary {
    pub classified: usize,
    pub skipped: usize,
    pub failures: Vec<FailureEntry>,
    /// Keys never attempted because the run was cancelled.
    pub not_started: Vec<String>,
    pub cancelled: bool,
}

pub struct ClassificationLedger {
    backend: Arc<dyn LedgerBackend>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClassificationLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Stored record for `key`, whatever its validity. Undecodable bytes are an error.
    pub async fn load(&self, key: &str) -> Result<Option<ClassificationRecord>, LedgerError> {
        match self.backend.read_record(key).await? {
            Some(bytes) => Ok(owned_by(key, serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Full overwrite, never a merge.
    pub async fn save(&self, key: &str, record: &ClassificationRecord) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(&StoredRecordRef { key, record })?;
        self.backend.write_record(key, &bytes).await
    }

    pub async fn inspect(&self, key: &str) -> Result<RecordState, LedgerError> {
        let Some(bytes) = self.backend.read_record(key).await? else {
            return Ok(RecordState::Missing);
        };
        let stored = match serde_json::from_slice::<StoredRecord>(&bytes) {
            Ok(stored) => stored,
            Err(e) => return Ok(RecordState::Corrupt(e.to_string())),
        };
        Ok(match owned_by(key, stored) {
            Some(record) if is_valid(&record) => RecordState::Valid(record),
            Some(record) => RecordState::Placeholder(record),
            None => RecordState::Missing,
        })
    }

    /// Classify `doc` unless a valid record is already stored under its key.
    pub async fn classify_and_persist(
        &self,
        doc: &SourceDocument,
        classifier: &Classifier,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome, LedgerError> {
        let lock = self.key_lock(&doc.key);
        let _guard = lock.lock().await;

        match self.inspect(&doc.key).await? {
            RecordState::Valid(record) => {
                tracing::debug!(document = %doc.key, "Valid classification on record, skipping");
                return Ok(PersistOutcome::Skipped(record));
            }
            RecordState::Placeholder(_) => {
                tracing::warn!(document = %doc.key, "Placeholder classification on record, reclassifying");
            }
            RecordState::Corrupt(reason) => {
                tracing::warn!(document = %doc.key, reason = %reason, "Unreadable classification on record, reclassifying");
            }
            RecordState::Missing => {}
        }

        let record = classifier.classify(doc, cancel).await?;
        self.save(&doc.key, &record).await?;
        Ok(PersistOutcome::Classified(record))
    }

    /// Run `classify_and_persist` over many documents, `batch_size` at a time.
    /// One document's failure never stops the others.
    pub async fn classify_all(
        &self,
        docs: &[SourceDocument],
        classifier: &Classifier,
        cancel: &CancellationToken,
    ) -> ClassificationBatchSummary {
        let batch_size = classifier.config().batch_size.max(1);
        let mut summary = ClassificationBatchSummary::default();

        for (index, batch) in docs.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                summary.not_started.extend(
                    docs[index * batch_size..]
                        .iter()
                        .map(|d| d.key.clone()),
                );
                break;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|doc| self.classify_and_persist(doc, classifier, cancel)),
            )
            .await;

            for (doc, result) in batch.iter().zip(results) {
                match result {
                    Ok(PersistOutcome::Skipped(_)) => summary.skipped += 1,
                    Ok(PersistOutcome::Classified(_)) => summary.classified += 1,
                    Err(LedgerError::Classify(ClassifyError::Cancelled)) => {
                        summary.cancelled = true;
                        summary.not_started.push(doc.key.clone());
                    }
                    Err(e) => {
                        tracing::warn!(document = %doc.key, error = %e, "Classification failed");
                        summary.failures.push(FailureEntry::new(&doc.key, &e));
                    }
                }
            }
        }

        tracing::info!(
            classified = summary.classified,
            skipped = summary.skipped,
            failed = summary.failures.len(),
            cancelled = summary.cancelled,
            "Classification run finished"
        );
        summary
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn owned_by(key: &str, stored: StoredRecord) -> Option<ClassificationRecord> {
    if stored.key == key {
        Some(stored.record)
    } else {
        tracing::warn!(document = %key, stored_key = %stored.key, "Record belongs to another key, ignoring");
        None
    }
}
