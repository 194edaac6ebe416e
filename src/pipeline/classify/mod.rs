//! Tree classification of source documents.
//!
//! Two traversals share one "ask the oracle about this level" primitive:
//! `placement` walks a single path to the best storage node, `reference`
//! fans out to every node that could cite the document. Malformed or
//! out-of-taxonomy answers never fail a document; they stop the descent at
//! the last valid node with `Confidence::Low`.

pub mod types;
pub mod prompt;
pub mod placement;
pub mod reference;

pub use types::*;
pub use prompt::*;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ClassifierConfig;
use crate::pipeline::oracle::{parse_answer, Oracle, OracleError};
use crate::pipeline::retry::{RetryEngine, RetryError};
use crate::taxonomy::{Taxonomy, TaxonomyNode};

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Oracle call failed: {0}")]
    Oracle(RetryError<OracleError>),

    #[error("Classification cancelled")]
    Cancelled,

    #[error("Fallback module {0} is not a module of the taxonomy")]
    UnknownFallback(String),
}

impl From<RetryError<OracleError>> for ClassifyError {
    fn from(err: RetryError<OracleError>) -> Self {
        match err {
            RetryError::Cancelled => ClassifyError::Cancelled,
            other => ClassifyError::Oracle(other),
        }
    }
}

/// Validated reading of one level's oracle answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LevelAnswer {
    /// At least one offered id, in answer order.
    Selected {
        ids: Vec<String>,
        confidence: Confidence,
    },
    /// The oracle explicitly chose nothing.
    Empty,
    /// Unparseable, or only ids that were not offered.
    Invalid,
}

/// Confidence assumed when a valid answer does not state one.
const DEFAULT_CONFIDENCE: Confidence = Confidence::Medium;

pub struct Classifier {
    taxonomy: Arc<Taxonomy>,
    oracle: Arc<dyn Oracle>,
    retry: RetryEngine,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        oracle: Arc<dyn Oracle>,
        retry: RetryEngine,
        config: ClassifierConfig,
    ) -> Result<Self, ClassifyError> {
        if !taxonomy.is_module(&config.fallback_module) {
            return Err(ClassifyError::UnknownFallback(config.fallback_module));
        }
        Ok(Self {
            taxonomy,
            oracle,
            retry,
            config,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Run both traversals and build a fresh record.
    pub async fn classify(
        &self,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<ClassificationRecord, ClassifyError> {
        let placement = self.place(doc, cancel).await?;
        let references = self.references(doc, cancel).await?;

        tracing::info!(
            document = %doc.key,
            module = %placement.module,
            placement = %placement.section,
            confidence = %placement.confidence,
            references = references.len(),
            "Document classified"
        );

        Ok(ClassificationRecord {
            module: placement.module,
            placement_section: Some(placement.section),
            reference_sections: references,
            confidence: placement.confidence,
            classified_at: Utc::now(),
        })
    }

    /// Ask the oracle to choose among `options` and validate the answer against them.
    pub(crate) async fn ask_level(
        &self,
        task: Task,
        scope: Option<&TaxonomyNode>,
        options: &[&TaxonomyNode],
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<LevelAnswer, ClassifyError> {
        let prompt = build_level_prompt(
            task,
            scope,
            options,
            &doc.name,
            &doc.text,
            self.config.excerpt_chars,
        );
        let system = task.system_prompt();
        let scope_id = scope.map_or("modules", |n| n.id.as_str());

        let raw = self
            .retry
            .execute(cancel, || self.oracle.ask(system, &prompt))
            .await?;

        let answer = match parse_answer(&raw) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(
                    document = %doc.key,
                    task = task.as_str(),
                    scope = scope_id,
                    error = %e,
                    "Malformed oracle answer"
                );
                return Ok(LevelAnswer::Invalid);
            }
        };

        if answer.ids.is_empty() {
            tracing::debug!(document = %doc.key, scope = scope_id, "Oracle selected nothing");
            return Ok(LevelAnswer::Empty);
        }

        let valid: Vec<String> = answer
            .ids
            .iter()
            .filter(|id| options.iter().any(|o| &o.id == *id))
            .cloned()
            .collect();

        if valid.is_empty() {
            tracing::warn!(
                document = %doc.key,
                task = task.as_str(),
                scope = scope_id,
                answered = ?answer.ids,
                "Oracle answered with ids outside the offered options"
            );
            return Ok(LevelAnswer::Invalid);
        }

        tracing::debug!(document = %doc.key, scope = scope_id, selected = ?valid, "Level answered");
        Ok(LevelAnswer::Selected {
            ids: valid,
            confidence: answer.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::pipeline::oracle::ScriptedOracle;
    use crate::pipeline::retry::{RateLimiter, RetryPolicy};
    use std::time::Duration;

    /// Scenario taxonomy: modules 3 and 5, with 3.1 -> [3.1.1, 3.1.2].
    pub fn small_taxonomy() -> Arc<Taxonomy> {
        Arc::new(
            Taxonomy::new(vec![
                TaxonomyNode::new("3", "Quality").with_children(&["3.1", "3.2"]),
                TaxonomyNode::new("3.1", "Drug Substance").with_children(&["3.1.1", "3.1.2"]),
                TaxonomyNode::new("3.1.1", "General Information"),
                TaxonomyNode::new("3.1.2", "Manufacture").with_children(&["3.1.2.1"]),
                TaxonomyNode::new("3.1.2.1", "Manufacturer"),
                TaxonomyNode::new("3.2", "Drug Product"),
                TaxonomyNode::new("5", "Clinical Study Reports").with_children(&["5.1", "5.3"]),
                TaxonomyNode::new("5.1", "Table of Contents"),
                TaxonomyNode::new("5.3", "Clinical Study Reports").with_children(&["5.3.1", "5.3.5"]),
                TaxonomyNode::new("5.3.1", "Biopharmaceutic Studies"),
                TaxonomyNode::new("5.3.5", "Efficacy and Safety Studies"),
            ])
            .unwrap(),
        )
    }

    pub fn fast_retry() -> RetryEngine {
        RetryEngine::new(
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
            },
            RateLimiter::unlimited(),
        )
    }

    pub fn classifier(oracle: Arc<ScriptedOracle>) -> Classifier {
        classifier_with(oracle, ClassifierConfig::default())
    }

    pub fn classifier_with(oracle: Arc<ScriptedOracle>, config: ClassifierConfig) -> Classifier {
        Classifier::new(small_taxonomy(), oracle, fast_retry(), config).unwrap()
    }

    pub fn doc() -> SourceDocument {
        SourceDocument::new("docs/study-101.pdf", "study-101.pdf", "Drug substance synthesis route.")
    }

    pub fn place(scope: &str) -> String {
        format!("Task: placement\nScope: {scope}\n")
    }

    pub fn refer(scope: &str) -> String {
        format!("Task: reference\nScope: {scope}\n")
    }
}
