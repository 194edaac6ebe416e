//! Multi-choice reference traversal.
//!
//! Every valid id at a level is expanded independently and concurrently.
//! A path whose next level yields nothing keeps its deepest valid node, so
//! the result is never empty.

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{Classifier, ClassifyError, Confidence, LevelAnswer, ReferenceTag, SourceDocument, Task};

impl Classifier {
    /// Every node that could cite `doc`, deduplicated, first-seen order.
    pub async fn references(
        &self,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReferenceTag>, ClassifyError> {
        let modules = self.taxonomy.modules();
        let answer = self
            .ask_level(Task::Reference, None, &modules, doc, cancel)
            .await?;

        let starts: Vec<(String, Confidence)> = match answer {
            LevelAnswer::Selected { ids, confidence } => {
                ids.into_iter().map(|id| (id, confidence)).collect()
            }
            LevelAnswer::Empty | LevelAnswer::Invalid => {
                tracing::warn!(
                    document = %doc.key,
                    fallback = %self.config.fallback_module,
                    "No referencing module chosen, using fallback module"
                );
                vec![(self.config.fallback_module.clone(), Confidence::Low)]
            }
        };

        let branches = starts
            .into_iter()
            .map(|(module, confidence)| self.expand(module, 0, confidence, doc, cancel));
        let mut tags = Vec::new();
        for branch in join_all(branches).await {
            tags.extend(branch?);
        }
        Ok(merge_tags(tags))
    }

    /// Resolve one selected node into the tags of its subtree.
    fn expand<'a>(
        &'a self,
        node: String,
        depth: usize,
        confidence: Confidence,
        doc: &'a SourceDocument,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ReferenceTag>, ClassifyError>> {
        async move {
            let children = self.taxonomy.children_of(&node);
            if children.is_empty() {
                return Ok(vec![ReferenceTag { node, confidence }]);
            }
            if depth >= self.config.max_depth {
                tracing::warn!(document = %doc.key, node = %node, depth, "Reference depth cap reached");
                return Ok(vec![ReferenceTag { node, confidence }]);
            }

            let scope = self.taxonomy.lookup(&node);
            let answer = self
                .ask_level(Task::Reference, scope, &children, doc, cancel)
                .await?;

            match answer {
                LevelAnswer::Selected {
                    ids,
                    confidence: child_confidence,
                } => {
                    let branches = ids
                        .into_iter()
                        .map(|child| self.expand(child, depth + 1, child_confidence, doc, cancel));
                    let mut tags = Vec::new();
                    for branch in join_all(branches).await {
                        tags.extend(branch?);
                    }
                    Ok(tags)
                }
                LevelAnswer::Empty => Ok(vec![ReferenceTag { node, confidence }]),
                LevelAnswer::Invalid => Ok(vec![ReferenceTag {
                    node,
                    confidence: Confidence::Low,
                }]),
            }
        }
        .boxed()
    }
}

/// Deduplicate by node, keeping the highest confidence and first-seen position.
fn merge_tags(tags: Vec<ReferenceTag>) -> Vec<ReferenceTag> {
    let mut merged: Vec<ReferenceTag> = Vec::with_capacity(tags.len());
    for tag in tags {
        match merged.iter_mut().find(|t| t.node == tag.node) {
            Some(existing) => existing.confidence = existing.confidence.max(tag.confidence),
            None => merged.push(tag),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use super::*;
    use crate::pipeline::oracle::ScriptedOracle;

    async fn run(oracle: ScriptedOracle) -> Vec<ReferenceTag> {
        classifier(Arc::new(oracle))
            .references(&doc(), &CancellationToken::new())
            .await
            .unwrap()
    }

    fn nodes(tags: &[ReferenceTag]) -> Vec<&str> {
        tags.iter().map(|t| t.node.as_str()).collect()
    }

    #[tokio::test]
    async fn fans_out_across_branches() {
        let tags = run(ScriptedOracle::new(r#"{"selection": []}"#)
            .when(&refer("modules"), r#"{"selection": ["3", "5"], "confidence": "high"}"#)
            .when(&refer("3"), r#"{"selection": ["3.1", "3.2"], "confidence": "high"}"#)
            .when(&refer("3.1"), r#"{"selection": ["3.1.1", "3.1.2"], "confidence": "medium"}"#)
            .when(&refer("3.1.2"), r#"{"selection": ["3.1.2.1"], "confidence": "low"}"#)
            .when(&refer("5"), r#"{"selection": ["5.3"], "confidence": "high"}"#)
            .when(&refer("5.3"), r#"{"selection": ["5.3.5"], "confidence": "high"}"#))
        .await;

        assert_eq!(nodes(&tags), vec!["3.1.1", "3.1.2.1", "3.2", "5.3.5"]);
        assert_eq!(tags[0].confidence, Confidence::Medium);
        assert_eq!(tags[1].confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn empty_level_keeps_parent() {
        let tags = run(ScriptedOracle::new(r#"{"selection": []}"#)
            .when(&refer("modules"), r#"{"selection": ["5"], "confidence": "high"}"#)
            .when(&refer("5"), r#"{"selection": ["5.3"], "confidence": "medium"}"#))
        .await;

        assert_eq!(nodes(&tags), vec!["5.3"]);
        assert_eq!(tags[0].confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn invalid_level_degrades_to_low() {
        let tags = run(ScriptedOracle::new("I cannot decide")
            .when(&refer("modules"), r#"{"selection": ["3"], "confidence": "high"}"#))
        .await;

        assert_eq!(nodes(&tags), vec!["3"]);
        assert_eq!(tags[0].confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn no_module_uses_fallback() {
        let tags = run(ScriptedOracle::new(r#"{"selection": []}"#)).await;
        assert_eq!(nodes(&tags), vec!["5"]);
        assert_eq!(tags[0].confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn unknown_ids_filtered_not_fatal() {
        let tags = run(ScriptedOracle::new(r#"{"selection": []}"#)
            .when(&refer("modules"), r#"{"selection": ["5", "7"], "confidence": "high"}"#)
            .when(&refer("5"), r#"{"selection": ["5.1", "5.9"], "confidence": "high"}"#))
        .await;

        assert_eq!(nodes(&tags), vec!["5.1"]);
        assert_eq!(tags[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn never_empty_for_any_answer() {
        for answer in ["", "{}", r#"{"selection": "x"}"#, r#"{"selection": []}"#, "[1,2]"] {
            let tags = run(ScriptedOracle::new(answer)).await;
            assert!(!tags.is_empty(), "empty result for {answer:?}");
        }
    }

    #[test]
    fn merge_keeps_highest_confidence() {
        let merged = merge_tags(vec![
            ReferenceTag {
                node: "5.3.1".into(),
                confidence: Confidence::Low,
            },
            ReferenceTag {
                node: "5.3.5".into(),
                confidence: Confidence::Medium,
            },
            ReferenceTag {
                node: "5.3.1".into(),
                confidence: Confidence::High,
            },
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].node, "5.3.1");
        assert_eq!(merged[0].confidence, Confidence::High);
    }
}
