//! Single-choice placement traversal.
//!
//! module -> top-level section -> subsection ... until a leaf, an empty or
//! invalid answer, or the depth cap. An invalid answer below the section
//! level stops at the parent; it never guesses a child.

use tokio_util::sync::CancellationToken;

use super::{Classifier, ClassifyError, Confidence, LevelAnswer, Placement, SourceDocument, Task};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlacementState {
    Start,
    ModuleChosen {
        module: String,
        confidence: Confidence,
    },
    SectionChosen {
        module: String,
        section: String,
        confidence: Confidence,
    },
    SubsectionChosen {
        module: String,
        node: String,
        depth: usize,
        confidence: Confidence,
    },
    Terminal(Placement),
}

impl Classifier {
    /// Find the single node where `doc` is stored.
    pub async fn place(
        &self,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<Placement, ClassifyError> {
        let mut state = PlacementState::Start;
        loop {
            state = match state {
                PlacementState::Start => self.choose_module(doc, cancel).await?,
                PlacementState::ModuleChosen { module, confidence } => {
                    self.choose_section(module, confidence, doc, cancel).await?
                }
                PlacementState::SectionChosen {
                    module,
                    section,
                    confidence,
                } => {
                    self.choose_subsection(module, section, 1, confidence, doc, cancel)
                        .await?
                }
                PlacementState::SubsectionChosen {
                    module,
                    node,
                    depth,
                    confidence,
                } => {
                    self.choose_subsection(module, node, depth, confidence, doc, cancel)
                        .await?
                }
                PlacementState::Terminal(placement) => return Ok(placement),
            };
        }
    }

    async fn choose_module(
        &self,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<PlacementState, ClassifyError> {
        let modules = self.taxonomy.modules();
        let answer = self
            .ask_level(Task::Placement, None, &modules, doc, cancel)
            .await?;

        Ok(match answer {
            LevelAnswer::Selected { ids, confidence } => PlacementState::ModuleChosen {
                module: ids.into_iter().next().unwrap_or_default(),
                confidence,
            },
            LevelAnswer::Empty | LevelAnswer::Invalid => {
                tracing::warn!(
                    document = %doc.key,
                    fallback = %self.config.fallback_module,
                    "No valid module chosen, using fallback module"
                );
                PlacementState::ModuleChosen {
                    module: self.config.fallback_module.clone(),
                    confidence: Confidence::Low,
                }
            }
        })
    }

    async fn choose_section(
        &self,
        module: String,
        confidence: Confidence,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<PlacementState, ClassifyError> {
        let sections = self.taxonomy.children_of(&module);
        let Some(first) = sections.first().map(|s| s.id.clone()) else {
            return Ok(PlacementState::Terminal(Placement {
                section: module.clone(),
                module,
                confidence,
            }));
        };

        let scope = self.taxonomy.lookup(&module);
        let answer = self
            .ask_level(Task::Placement, scope, &sections, doc, cancel)
            .await?;

        Ok(match answer {
            LevelAnswer::Selected { ids, confidence } => PlacementState::SectionChosen {
                module,
                section: ids.into_iter().next().unwrap_or(first),
                confidence,
            },
            LevelAnswer::Empty | LevelAnswer::Invalid => {
                tracing::warn!(
                    document = %doc.key,
                    module = %module,
                    fallback = %first,
                    "No valid section chosen, using first section of module"
                );
                PlacementState::SectionChosen {
                    module,
                    section: first,
                    confidence: Confidence::Low,
                }
            }
        })
    }

    async fn choose_subsection(
        &self,
        module: String,
        node: String,
        depth: usize,
        confidence: Confidence,
        doc: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<PlacementState, ClassifyError> {
        let terminal = |section: String, confidence: Confidence| {
            PlacementState::Terminal(Placement {
                module: module.clone(),
                section,
                confidence,
            })
        };

        let children = self.taxonomy.children_of(&node);
        if children.is_empty() {
            return Ok(terminal(node, confidence));
        }
        if depth >= self.config.max_depth {
            tracing::warn!(document = %doc.key, node = %node, depth, "Placement depth cap reached");
            return Ok(terminal(node, confidence));
        }

        let scope = self.taxonomy.lookup(&node);
        let answer = self
            .ask_level(Task::Placement, scope, &children, doc, cancel)
            .await?;

        Ok(match answer {
            LevelAnswer::Selected { ids, confidence } => match ids.into_iter().next() {
                Some(child) => PlacementState::SubsectionChosen {
                    module: module.clone(),
                    node: child,
                    depth: depth + 1,
                    confidence,
                },
                None => terminal(node, confidence),
            },
            // Explicit "none of these": the current node is the answer.
            LevelAnswer::Empty => terminal(node, confidence),
            LevelAnswer::Invalid => terminal(node, Confidence::Low),
        })
    }
}
