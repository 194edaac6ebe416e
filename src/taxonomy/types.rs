use serde::{Deserialize, Serialize};

/// One level of the fixed classification tree.
///
/// `id` is a dotted path (`"5.3.1.2"`); every child id extends its parent id
/// by one `.segment`. Module ids carry no dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub title: String,
    /// Ordered child ids; empty for leaves.
    #[serde(default)]
    pub children: Vec<String>,
    /// Keywords and document types quoted to the oracle when this node is an option.
    #[serde(default)]
    pub hints: Vec<String>,
}

impl TaxonomyNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            children: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_hints(mut self, hints: &[&str]) -> Self {
        self.hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// On-disk taxonomy layout: a flat node list, parents name their children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyFile {
    pub nodes: Vec<TaxonomyNode>,
}
