//! Arena-backed taxonomy tree.
//!
//! Nodes live in one `Vec`; parents, children and the root-to-node ancestor
//! chain are precomputed as index arrays when the tree is built, so lookups
//! never walk strings and folder paths are O(depth).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::{TaxonomyFile, TaxonomyNode};
use super::TaxonomyError;

#[derive(Debug, Clone)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    index: HashMap<String, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    /// Root-to-node chain, node included.
    ancestors: Vec<Vec<usize>>,
    modules: Vec<usize>,
}

impl Taxonomy {
    /// Build and validate a taxonomy from its node list.
    pub fn new(nodes: Vec<TaxonomyNode>) -> Result<Self, TaxonomyError> {
        if nodes.is_empty() {
            return Err(TaxonomyError::Empty);
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(TaxonomyError::DuplicateNode(node.id.clone()));
            }
        }

        let mut parent: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for child_id in &node.children {
                let Some(&c) = index.get(child_id) else {
                    return Err(TaxonomyError::UnknownChild {
                        parent: node.id.clone(),
                        child: child_id.clone(),
                    });
                };
                if !extends(&node.id, child_id) {
                    return Err(TaxonomyError::PrefixMismatch {
                        parent: node.id.clone(),
                        child: child_id.clone(),
                    });
                }
                if let Some(existing) = parent[c] {
                    return Err(TaxonomyError::MultipleParents {
                        child: child_id.clone(),
                        first: nodes[existing].id.clone(),
                        second: node.id.clone(),
                    });
                }
                parent[c] = Some(i);
                children[i].push(c);
            }
        }

        let mut modules = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            if parent[i].is_none() {
                if node.id.contains('.') {
                    return Err(TaxonomyError::Orphan(node.id.clone()));
                }
                modules.push(i);
            }
        }

        // Unwind each node to its root once; the cap turns a corrupt parent
        // array into an error instead of a hang.
        let mut ancestors = Vec::with_capacity(nodes.len());
        for i in 0..nodes.len() {
            let mut chain = Vec::new();
            let mut cursor = Some(i);
            while let Some(c) = cursor {
                if chain.len() > nodes.len() {
                    return Err(TaxonomyError::Cycle(nodes[i].id.clone()));
                }
                chain.push(c);
                cursor = parent[c];
            }
            chain.reverse();
            ancestors.push(chain);
        }

        Ok(Self {
            nodes,
            index,
            parent,
            children,
            ancestors,
            modules,
        })
    }

    /// Parse the `{"nodes": [...]}` layout.
    pub fn from_json(json: &str) -> Result<Self, TaxonomyError> {
        let file: TaxonomyFile = serde_json::from_str(json)?;
        Self::new(file.nodes)
    }

    pub fn from_file(path: &Path) -> Result<Self, TaxonomyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup(&self, id: &str) -> Option<&TaxonomyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Parent id, `None` for modules and unknown ids.
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        let &i = self.index.get(id)?;
        self.parent[i].map(|p| self.nodes[p].id.as_str())
    }

    /// Module roots in declaration order.
    pub fn modules(&self) -> Vec<&TaxonomyNode> {
        self.modules.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn is_module(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.parent[i].is_none())
    }

    /// Direct children of any node, in declared order.
    pub fn children_of(&self, id: &str) -> Vec<&TaxonomyNode> {
        match self.index.get(id) {
            Some(&i) => self.children[i].iter().map(|&c| &self.nodes[c]).collect(),
            None => Vec::new(),
        }
    }

    /// Sections directly under a module.
    pub fn top_level_children_of(&self, module_id: &str) -> Vec<&str> {
        self.children_of(module_id)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Leaves under `root_id` in depth-first order (the root itself when it is a leaf).
    pub fn leaf_nodes(&self, root_id: &str) -> Vec<&str> {
        let Some(&root) = self.index.get(root_id) else {
            return Vec::new();
        };

        let mut leaves = Vec::new();
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            if self.children[i].is_empty() {
                leaves.push(self.nodes[i].id.as_str());
            } else {
                // Reverse so the first child is visited first.
                stack.extend(self.children[i].iter().rev());
            }
        }
        leaves
    }

    /// All nodes under `root_id` (root included) in depth-first order.
    pub fn subtree(&self, root_id: &str) -> Vec<&str> {
        let Some(&root) = self.index.get(root_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            out.push(self.nodes[i].id.as_str());
            stack.extend(self.children[i].iter().rev());
        }
        out
    }

    /// Root-to-node id chain, node included.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(&i) => self.ancestors[i]
                .iter()
                .map(|&a| self.nodes[a].id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Depth below the module root (modules are depth 0).
    pub fn depth(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|&i| self.ancestors[i].len() - 1)
    }

    pub fn module_of(&self, id: &str) -> Option<&str> {
        let &i = self.index.get(id)?;
        self.ancestors[i].first().map(|&m| self.nodes[m].id.as_str())
    }

    /// Storage folder for a placed document: one component per ancestor.
    pub fn folder_path(&self, id: &str) -> Option<PathBuf> {
        let &i = self.index.get(id)?;
        Some(
            self.ancestors[i]
                .iter()
                .map(|&a| self.nodes[a].id.as_str())
                .collect(),
        )
    }

    pub fn title_of(&self, id: &str) -> Option<&str> {
        self.lookup(id).map(|n| n.title.as_str())
    }
}

/// `child` is `parent` plus exactly one more `.segment`.
fn extends(parent: &str, child: &str) -> bool {
    child
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|segment| !segment.is_empty() && !segment.contains('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Taxonomy {
        Taxonomy::new(vec![
            TaxonomyNode::new("3", "Quality").with_children(&["3.1", "3.2"]),
            TaxonomyNode::new("3.1", "Drug Substance").with_children(&["3.1.1", "3.1.2"]),
            TaxonomyNode::new("3.1.1", "General Information"),
            TaxonomyNode::new("3.1.2", "Manufacture").with_children(&["3.1.2.1"]),
            TaxonomyNode::new("3.1.2.1", "Manufacturer"),
            TaxonomyNode::new("3.2", "Drug Product"),
            TaxonomyNode::new("4", "Nonclinical").with_children(&["4.1"]),
            TaxonomyNode::new("4.1", "Pharmacology"),
        ])
        .unwrap()
    }

    #[test]
    fn lookup_and_parent() {
        let t = sample();
        assert_eq!(t.lookup("3.1.2").unwrap().title, "Manufacture");
        assert!(t.lookup("9.9").is_none());
        assert_eq!(t.parent_of("3.1.2.1"), Some("3.1.2"));
        assert_eq!(t.parent_of("3"), None);
        assert_eq!(t.parent_of("missing"), None);
    }

    #[test]
    fn modules_in_declared_order() {
        let t = sample();
        let ids: Vec<&str> = t.modules().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);
        assert!(t.is_module("4"));
        assert!(!t.is_module("4.1"));
    }

    #[test]
    fn leaf_nodes_depth_first() {
        let t = sample();
        assert_eq!(t.leaf_nodes("3"), vec!["3.1.1", "3.1.2.1", "3.2"]);
        assert_eq!(t.leaf_nodes("3.2"), vec!["3.2"]);
        assert!(t.leaf_nodes("7").is_empty());
    }

    #[test]
    fn top_level_children() {
        let t = sample();
        assert_eq!(t.top_level_children_of("3"), vec!["3.1", "3.2"]);
        assert!(t.top_level_children_of("3.2").is_empty());
    }

    #[test]
    fn ancestors_depth_and_folder() {
        let t = sample();
        assert_eq!(t.ancestors("3.1.2.1"), vec!["3", "3.1", "3.1.2", "3.1.2.1"]);
        assert_eq!(t.depth("3"), Some(0));
        assert_eq!(t.depth("3.1.2.1"), Some(3));
        assert_eq!(t.module_of("3.1.2.1"), Some("3"));
        assert_eq!(
            t.folder_path("3.1.2"),
            Some(PathBuf::from("3").join("3.1").join("3.1.2"))
        );
    }

    #[test]
    fn subtree_preorder() {
        let t = sample();
        assert_eq!(t.subtree("3.1"), vec!["3.1", "3.1.1", "3.1.2", "3.1.2.1"]);
    }

    #[test]
    fn duplicate_rejected() {
        let err = Taxonomy::new(vec![TaxonomyNode::new("1", "A"), TaxonomyNode::new("1", "B")])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::DuplicateNode(id) if id == "1"));
    }

    #[test]
    fn unknown_child_rejected() {
        let err = Taxonomy::new(vec![TaxonomyNode::new("1", "A").with_children(&["1.1"])])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::UnknownChild { .. }));
    }

    #[test]
    fn prefix_mismatch_rejected() {
        let err = Taxonomy::new(vec![
            TaxonomyNode::new("1", "A").with_children(&["2.1"]),
            TaxonomyNode::new("2", "B"),
            TaxonomyNode::new("2.1", "C"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::PrefixMismatch { .. }));
    }

    #[test]
    fn self_child_rejected() {
        let err = Taxonomy::new(vec![TaxonomyNode::new("1", "A").with_children(&["1"])])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::PrefixMismatch { .. }));
    }

    #[test]
    fn multiple_parents_rejected() {
        let err = Taxonomy::new(vec![
            TaxonomyNode::new("1", "A").with_children(&["1.1", "1.1"]),
            TaxonomyNode::new("1.1", "B"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::MultipleParents { .. }));
    }

    #[test]
    fn dotted_root_is_orphan() {
        let err = Taxonomy::new(vec![TaxonomyNode::new("1", "A"), TaxonomyNode::new("1.1", "B")])
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::Orphan(id) if id == "1.1"));
    }

    #[test]
    fn empty_rejected() {
        assert!(matches!(Taxonomy::new(Vec::new()), Err(TaxonomyError::Empty)));
    }

    #[test]
    fn from_json_layout() {
        let json = r#"{"nodes": [
            {"id": "5", "title": "Clinical", "children": ["5.1"]},
            {"id": "5.1", "title": "Listings", "hints": ["tabular listing"]}
        ]}"#;
        let t = Taxonomy::from_json(json).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup("5.1").unwrap().hints, vec!["tabular listing"]);
    }

    #[test]
    fn from_json_malformed() {
        assert!(matches!(
            Taxonomy::from_json("{nodes: oops"),
            Err(TaxonomyError::Parse(_))
        ));
    }
}
