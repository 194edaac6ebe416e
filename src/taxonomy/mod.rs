pub mod types;
pub mod tree;
pub mod catalog;

pub use types::*;
pub use tree::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Duplicate taxonomy node: {0}")]
    DuplicateNode(String),

    #[error("Node {parent} lists unknown child {child}")]
    UnknownChild { parent: String, child: String },

    #[error("Node {child} is claimed by both {first} and {second}")]
    MultipleParents {
        child: String,
        first: String,
        second: String,
    },

    #[error("Child {child} does not extend the id of its parent {parent}")]
    PrefixMismatch { parent: String, child: String },

    #[error("Node {0} has no parent but is not a module id")]
    Orphan(String),

    #[error("Parent chain of {0} does not reach a module")]
    Cycle(String),

    #[error("Taxonomy has no nodes")]
    Empty,

    #[error("Taxonomy parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
