use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Confidence
// ═══════════════════════════════════════════════════════════

/// Oracle confidence in one classification decision. Ordered Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Accepts "High", " medium ", "LOW", "med".
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "med" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn all() -> &'static [Confidence] {
        &[Self::Low, Self::Medium, Self::High]
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════

/// One node a document may be cited from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTag {
    pub node: String,
    pub confidence: Confidence,
}

/// Persisted result of classifying one source document.
/// Never edited in place: re-classification replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub module: String,
    pub placement_section: Option<String>,
    #[serde(default)]
    pub reference_sections: Vec<ReferenceTag>,
    pub confidence: Confidence,
    pub classified_at: DateTime<Utc>,
}

/// Outcome of the single-choice traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub module: String,
    pub section: String,
    pub confidence: Confidence,
}

/// Text handed to the classifier.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Ledger key, usually the source path.
    pub key: String,
    pub name: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(key: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            text: text.into(),
        }
    }
}
