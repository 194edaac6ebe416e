//! Evidence items and the per-node routing that decides which ones a
//! generation target sees.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GenerationError;
use crate::pipeline::classify::SourceDocument;
use crate::pipeline::ledger::{ClassificationLedger, RecordState};
use crate::pipeline::text::truncate_text;
use crate::taxonomy::Taxonomy;

/// Characters of a classified document's text carried as its evidence summary.
pub const DOCUMENT_EXCERPT_CHARS: usize = 1500;

/// One paper or document excerpt, owned by the store that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source_node: String,
    #[serde(default)]
    pub also_relevant_to: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
}

impl EvidenceItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        source_node: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: summary.into(),
            source_node: source_node.into(),
            also_relevant_to: Vec::new(),
            url: None,
            authors: Vec::new(),
            journal: None,
            year: None,
        }
    }

    pub fn relevant_to(mut self, nodes: &[&str]) -> Self {
        self.also_relevant_to = nodes.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// Read-only evidence lookup.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn find_by_node(&self, node: &str) -> Result<Vec<EvidenceItem>, GenerationError>;

    async fn list_all(&self) -> Result<Vec<EvidenceItem>, GenerationError>;
}

// ═══════════════════════════════════════════════════════════
// Stores
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct InMemoryEvidenceStore {
    items: Vec<EvidenceItem>,
}

impl InMemoryEvidenceStore {
    pub fn new(items: Vec<EvidenceItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn find_by_node(&self, node: &str) -> Result<Vec<EvidenceItem>, GenerationError> {
        Ok(self
            .items
            .iter()
            .filter(|item| item.source_node == node)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<EvidenceItem>, GenerationError> {
        Ok(self.items.clone())
    }
}

/// Combined research file:
/// `{"sections": {"5.3.1": {"title": ..., "papers": [{title, url, pmid, abstract, authors, journal, year, also_relevant_to}]}}}`
#[derive(Deserialize)]
struct CombinedEvidence {
    #[serde(default)]
    sections: HashMap<String, EvidenceSection>,
}

#[derive(Deserialize)]
struct EvidenceSection {
    #[serde(default)]
    papers: Vec<RawPaper>,
}

#[derive(Deserialize)]
struct RawPaper {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    pmid: Option<Value>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    authors: Option<Value>,
    #[serde(default)]
    journal: Option<String>,
    #[serde(default)]
    year: Option<Value>,
    #[serde(default)]
    also_relevant_to: Vec<String>,
}

/// Evidence loaded once from a combined research JSON file.
pub struct JsonEvidenceStore {
    inner: InMemoryEvidenceStore,
}

impl JsonEvidenceStore {
    pub fn open(path: &Path) -> Result<Self, GenerationError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self, GenerationError> {
        let combined: CombinedEvidence = serde_json::from_str(json)?;

        // Stable order regardless of map iteration.
        let mut sections: Vec<(String, EvidenceSection)> = combined.sections.into_iter().collect();
        sections.sort_by(|a, b| a.0.cmp(&b.0));

        let mut items = Vec::new();
        for (node, section) in sections {
            for paper in section.papers {
                if let Some(item) = paper.into_item(&node) {
                    items.push(item);
                }
            }
        }

        tracing::info!(items = items.len(), "Evidence loaded");
        Ok(Self {
            inner: InMemoryEvidenceStore::new(items),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl EvidenceStore for JsonEvidenceStore {
    async fn find_by_node(&self, node: &str) -> Result<Vec<EvidenceItem>, GenerationError> {
        self.inner.find_by_node(node).await
    }

    async fn list_all(&self) -> Result<Vec<EvidenceItem>, GenerationError> {
        self.inner.list_all().await
    }
}

impl RawPaper {
    /// id = url, else pmid, else title; papers with none of them are dropped.
    fn into_item(self, node: &str) -> Option<EvidenceItem> {
        let url = self.url.filter(|u| !u.trim().is_empty());
        let pmid = self.pmid.as_ref().and_then(value_text);
        let id = url
            .clone()
            .or_else(|| pmid.map(|p| format!("pmid:{p}")))
            .or_else(|| Some(self.title.trim().to_string()).filter(|t| !t.is_empty()))?;

        let authors = match self.authors {
            Some(Value::Array(list)) => list.iter().filter_map(value_text).collect(),
            Some(other) => value_text(&other).into_iter().collect(),
            None => Vec::new(),
        };

        Some(EvidenceItem {
            id,
            title: self.title,
            summary: self.abstract_text.or(self.description).unwrap_or_default(),
            source_node: node.to_string(),
            also_relevant_to: self.also_relevant_to,
            url,
            authors,
            journal: self.journal,
            year: self.year.as_ref().and_then(value_text),
        })
    }
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Evidence drawn from classified source documents.
///
/// A document's placement becomes its source node and its reference tags
/// become `also_relevant_to`. Documents without a valid ledger record are left out.
pub struct LedgerEvidenceStore {
    inner: InMemoryEvidenceStore,
}

impl LedgerEvidenceStore {
    pub async fn build(
        ledger: &ClassificationLedger,
        docs: &[SourceDocument],
        excerpt_chars: usize,
    ) -> Result<Self, GenerationError> {
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let record = match ledger.inspect(&doc.key).await? {
                RecordState::Valid(record) => record,
                other => {
                    tracing::warn!(document = %doc.key, state = other.as_str(), "No usable classification, not cited");
                    continue;
                }
            };
            let Some(placement) = record.placement_section else {
                continue;
            };

            let mut item = EvidenceItem::new(
                doc.key.clone(),
                doc.name.clone(),
                truncate_text(doc.text.trim(), excerpt_chars),
                placement.clone(),
            );
            item.also_relevant_to = record
                .reference_sections
                .into_iter()
                .map(|tag| tag.node)
                .filter(|node| *node != placement)
                .collect();
            items.push(item);
        }

        tracing::info!(items = items.len(), documents = docs.len(), "Ledger evidence loaded");
        Ok(Self {
            inner: InMemoryEvidenceStore::new(items),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl EvidenceStore for LedgerEvidenceStore {
    async fn find_by_node(&self, node: &str) -> Result<Vec<EvidenceItem>, GenerationError> {
        self.inner.find_by_node(node).await
    }

    async fn list_all(&self) -> Result<Vec<EvidenceItem>, GenerationError> {
        self.inner.list_all().await
    }
}

/// Several stores read as one, in order.
#[derive(Default)]
pub struct MergedEvidenceStore {
    stores: Vec<Arc<dyn EvidenceStore>>,
}

impl MergedEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, store: Arc<dyn EvidenceStore>) -> Self {
        self.stores.push(store);
        self
    }
}

#[async_trait]
impl EvidenceStore for MergedEvidenceStore {
    async fn find_by_node(&self, node: &str) -> Result<Vec<EvidenceItem>, GenerationError> {
        let mut items = Vec::new();
        for store in &self.stores {
            items.extend(store.find_by_node(node).await?);
        }
        Ok(items)
    }

    async fn list_all(&self) -> Result<Vec<EvidenceItem>, GenerationError> {
        let mut items = Vec::new();
        for store in &self.stores {
            items.extend(store.list_all().await?);
        }
        Ok(items)
    }
}

// ═══════════════════════════════════════════════════════════
// Routing
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceRoute {
    /// Evidence filed under these source nodes.
    Nodes(Vec<String>),
    /// Every item in the store (literature reference sections).
    All,
}

/// Static target-node -> evidence-source mapping.
#[derive(Debug, Clone, Default)]
pub struct EvidenceRoutes {
    routes: HashMap<String, EvidenceRoute>,
}

impl EvidenceRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, node: &str, sources: &[&str]) -> Self {
        self.routes.insert(
            node.to_string(),
            EvidenceRoute::Nodes(sources.iter().map(|s| s.to_string()).collect()),
        );
        self
    }

    pub fn route_all(mut self, node: &str) -> Self {
        self.routes.insert(node.to_string(), EvidenceRoute::All);
        self
    }

    /// Route for `node`, or for its nearest routed ancestor.
    pub fn route_for(&self, node: &str, taxonomy: &Taxonomy) -> Option<&EvidenceRoute> {
        if let Some(route) = self.routes.get(node) {
            return Some(route);
        }
        taxonomy
            .ancestors(node)
            .into_iter()
            .rev()
            .find_map(|ancestor| self.routes.get(ancestor))
    }

    /// Explicit source nodes for `node` (empty for `All` or unrouted nodes).
    pub fn sources_for<'a>(&'a self, node: &str, taxonomy: &Taxonomy) -> Vec<&'a str> {
        match self.route_for(node, taxonomy) {
            Some(EvidenceRoute::Nodes(sources)) => sources.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Evidence for one generation target, deduplicated by item id.
///
/// Routed nodes get their source nodes' items; unrouted nodes get items filed
/// directly under themselves. Any item whose `also_relevant_to` names the
/// target or one of its sources is added too.
pub async fn gather_evidence(
    node: &str,
    routes: &EvidenceRoutes,
    store: &dyn EvidenceStore,
    taxonomy: &Taxonomy,
) -> Result<Vec<EvidenceItem>, GenerationError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut gathered: Vec<EvidenceItem> = Vec::new();
    let mut keep = |item: EvidenceItem, gathered: &mut Vec<EvidenceItem>| {
        if seen.insert(item.id.clone()) {
            gathered.push(item);
        }
    };

    let sources: Vec<String> = match routes.route_for(node, taxonomy) {
        Some(EvidenceRoute::All) => {
            for item in store.list_all().await? {
                keep(item, &mut gathered);
            }
            return Ok(gathered);
        }
        Some(EvidenceRoute::Nodes(sources)) => sources.clone(),
        None => vec![node.to_string()],
    };

    for source in &sources {
        for item in store.find_by_node(source).await? {
            keep(item, &mut gathered);
        }
    }

    for item in store.list_all().await? {
        let relevant = item
            .also_relevant_to
            .iter()
            .any(|r| r == node || sources.contains(r));
        if relevant {
            keep(item, &mut gathered);
        }
    }

    Ok(gathered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::{ClassificationRecord, Confidence, ReferenceTag};
    use crate::pipeline::ledger::MemoryLedgerBackend;
    use crate::taxonomy::catalog::{clinical_overview_evidence_routes, ctd_taxonomy};

    fn classified(placement: &str, references: &[&str]) -> ClassificationRecord {
        ClassificationRecord {
            module: "5".into(),
            placement_section: Some(placement.into()),
            reference_sections: references
                .iter()
                .map(|n| ReferenceTag {
                    node: n.to_string(),
                    confidence: Confidence::High,
                })
                .collect(),
            confidence: Confidence::High,
            classified_at: chrono::Utc::now(),
        }
    }

    const COMBINED: &str = r#"{
        "drug_name": "Exampliflozin",
        "sections": {
            "5.3.5.1": {
                "title": "Controlled Clinical Studies",
                "papers": [
                    {"title": "Pivotal RCT", "url": "https://pubmed.ncbi.nlm.nih.gov/111", "pmid": "111",
                     "abstract": "Reduced HbA1c by 0.8%.", "authors": ["A. Smith", "B. Jones"],
                     "journal": "NEJM", "year": 2024, "also_relevant_to": ["5.3.6"]},
                    {"title": "Untitled", "url": "", "pmid": 222, "abstract": "Second trial."}
                ]
            },
            "5.3.1.1": {
                "papers": [
                    {"title": "Food effect study", "url": "https://pubmed.ncbi.nlm.nih.gov/333", "abstract": "No food effect."},
                    {"title": "", "url": ""}
                ]
            }
        }
    }"#;

    #[tokio::test]
    async fn json_store_parses_combined_file() {
        let store = JsonEvidenceStore::from_json_str(COMBINED).unwrap();
        assert_eq!(store.len(), 3);

        let controlled = store.find_by_node("5.3.5.1").await.unwrap();
        assert_eq!(controlled.len(), 2);
        assert_eq!(controlled[0].id, "https://pubmed.ncbi.nlm.nih.gov/111");
        assert_eq!(controlled[0].authors, vec!["A. Smith", "B. Jones"]);
        assert_eq!(controlled[0].year.as_deref(), Some("2024"));
        assert_eq!(controlled[1].id, "pmid:222");
        assert_eq!(controlled[1].url, None);
    }

    #[test]
    fn json_store_rejects_malformed() {
        assert!(matches!(
            JsonEvidenceStore::from_json_str("{\"sections\": [1,2]}"),
            Err(GenerationError::EvidenceFormat(_))
        ));
    }

    #[test]
    fn unrouted_child_inherits_parent_route() {
        let taxonomy = ctd_taxonomy().unwrap();
        let routes = clinical_overview_evidence_routes();
        assert_eq!(
            routes.route_for("2.5.6.1.1", &taxonomy),
            routes.route_for("2.5.6.1", &taxonomy)
        );
        assert_eq!(routes.route_for("2.5.7", &taxonomy), Some(&EvidenceRoute::All));
        assert!(routes.route_for("2.5", &taxonomy).is_none());
    }

    #[tokio::test]
    async fn gathers_routed_and_also_relevant_items() {
        let taxonomy = ctd_taxonomy().unwrap();
        let routes = EvidenceRoutes::new().route("2.5.4", &["5.3.5.1"]);
        let store = InMemoryEvidenceStore::new(vec![
            EvidenceItem::new("p1", "RCT", "a", "5.3.5.1"),
            EvidenceItem::new("p2", "PK", "b", "5.3.3.1").relevant_to(&["5.3.5.1"]),
            EvidenceItem::new("p3", "Safety", "c", "5.3.6").relevant_to(&["2.5.4"]),
            EvidenceItem::new("p4", "Other", "d", "5.3.1.1"),
            // Same id filed twice.
            EvidenceItem::new("p1", "RCT copy", "a", "5.3.5.1"),
        ]);

        let items = gather_evidence("2.5.4", &routes, &store, &taxonomy).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn all_route_gets_everything_once() {
        let taxonomy = ctd_taxonomy().unwrap();
        let routes = EvidenceRoutes::new().route_all("2.5.7");
        let store = InMemoryEvidenceStore::new(vec![
            EvidenceItem::new("a", "A", "", "5.3.1"),
            EvidenceItem::new("b", "B", "", "5.3.6"),
            EvidenceItem::new("a", "A again", "", "5.3.5"),
        ]);
        let items = gather_evidence("2.5.7", &routes, &store, &taxonomy).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn unrouted_node_uses_own_evidence() {
        let taxonomy = ctd_taxonomy().unwrap();
        let store = InMemoryEvidenceStore::new(vec![
            EvidenceItem::new("x", "X", "", "2.5"),
            EvidenceItem::new("y", "Y", "", "5.3.1"),
        ]);
        let items = gather_evidence("2.5", &EvidenceRoutes::new(), &store, &taxonomy)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "x");
    }

    #[tokio::test]
    async fn ledger_store_maps_placement_and_references() {
        let ledger = ClassificationLedger::new(Arc::new(MemoryLedgerBackend::new()));
        ledger
            .save("csr/pivotal.txt", &classified("5.3.5.1", &["5.3.5.1", "2.5.4", "2.7.3"]))
            .await
            .unwrap();
        ledger
            .save("csr/unknown.txt", &classified("Unknown", &[]))
            .await
            .unwrap();

        let docs = vec![
            SourceDocument::new("csr/pivotal.txt", "pivotal.txt", "  HbA1c fell by 0.9%. Weight fell too.  "),
            SourceDocument::new("csr/unknown.txt", "unknown.txt", "Unfiled."),
            SourceDocument::new("csr/new.txt", "new.txt", "Never classified."),
        ];
        let store = LedgerEvidenceStore::build(&ledger, &docs, DOCUMENT_EXCERPT_CHARS)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let items = store.find_by_node("5.3.5.1").await.unwrap();
        assert_eq!(items[0].id, "csr/pivotal.txt");
        assert_eq!(items[0].title, "pivotal.txt");
        assert_eq!(items[0].summary, "HbA1c fell by 0.9%. Weight fell too.");
        assert_eq!(items[0].also_relevant_to, vec!["2.5.4", "2.7.3"]);
    }

    #[tokio::test]
    async fn merged_store_reads_all_sources() {
        let taxonomy = ctd_taxonomy().unwrap();
        let routes = EvidenceRoutes::new().route("2.5.4", &["5.3.5.1"]);
        let papers = InMemoryEvidenceStore::new(vec![EvidenceItem::new("p1", "RCT", "", "5.3.5.1")]);
        let documents = InMemoryEvidenceStore::new(vec![
            EvidenceItem::new("d1", "CSR", "", "5.3.5.2").relevant_to(&["2.5.4"]),
            EvidenceItem::new("p1", "RCT again", "", "5.3.5.1"),
        ]);
        let merged = MergedEvidenceStore::new()
            .with(Arc::new(papers))
            .with(Arc::new(documents));

        assert_eq!(merged.list_all().await.unwrap().len(), 3);
        let items = gather_evidence("2.5.4", &routes, &merged, &taxonomy).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "d1"]);
    }
}
