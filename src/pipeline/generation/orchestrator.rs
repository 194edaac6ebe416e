//! Orchestrator: runs generation targets in dependency order.
//!
//! Batches hold mutually independent nodes; a batch starts only after the
//! previous one has fully finished, so every artifact a node cross-references
//! is already readable. Delays between batches and the stagger inside a batch
//! only spread oracle load.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::artifact::ArtifactStore;
use super::context::*;
use super::evidence::{gather_evidence, EvidenceRoutes, EvidenceStore};
use super::quality::{expected_citations, has_sectioning, validate_quality, QualityReport};
use super::GenerationError;
use crate::config::GenerationConfig;
use crate::pipeline::dependency::{plan_batches, resolve, DependencyGraph};
use crate::pipeline::oracle::Oracle;
use crate::pipeline::retry::RetryEngine;
use crate::pipeline::text::strip_code_fence;
use crate::pipeline::FailureEntry;
use crate::taxonomy::Taxonomy;

/// Outcome of one generated (and persisted) node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub title: String,
    pub quality: QualityReport,
    pub revisions: u32,
    pub evidence_count: usize,
    pub duration_ms: u64,
}

/// Result of a whole run. Partial progress is always reported.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Generation order actually used.
    pub order: Vec<String>,
    /// Nodes that could only be ordered by falling back to input order.
    pub cyclic: Vec<String>,
    pub completed: Vec<NodeReport>,
    pub failures: Vec<FailureEntry>,
    /// Nodes never started because the run was cancelled.
    pub not_started: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.completed.iter().filter(|r| r.quality.is_valid).count()
    }

    pub fn below_threshold(&self) -> impl Iterator<Item = &NodeReport> {
        self.completed.iter().filter(|r| !r.quality.is_valid)
    }
}

pub struct Orchestrator {
    taxonomy: Arc<Taxonomy>,
    oracle: Arc<dyn Oracle>,
    evidence: Arc<dyn EvidenceStore>,
    artifacts: Arc<dyn ArtifactStore>,
    routes: EvidenceRoutes,
    graph: DependencyGraph,
    retry: RetryEngine,
    config: GenerationConfig,
}

impl Orchestrator {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        oracle: Arc<dyn Oracle>,
        evidence: Arc<dyn EvidenceStore>,
        artifacts: Arc<dyn ArtifactStore>,
        retry: RetryEngine,
        config: GenerationConfig,
    ) -> Self {
        Self {
            taxonomy,
            oracle,
            evidence,
            artifacts,
            routes: EvidenceRoutes::new(),
            graph: DependencyGraph::new(),
            retry,
            config,
        }
    }

    pub fn with_graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_routes(mut self, routes: EvidenceRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Generate every node in `nodes`. Node-level failures are collected, never propagated.
    pub async fn run(&self, nodes: &[String], cancel: &CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let resolution = resolve(nodes, &self.graph);
        let batches = plan_batches(&resolution.order, &self.graph, self.config.batch_size);

        tracing::info!(
            run_id = %run_id,
            nodes = resolution.order.len(),
            batches = batches.len(),
            cyclic = resolution.cyclic.len(),
            "Generation run started"
        );

        let mut completed = Vec::new();
        let mut failures = Vec::new();
        let mut not_started = Vec::new();

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.config.inter_batch_delay().is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.inter_batch_delay()) => {}
                }
            }
            if cancel.is_cancelled() {
                not_started.extend(batches[index..].iter().flatten().cloned());
                break;
            }

            tracing::info!(batch = index + 1, nodes = ?batch, "Generating batch");

            let jobs = batch.iter().enumerate().map(|(slot, node)| {
                let offset = self.config.stagger() * slot as u32;
                let targets = &resolution.order;
                async move {
                    if !offset.is_zero() {
                        tokio::time::sleep(offset).await;
                    }
                    (node, self.generate_node(node, targets, cancel).await)
                }
            });

            for (node, outcome) in join_all(jobs).await {
                match outcome {
                    Ok(report) => completed.push(report),
                    Err(GenerationError::Cancelled) => not_started.push(node.clone()),
                    Err(e) => {
                        tracing::error!(node = %node, error = %e, "Node generation failed");
                        failures.push(FailureEntry::new(node.as_str(), &e));
                    }
                }
            }
        }

        let summary = RunSummary {
            run_id,
            order: resolution.order,
            cyclic: resolution.cyclic,
            completed,
            failures,
            not_started,
            cancelled: cancel.is_cancelled(),
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            run_id = %run_id,
            completed = summary.completed.len(),
            passed = summary.passed(),
            failed = summary.failures.len(),
            not_started = summary.not_started.len(),
            "Generation run finished"
        );
        summary
    }

    /// Generate, score, optionally revise and persist one node.
    pub async fn generate_node(
        &self,
        node: &str,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> Result<NodeReport, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let start = Instant::now();

        let title = match self.taxonomy.title_of(node) {
            Some(title) => title.to_string(),
            None => {
                tracing::warn!(node, "Node not in taxonomy, generating without a title");
                node.to_string()
            }
        };

        let guidance = self.artifacts.read_guidance(node).await?;
        if guidance.is_none() {
            tracing::warn!(node, "No guidance found");
        }

        let evidence =
            gather_evidence(node, &self.routes, self.evidence.as_ref(), &self.taxonomy).await?;
        let related = collect_related(
            node,
            &self.graph,
            targets,
            &self.taxonomy,
            self.artifacts.as_ref(),
            self.config.related_preview_chars,
        )
        .await?;

        let expected = expected_citations(evidence.len(), &self.config.quality);
        let evidence_count = evidence.len();
        let ctx = NodeContext {
            node: node.to_string(),
            title: title.clone(),
            guidance,
            evidence,
            related,
            expected_citations: expected,
        };

        let prompt = build_generation_prompt(&ctx, self.config.max_evidence_items);
        let raw = self.ask(GENERATION_SYSTEM_PROMPT, &prompt, cancel).await?;
        let mut content = strip_code_fence(&raw).to_string();
        let mut report = validate_quality(&content, expected, &self.config.quality);

        tracing::debug!(node, score = report.score, valid = report.is_valid, "Initial draft scored");

        let mut revisions = 0;
        while self.needs_revision(&report, revisions) {
            if cancel.is_cancelled() {
                break;
            }
            let prompt = build_refinement_prompt(node, &content, &report);
            let revised = match self.ask(REFINEMENT_SYSTEM_PROMPT, &prompt, cancel).await {
                Ok(raw) => strip_code_fence(&raw).to_string(),
                Err(e) => {
                    tracing::warn!(node, error = %e, "Revision failed, keeping current draft");
                    break;
                }
            };
            if !has_sectioning(&revised) {
                tracing::warn!(node, "Revision dropped all sectioning, keeping current draft");
                break;
            }

            revisions += 1;
            report = validate_quality(&revised, expected, &self.config.quality);
            content = revised;
            tracing::debug!(node, revision = revisions, score = report.score, "Revision scored");
        }

        self.artifacts.write_artifact(node, &content).await?;

        if report.is_valid {
            tracing::info!(node, score = report.score, revisions, "Section generated");
        } else {
            tracing::warn!(
                node,
                score = report.score,
                issues = ?report.issues,
                structural = ?report.structural_errors,
                "Section persisted below quality threshold"
            );
        }

        Ok(NodeReport {
            node: node.to_string(),
            title,
            quality: report,
            revisions,
            evidence_count,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn needs_revision(&self, report: &QualityReport, revisions: u32) -> bool {
        self.config.enable_refinement
            && revisions < self.config.max_revisions
            && (!report.is_valid || report.score < self.config.quality.refine_below)
    }

    async fn ask(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        Ok(self
            .retry
            .execute(cancel, || self.oracle.ask(system, user))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::test_support::fast_retry;
    use crate::pipeline::classify::{ClassificationRecord, Confidence, ReferenceTag, SourceDocument};
    use crate::pipeline::generation::{
        EvidenceItem, InMemoryArtifactStore, InMemoryEvidenceStore, LedgerEvidenceStore,
        DOCUMENT_EXCERPT_CHARS,
    };
    use crate::pipeline::ledger::{ClassificationLedger, MemoryLedgerBackend};
    use crate::pipeline::oracle::ScriptedOracle;
    use crate::taxonomy::catalog::{
        clinical_overview_dependencies, clinical_overview_evidence_routes, ctd_taxonomy,
    };

    fn good_section(node: &str) -> String {
        format!(
            "\\section{{Section {node}}}\n\\label{{sec:{node}}}\n{}\
             \\studyref{{a}} \\studyref{{b}} \\studyref{{c}}\n",
            "Results were consistent across the studies and populations examined. ".repeat(10)
        )
    }

    fn uncited_section(node: &str) -> String {
        format!(
            "\\section{{Section {node}}}\n\\label{{sec:{node}}}\n{}",
            "Results were consistent across the studies and populations examined. ".repeat(10)
        )
    }

    fn gen(node: &str) -> String {
        format!("Node: {node}\n")
    }

    fn quiet_config() -> GenerationConfig {
        GenerationConfig {
            inter_batch_delay_ms: 0,
            stagger_ms: 0,
            ..GenerationConfig::default()
        }
    }

    fn orchestrator(
        oracle: Arc<ScriptedOracle>,
        artifacts: Arc<InMemoryArtifactStore>,
        config: GenerationConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ctd_taxonomy().unwrap()),
            oracle,
            Arc::new(InMemoryEvidenceStore::default()),
            artifacts,
            fast_retry(),
            config,
        )
        .with_graph(clinical_overview_dependencies())
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn dependencies_written_before_dependents() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .when(&gen("2.5"), &good_section("2.5"))
                .when(&gen("2.5.1"), &good_section("2.5.1"))
                .when(&gen("2.5.2"), &good_section("2.5.2"))
                .when(&gen("2.5.7"), &good_section("2.5.7")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let orch = orchestrator(oracle.clone(), artifacts.clone(), GenerationConfig::default());

        let started = tokio::time::Instant::now();
        let summary = orch
            .run(&ids(&["2.5.7", "2.5.2", "2.5.1", "2.5"]), &CancellationToken::new())
            .await;

        assert_eq!(summary.order, ids(&["2.5", "2.5.1", "2.5.2", "2.5.7"]));
        assert_eq!(summary.completed.len(), 4);
        assert_eq!(summary.passed(), 4);
        assert!(summary.failures.is_empty());
        assert_eq!(artifacts.artifact_count().await, 4);

        // 2.5.2 saw the finished 2.5.1 text.
        let prompts = oracle.prompts();
        let p252 = prompts.iter().find(|p| p.starts_with(&gen("2.5.2"))).unwrap();
        assert!(p252.contains("\\section{Section 2.5.1}"));
        assert!(!p252.contains("(not yet written)"));

        // [2.5, 2.5.1] then [2.5.2, 2.5.7]: one inter-batch pause.
        assert!(started.elapsed() >= std::time::Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn low_quality_still_persisted() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected").when(&gen("2.5.4"), &uncited_section("2.5.4")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let config = GenerationConfig {
            enable_refinement: false,
            ..quiet_config()
        };
        let orch = orchestrator(oracle.clone(), artifacts.clone(), config);

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;

        let report = &summary.completed[0];
        assert!(!report.quality.is_valid);
        assert!(report.quality.score < 60);
        assert_eq!(report.revisions, 0);
        assert_eq!(summary.below_threshold().count(), 1);
        assert_eq!(
            artifacts.read_artifact("2.5.4").await.unwrap(),
            Some(uncited_section("2.5.4").trim().to_string())
        );
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn refinement_replaces_weak_draft() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .when("Revise section 2.5.4 ", &format!("```latex\n{}```", good_section("2.5.4")))
                .when(&gen("2.5.4"), &uncited_section("2.5.4")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let orch = orchestrator(oracle.clone(), artifacts.clone(), quiet_config());

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;

        let report = &summary.completed[0];
        assert_eq!(report.revisions, 1);
        assert!(report.quality.is_valid);
        assert_eq!(oracle.calls(), 2);
        let stored = artifacts.read_artifact("2.5.4").await.unwrap().unwrap();
        assert!(stored.contains("\\studyref{a}"));
        assert!(!stored.contains("```"));
    }

    #[tokio::test]
    async fn revision_without_sections_rejected() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .when("Revise section 2.5.4 ", "I cannot help with that.")
                .when(&gen("2.5.4"), &uncited_section("2.5.4")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let orch = orchestrator(oracle.clone(), artifacts.clone(), quiet_config());

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;

        assert_eq!(summary.completed[0].revisions, 0);
        assert_eq!(
            artifacts.read_artifact("2.5.4").await.unwrap(),
            Some(uncited_section("2.5.4").trim().to_string())
        );
    }

    #[tokio::test]
    async fn revisions_capped() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .when("Revise section 2.5.4 ", &uncited_section("2.5.4"))
                .when(&gen("2.5.4"), &uncited_section("2.5.4")),
        );
        let orch = orchestrator(
            oracle.clone(),
            Arc::new(InMemoryArtifactStore::new()),
            quiet_config(),
        );

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;
        assert_eq!(summary.completed[0].revisions, 2);
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn node_failure_does_not_stop_run() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .fail_when(&gen("2.5.1"), "model crashed")
                .when(&gen("2.5.2"), &good_section("2.5.2"))
                .when(&gen("2.5.7"), &good_section("2.5.7")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let orch = orchestrator(oracle, artifacts.clone(), quiet_config());

        let summary = orch
            .run(&ids(&["2.5.1", "2.5.2", "2.5.7"]), &CancellationToken::new())
            .await;

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].key, "2.5.1");
        assert!(summary.failures[0].error.contains("model crashed"));
        assert_eq!(summary.completed.len(), 2);
        assert!(artifacts.read_artifact("2.5.1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unwritable_store_fails_each_node() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected")
                .when(&gen("2.5.1"), &good_section("2.5.1"))
                .when(&gen("2.5.7"), &good_section("2.5.7")),
        );
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.set_read_only(true);
        let orch = orchestrator(oracle.clone(), artifacts, quiet_config());

        let summary = orch
            .run(&ids(&["2.5.1", "2.5.7"]), &CancellationToken::new())
            .await;

        assert!(summary.completed.is_empty());
        assert_eq!(summary.failures.len(), 2);
        assert!(summary.failures.iter().all(|f| f.error.contains("Store unavailable")));
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn rate_limited_node_retried() {
        let oracle = Arc::new(
            ScriptedOracle::new("unexpected").status_then(
                &gen("2.5.1"),
                429,
                2,
                &good_section("2.5.1"),
            ),
        );
        let orch = orchestrator(
            oracle.clone(),
            Arc::new(InMemoryArtifactStore::new()),
            quiet_config(),
        );

        let summary = orch.run(&ids(&["2.5.1"]), &CancellationToken::new()).await;
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let oracle = Arc::new(ScriptedOracle::new("unexpected"));
        let orch = orchestrator(
            oracle.clone(),
            Arc::new(InMemoryArtifactStore::new()),
            quiet_config(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = orch.run(&ids(&["2.5.1", "2.5.2"]), &cancel).await;
        assert!(summary.cancelled);
        assert_eq!(summary.not_started, ids(&["2.5.1", "2.5.2"]));
        assert!(summary.completed.is_empty());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn cyclic_graph_still_generates_everything() {
        let oracle = Arc::new(ScriptedOracle::new(&good_section("x")));
        let mut graph = DependencyGraph::new();
        graph.insert("2.5.1".into(), vec!["2.5.2".into()]);
        graph.insert("2.5.2".into(), vec!["2.5.1".into()]);
        let orch = orchestrator(oracle, Arc::new(InMemoryArtifactStore::new()), quiet_config())
            .with_graph(graph);

        let summary = orch.run(&ids(&["2.5.2", "2.5.1"]), &CancellationToken::new()).await;
        assert_eq!(summary.cyclic, ids(&["2.5.2", "2.5.1"]));
        assert_eq!(summary.completed.len(), 2);
    }

    #[tokio::test]
    async fn routed_evidence_reaches_prompt() {
        let oracle = Arc::new(ScriptedOracle::new(&good_section("2.5.4")));
        let evidence = InMemoryEvidenceStore::new(vec![EvidenceItem::new(
            "pmid:111",
            "Pivotal RCT",
            "HbA1c fell by 0.8%. Weight also fell.",
            "5.3.5.1",
        )]);
        let orch = Orchestrator::new(
            Arc::new(ctd_taxonomy().unwrap()),
            oracle.clone(),
            Arc::new(evidence),
            Arc::new(InMemoryArtifactStore::new().with_guidance("2.5.4", "Summarise efficacy.")),
            fast_retry(),
            quiet_config(),
        )
        .with_routes(EvidenceRoutes::new().route("2.5.4", &["5.3.5.1"]));

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;
        assert_eq!(summary.completed[0].evidence_count, 1);

        let prompt = &oracle.prompts()[0];
        assert!(prompt.contains("Summarise efficacy."));
        assert!(prompt.contains("- id: pmid:111 | Pivotal RCT"));
        assert!(prompt.contains("Key finding: HbA1c fell by 0.8%."));
    }

    #[tokio::test]
    async fn classified_documents_reach_prompt() {
        let ledger = ClassificationLedger::new(Arc::new(MemoryLedgerBackend::new()));
        let record = |placement: &str, references: &[&str]| ClassificationRecord {
            module: "5".into(),
            placement_section: Some(placement.into()),
            reference_sections: references
                .iter()
                .map(|n| ReferenceTag {
                    node: n.to_string(),
                    confidence: Confidence::Medium,
                })
                .collect(),
            confidence: Confidence::High,
            classified_at: chrono::Utc::now(),
        };
        ledger
            .save("csr/pivotal.txt", &record("5.3.5.1", &["2.5.4"]))
            .await
            .unwrap();
        ledger
            .save("csr/food-effect.txt", &record("5.3.1.1", &["2.5.4"]))
            .await
            .unwrap();
        ledger.save("csr/pk.txt", &record("5.3.3.1", &[])).await.unwrap();

        let docs = vec![
            SourceDocument::new("csr/pivotal.txt", "pivotal.txt", "HbA1c fell by 0.9%. Weight fell too."),
            SourceDocument::new("csr/food-effect.txt", "food-effect.txt", "Food did not alter exposure."),
            SourceDocument::new("csr/pk.txt", "pk.txt", "Half-life was 12 hours."),
        ];
        let evidence = LedgerEvidenceStore::build(&ledger, &docs, DOCUMENT_EXCERPT_CHARS)
            .await
            .unwrap();

        let oracle = Arc::new(ScriptedOracle::new(&good_section("2.5.4")));
        let orch = Orchestrator::new(
            Arc::new(ctd_taxonomy().unwrap()),
            oracle.clone(),
            Arc::new(evidence),
            Arc::new(InMemoryArtifactStore::new()),
            fast_retry(),
            quiet_config(),
        )
        .with_routes(clinical_overview_evidence_routes());

        let summary = orch.run(&ids(&["2.5.4"]), &CancellationToken::new()).await;
        assert_eq!(summary.completed[0].evidence_count, 2);

        let prompt = &oracle.prompts()[0];
        assert!(prompt.contains("- id: csr/pivotal.txt | pivotal.txt"));
        assert!(prompt.contains("Key finding: HbA1c fell by 0.9%."));
        assert!(prompt.contains("- id: csr/food-effect.txt | food-effect.txt"));
        assert!(!prompt.contains("csr/pk.txt"));
    }
}
