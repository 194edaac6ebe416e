//! Prompt context for one generation target: guidance, evidence digest and
//! previews of already-written related sections.

use std::fmt::Write as _;

use super::artifact::ArtifactStore;
use super::evidence::EvidenceItem;
use super::quality::{QualityReport, CITATION_MARKERS};
use super::GenerationError;
use crate::pipeline::dependency::DependencyGraph;
use crate::pipeline::text::{first_sentence, truncate_text};
use crate::taxonomy::Taxonomy;

pub const GENERATION_SYSTEM_PROMPT: &str = r#"
You are a regulatory medical writer drafting one section of a Common Technical
Document in LaTeX.

Rules:
- Output LaTeX body content only: no preamble, no \documentclass, no markdown.
- Start with \section{...} followed by \label{sec:<node id>}.
- Support every factual claim with the evidence provided, citing it with
  \studyref{<evidence id>}; refer to other dossier sections with
  \secref{sec:<node id>} and to modules with \modref{<module>}.
- Use neutral, factual language. No promotional wording.
- Escape LaTeX special characters (\%, \&, \#, \_).
"#;

pub const REFINEMENT_SYSTEM_PROMPT: &str = r#"
You revise LaTeX sections of a Common Technical Document. Fix every listed
problem while keeping all correct content and citations. Return the complete
revised section as LaTeX body content only.
"#;

/// An already-scheduled section this node may cross-reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedSection {
    pub node: String,
    pub title: String,
    /// Summary of the written artifact, `None` when it does not exist yet.
    pub preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node: String,
    pub title: String,
    pub guidance: Option<String>,
    pub evidence: Vec<EvidenceItem>,
    pub related: Vec<RelatedSection>,
    pub expected_citations: usize,
}

/// Declared dependencies plus the taxonomy parent when the parent is itself
/// a target of this run. Deduplicated, dependency order first.
pub fn related_nodes(
    node: &str,
    graph: &DependencyGraph,
    targets: &[String],
    taxonomy: &Taxonomy,
) -> Vec<String> {
    let mut related: Vec<String> = graph.get(node).cloned().unwrap_or_default();
    if let Some(parent) = taxonomy.parent_of(node) {
        if targets.iter().any(|t| t == parent) {
            related.push(parent.to_string());
        }
    }
    let mut seen = std::collections::HashSet::new();
    related.retain(|r| r != node && seen.insert(r.clone()));
    related
}

pub async fn collect_related(
    node: &str,
    graph: &DependencyGraph,
    targets: &[String],
    taxonomy: &Taxonomy,
    store: &dyn ArtifactStore,
    preview_chars: usize,
) -> Result<Vec<RelatedSection>, GenerationError> {
    let mut sections = Vec::new();
    for related in related_nodes(node, graph, targets, taxonomy) {
        let preview = store
            .read_artifact(&related)
            .await?
            .map(|content| summarize_artifact(&content, preview_chars));
        if preview.is_none() {
            tracing::warn!(node, related = %related, "Related section not yet written");
        }
        sections.push(RelatedSection {
            title: taxonomy.title_of(&related).unwrap_or(&related).to_string(),
            node: related,
            preview,
        });
    }
    Ok(sections)
}

/// Headings plus the first non-empty line under each, capped at `max_chars`.
pub fn summarize_artifact(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.trim().to_string();
    }

    let mut summary = Vec::new();
    let mut want_body_line = false;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("\\section")
            || line.starts_with("\\subsection")
            || line.starts_with("\\subsubsection")
        {
            summary.push(line);
            want_body_line = true;
        } else if want_body_line && !line.starts_with("\\label") {
            summary.push(line);
            want_body_line = false;
        }
    }

    if summary.is_empty() {
        return truncate_text(content.trim(), max_chars);
    }
    truncate_text(&summary.join("\n"), max_chars)
}

/// Evidence digest grouped by source node, at most `max_items` entries.
pub fn format_evidence(items: &[EvidenceItem], max_items: usize) -> String {
    if items.is_empty() {
        return "No evidence items are available for this section. Do not invent studies.\n"
            .to_string();
    }

    let shown = &items[..items.len().min(max_items)];
    let mut sources: Vec<&str> = Vec::new();
    for item in shown {
        if !sources.contains(&item.source_node.as_str()) {
            sources.push(&item.source_node);
        }
    }

    let mut out = String::new();
    for source in sources {
        let _ = writeln!(out, "[{source}]");
        for item in shown.iter().filter(|i| i.source_node == source) {
            let _ = write!(out, "- id: {} | {}", item.id, item.title);
            if let Some(first) = item.authors.first() {
                let etal = if item.authors.len() > 1 { " et al." } else { "" };
                let _ = write!(out, " | {first}{etal}");
            }
            if let Some(year) = &item.year {
                let _ = write!(out, " ({year})");
            }
            out.push('\n');
            let finding = first_sentence(&item.summary);
            if !finding.is_empty() {
                let _ = writeln!(out, "  Key finding: {finding}");
            }
        }
    }
    if items.len() > shown.len() {
        let _ = writeln!(out, "({} more items omitted)", items.len() - shown.len());
    }
    out
}

pub fn build_generation_prompt(ctx: &NodeContext, max_evidence_items: usize) -> String {
    let mut prompt = format!("Node: {}\nTitle: {}\n\n", ctx.node, ctx.title);

    prompt.push_str("## Guidance\n");
    match &ctx.guidance {
        Some(guidance) => {
            prompt.push_str(guidance.trim());
            prompt.push('\n');
        }
        None => prompt.push_str("No specific guidance. Follow ICH M4E conventions.\n"),
    }

    let _ = writeln!(prompt, "\n## Evidence ({} items)", ctx.evidence.len());
    prompt.push_str(&format_evidence(&ctx.evidence, max_evidence_items));

    if !ctx.related.is_empty() {
        prompt.push_str("\n## Related sections\n");
        for related in &ctx.related {
            let _ = writeln!(prompt, "### {} {}", related.node, related.title);
            match &related.preview {
                Some(preview) => {
                    prompt.push_str(preview);
                    prompt.push('\n');
                }
                None => prompt.push_str("(not yet written)\n"),
            }
        }
    }

    let _ = write!(
        prompt,
        "\n## Requirements\n\
         - Begin with \\section{{{title}}} and \\label{{sec:{node}}}.\n\
         - Cite at least {n} evidence items.\n\
         - Cross-reference related sections with \\secref{{sec:<id>}}.\n",
        title = ctx.title,
        node = ctx.node,
        n = ctx.expected_citations,
    );
    prompt
}

pub fn build_refinement_prompt(node: &str, content: &str, report: &QualityReport) -> String {
    let mut prompt = format!(
        "Revise section {node} (quality score {}/100).\n\n## Problems\n",
        report.score
    );
    for problem in report.all_problems() {
        let _ = writeln!(prompt, "- {problem}");
    }
    for suggestion in &report.suggestions {
        let _ = writeln!(prompt, "- Suggestion: {suggestion}");
    }
    let _ = writeln!(
        prompt,
        "\nCitation commands: {}\n\n## Current section\n{}",
        CITATION_MARKERS
            .iter()
            .map(|m| format!("{m}...}}"))
            .collect::<Vec<_>>()
            .join(", "),
        content.trim()
    );
    prompt
}
