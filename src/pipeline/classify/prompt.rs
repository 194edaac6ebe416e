use crate::pipeline::text::truncate_text;
use crate::taxonomy::TaxonomyNode;

pub const PLACEMENT_SYSTEM_PROMPT: &str = r#"
You are a regulatory submission specialist filing source documents into the
ICH Common Technical Document (CTD). Your ONLY role is to choose where a
document is STORED.

RULES:
1. Choose exactly ONE option id from the list you are given.
2. Use only ids that appear in the list. Never invent ids.
3. If none of the options fits, return an empty selection.

OUTPUT: a single JSON object and nothing else:
{"selection": "<id>", "confidence": "high | medium | low", "rationale": "<one sentence>"}
"#;

pub const REFERENCE_SYSTEM_PROMPT: &str = r#"
You are a regulatory submission specialist mapping source documents onto the
ICH Common Technical Document (CTD). Your ONLY role is to list every section
that could CITE this document as supporting evidence.

RULES:
1. Choose ZERO OR MORE option ids from the list you are given.
2. Use only ids that appear in the list. Never invent ids.
3. Prefer precision: only include sections the document genuinely supports.

OUTPUT: a single JSON object and nothing else:
{"selection": ["<id>", "..."], "confidence": "high | medium | low", "rationale": "<one sentence>"}
"#;

/// Which traversal a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Placement,
    Reference,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placement => "placement",
            Self::Reference => "reference",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Placement => PLACEMENT_SYSTEM_PROMPT,
            Self::Reference => REFERENCE_SYSTEM_PROMPT,
        }
    }
}

/// Build one level's prompt. `scope` is the node whose children are the
/// options, or `None` when choosing among modules.
///
/// The first two lines are always `Task: <task>` and `Scope: <id|modules>`.
pub fn build_level_prompt(
    task: Task,
    scope: Option<&TaxonomyNode>,
    options: &[&TaxonomyNode],
    document_name: &str,
    document_text: &str,
    excerpt_chars: usize,
) -> String {
    let scope_line = scope.map_or("modules", |n| n.id.as_str());
    let scope_title = scope.map_or("CTD modules", |n| n.title.as_str());

    let mut listing = String::new();
    for option in options {
        listing.push_str(&format!("- {}: {}", option.id, option.title));
        if !option.hints.is_empty() {
            listing.push_str(&format!(" (typical content: {})", option.hints.join(", ")));
        }
        listing.push('\n');
    }

    let instruction = match task {
        Task::Placement => "Pick the single option where this document should be stored.",
        Task::Reference => "Pick every option that could cite this document.",
    };
    let excerpt = truncate_text(document_text.trim(), excerpt_chars);

    format!(
        "Task: {task}\nScope: {scope_line}\n\nYou are choosing within: {scope_title}\n{instruction}\n\nOptions:\n{listing}\n<document name=\"{document_name}\">\n{excerpt}\n</document>\n",
        task = task.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_level_prompt_lists_options() {
        let m3 = TaxonomyNode::new("3", "Quality").with_hints(&["CMC", "stability"]);
        let m5 = TaxonomyNode::new("5", "Clinical Study Reports");
        let prompt = build_level_prompt(
            Task::Placement,
            None,
            &[&m3, &m5],
            "study.pdf",
            "A randomized trial.",
            100,
        );
        assert!(prompt.starts_with("Task: placement\nScope: modules\n"));
        assert!(prompt.contains("- 3: Quality (typical content: CMC, stability)"));
        assert!(prompt.contains("- 5: Clinical Study Reports\n"));
        assert!(prompt.contains("A randomized trial."));
    }

    #[test]
    fn scoped_prompt_names_parent() {
        let parent = TaxonomyNode::new("3.1", "Drug Substance");
        let child = TaxonomyNode::new("3.1.1", "General Information");
        let prompt = build_level_prompt(Task::Reference, Some(&parent), &[&child], "d", "t", 100);
        assert!(prompt.starts_with("Task: reference\nScope: 3.1\n"));
        assert!(prompt.contains("Drug Substance"));
    }

    #[test]
    fn document_excerpt_truncated() {
        let text = "x".repeat(500);
        let prompt = build_level_prompt(Task::Placement, None, &[], "d", &text, 50);
        assert!(prompt.contains("[... truncated]"));
        assert!(!prompt.contains(&"x".repeat(51)));
    }

    #[test]
    fn system_prompts_differ_by_task() {
        assert!(Task::Placement.system_prompt().contains("exactly ONE"));
        assert!(Task::Reference.system_prompt().contains("ZERO OR MORE"));
    }
}
