//! Compilable master document that pulls in every generated section.

use std::fmt::Write as _;

use super::artifact::{artifact_file_name, ArtifactStore};
use super::GenerationError;

pub const MASTER_DOCUMENT_NAME: &str = "main.tex";

const PREAMBLE: &str = r"\documentclass[11pt,a4paper]{article}
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage[margin=2.5cm]{geometry}
\usepackage{booktabs}
\usepackage{longtable}
\usepackage{amsmath}
\usepackage{hyperref}

% Cross-reference commands used by generated sections
\newcommand{\modref}[1]{Module~#1}
\newcommand{\secref}[1]{Section~\ref{#1}}
\newcommand{\studyref}[1]{[Study~#1]}
\newcommand{\tableref}[1]{Table~\ref{#1}}
";

/// Escape LaTeX special characters in plain text.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Master document text `\input`ing `sections` in the given order.
pub fn master_document(title: &str, sections: &[&str]) -> String {
    let mut doc = String::from(PREAMBLE);
    let _ = write!(
        doc,
        "\n\\title{{{}}}\n\\date{{\\today}}\n\n\\begin{{document}}\n\\maketitle\n\\tableofcontents\n\\newpage\n\n",
        escape_latex(title)
    );
    for node in sections {
        let file = artifact_file_name(node);
        let stem = file.trim_end_matches(".tex");
        let _ = writeln!(doc, "% {node}\n\\input{{{stem}}}\n\\newpage\n");
    }
    doc.push_str("\\end{document}\n");
    doc
}

/// Write `main.tex` for the nodes in `order` that have an artifact.
/// Returns the nodes included.
pub async fn assemble_master_document(
    title: &str,
    order: &[String],
    store: &dyn ArtifactStore,
) -> Result<Vec<String>, GenerationError> {
    let mut included = Vec::new();
    for node in order {
        if store.read_artifact(node).await?.is_some() {
            included.push(node.clone());
        } else {
            tracing::debug!(node = %node, "No artifact, left out of master document");
        }
    }

    let refs: Vec<&str> = included.iter().map(String::as_str).collect();
    store
        .write_document(MASTER_DOCUMENT_NAME, &master_document(title, &refs))
        .await?;

    tracing::info!(sections = included.len(), "Master document assembled");
    Ok(included)
}
