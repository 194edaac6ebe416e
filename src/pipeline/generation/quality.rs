//! Scoring of generated LaTeX artifacts.
//!
//! Starts from 100 and deducts per defect category. Delimiter and environment
//! problems are structural errors: any one of them makes the artifact invalid
//! regardless of score.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::QualityThresholds;

/// Commands that count as an evidence citation.
pub const CITATION_MARKERS: &[&str] = &["\\modref{", "\\tableref{", "\\studyref{", "\\cite{"];

const LIST_ENVIRONMENTS: &[&str] = &["itemize", "enumerate", "description"];
const ALIGNMENT_ENVIRONMENTS: &[&str] = &[
    "tabular", "tabular*", "tabularx", "longtable", "array", "align", "align*", "matrix",
];

const PROMOTIONAL_WORDS: &[&str] = &[
    "breakthrough",
    "revolutionary",
    "groundbreaking",
    "unprecedented",
    "miraculous",
    "game-changing",
    "best-in-class",
    "remarkable",
    "dramatic",
];

// Deductions
const TOO_SHORT: i32 = 20;
const TOO_LONG: i32 = 10;
const NO_CITATIONS: i32 = 45;
const FEW_CITATIONS: i32 = 15;
const NO_SECTIONS: i32 = 15;
const MISSING_ELEMENT: i32 = 10;
const UNLABELED_SECTION: i32 = 10;
const UNBALANCED_BRACES: i32 = 20;
const ENVIRONMENT_MISMATCH: i32 = 15;
const STRAY_ITEM: i32 = 10;
const UNESCAPED_SPECIALS: i32 = 5;
const PROMOTIONAL: i32 = 10;

static SECTION_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:sub)*section\*?\{").unwrap());

static ENV_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(begin|end)\{([^}]*)\}|\\item\b|[&#]").unwrap());

static PERCENT_AFTER_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d%").unwrap());

static PROMOTIONAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let words: Vec<String> = PROMOTIONAL_WORDS.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))).unwrap()
});

static ACRONYM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]{1,5}\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    /// 0-100.
    pub score: u8,
    pub issues: Vec<String>,
    /// Delimiter and environment defects.
    pub structural_errors: Vec<String>,
    pub suggestions: Vec<String>,
    pub citation_count: usize,
    pub is_valid: bool,
}

impl QualityReport {
    /// Issues and structural errors together, structural first.
    pub fn all_problems(&self) -> impl Iterator<Item = &String> {
        self.structural_errors.iter().chain(self.issues.iter())
    }
}

/// Citations expected for a node with `evidence_count` evidence items.
pub fn expected_citations(evidence_count: usize, thresholds: &QualityThresholds) -> usize {
    let low = thresholds.min_expected_citations;
    let high = thresholds.max_expected_citations.max(low);
    evidence_count.clamp(low, high)
}

pub fn count_citations(content: &str) -> usize {
    CITATION_MARKERS
        .iter()
        .map(|marker| content.matches(marker).count())
        .sum()
}

/// True when the content still has at least one sectioning command.
pub fn has_sectioning(content: &str) -> bool {
    content.contains("\\section") || content.contains("\\subsection")
}

pub fn validate_quality(
    content: &str,
    expected_citations: usize,
    thresholds: &QualityThresholds,
) -> QualityReport {
    let mut score: i32 = 100;
    let mut issues = Vec::new();
    let mut structural_errors = Vec::new();
    let mut suggestions = Vec::new();

    let body = strip_comments(content);

    // Length
    let length = content.chars().count();
    if length < thresholds.min_length {
        score -= TOO_SHORT;
        issues.push(format!(
            "Content too short: {length} characters (minimum {})",
            thresholds.min_length
        ));
    } else if length > thresholds.max_length {
        score -= TOO_LONG;
        issues.push(format!(
            "Content too long: {length} characters (maximum {})",
            thresholds.max_length
        ));
    }

    // Citations
    let citation_count = count_citations(&body);
    if citation_count == 0 {
        score -= NO_CITATIONS;
        issues.push("No evidence citations found".to_string());
        suggestions.push(format!(
            "Cite at least {expected_citations} evidence items with \\studyref{{}} or \\modref{{}}"
        ));
    } else if citation_count < expected_citations {
        score -= FEW_CITATIONS;
        issues.push(format!(
            "Only {citation_count} citations (expected at least {expected_citations})"
        ));
    }

    // Document structure
    let section_starts: Vec<usize> = SECTION_COMMAND.find_iter(&body).map(|m| m.start()).collect();
    if section_starts.len() < thresholds.min_sections {
        score -= NO_SECTIONS;
        issues.push(format!(
            "Found {} sectioning commands (minimum {})",
            section_starts.len(),
            thresholds.min_sections
        ));
    }

    for element in &thresholds.required_elements {
        if !body.contains(element.as_str()) {
            score -= MISSING_ELEMENT;
            issues.push(format!("Missing required element {element}"));
        }
    }

    let unlabeled = unlabeled_sections(&body, &section_starts);
    if unlabeled > 0 {
        score -= UNLABELED_SECTION;
        issues.push(format!("{unlabeled} section(s) without a \\label"));
    }

    // Structural errors
    if let Some(error) = brace_error(&body) {
        score -= UNBALANCED_BRACES;
        structural_errors.push(error);
    }

    let scan = scan_environments(&body);
    if !scan.environment_errors.is_empty() {
        score -= ENVIRONMENT_MISMATCH;
        structural_errors.extend(scan.environment_errors);
    }
    if scan.stray_items > 0 {
        score -= STRAY_ITEM;
        structural_errors.push(format!(
            "{} \\item command(s) outside a list environment",
            scan.stray_items
        ));
    }

    // Style
    let bare_percent = PERCENT_AFTER_NUMBER.find_iter(content).count();
    if scan.unescaped_specials > 0 || bare_percent > 0 {
        score -= UNESCAPED_SPECIALS;
        issues.push(format!(
            "{} unescaped special character(s) (&, #, %)",
            scan.unescaped_specials + bare_percent
        ));
    }

    let promotional: BTreeSet<String> = PROMOTIONAL_PATTERN
        .find_iter(&body)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if !promotional.is_empty() {
        score -= PROMOTIONAL;
        issues.push(format!(
            "Promotional language: {}",
            promotional.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    let undefined = undefined_abbreviations(&body);
    if !undefined.is_empty() {
        suggestions.push(format!(
            "Define abbreviations at first use: {}",
            undefined.join(", ")
        ));
    }

    let score = score.clamp(0, 100) as u8;
    let is_valid = score >= thresholds.pass_score && structural_errors.is_empty();

    QualityReport {
        score,
        issues,
        structural_errors,
        suggestions,
        citation_count,
        is_valid,
    }
}

// ═══════════════════════════════════════════════════════════
// Scanners
// ═══════════════════════════════════════════════════════════

/// Drop `%` comments (an escaped `\%` is text).
fn strip_comments(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let mut escaped = false;
            for (i, c) in line.char_indices() {
                match c {
                    '\\' => escaped = !escaped,
                    '%' if !escaped => return &line[..i],
                    _ => escaped = false,
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn brace_error(body: &str) -> Option<String> {
    let mut depth: i64 = 0;
    let mut escaped = false;
    for c in body.chars() {
        match c {
            '\\' => {
                escaped = !escaped;
                continue;
            }
            '{' if !escaped => depth += 1,
            '}' if !escaped => {
                depth -= 1;
                if depth < 0 {
                    return Some("Unmatched closing brace".to_string());
                }
            }
            _ => {}
        }
        escaped = false;
    }
    (depth > 0).then(|| format!("{depth} unclosed brace(s)"))
}

fn unlabeled_sections(body: &str, starts: &[usize]) -> usize {
    starts
        .iter()
        .enumerate()
        .filter(|&(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(body.len());
            !body[start..end].contains("\\label{")
        })
        .count()
}

#[derive(Debug, Default)]
struct EnvironmentScan {
    environment_errors: Vec<String>,
    stray_items: usize,
    unescaped_specials: usize,
}

fn scan_environments(body: &str) -> EnvironmentScan {
    let mut scan = EnvironmentScan::default();
    let mut stack: Vec<&str> = Vec::new();

    for caps in ENV_TOKEN.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        match (caps.get(1).map(|m| m.as_str()), caps.get(2).map(|m| m.as_str())) {
            (Some("begin"), Some(name)) => stack.push(name),
            (Some(_), Some(name)) => match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => scan
                    .environment_errors
                    .push(format!("\\end{{{name}}} closes \\begin{{{open}}}")),
                None => scan
                    .environment_errors
                    .push(format!("\\end{{{name}}} without matching \\begin")),
            },
            _ if whole.as_str() == "\\item" => {
                if !stack.iter().any(|env| LIST_ENVIRONMENTS.contains(env)) {
                    scan.stray_items += 1;
                }
            }
            _ => {
                let escaped = whole.start() > 0 && body.as_bytes()[whole.start() - 1] == b'\\';
                let aligned = whole.as_str() == "&"
                    && stack.iter().any(|env| ALIGNMENT_ENVIRONMENTS.contains(env));
                if !escaped && !aligned {
                    scan.unescaped_specials += 1;
                }
            }
        }
    }

    for open in stack.iter().rev() {
        scan.environment_errors
            .push(format!("\\begin{{{open}}} is never closed"));
    }
    scan
}

/// Acronyms never introduced as "(ACRONYM)" in the text. At most five are reported.
fn undefined_abbreviations(body: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut undefined = Vec::new();
    for m in ACRONYM.find_iter(body) {
        let acronym = m.as_str();
        if !seen.insert(acronym) {
            continue;
        }
        if !body.contains(&format!("({acronym})")) {
            undefined.push(acronym.to_string());
        }
        if undefined.len() == 5 {
            break;
        }
    }
    undefined
}
