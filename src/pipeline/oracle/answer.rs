//! Lenient oracle answer adapter.
//!
//! The oracle usually answers with a JSON object, sometimes wrapped in a
//! markdown fence or prose, with the selection under one of several keys and
//! ids written as strings, numbers or "5.3.1 Title". All of that guessing
//! lives here; callers only see `ParsedAnswer` or `ParseError`.

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::classify::Confidence;

/// Keys the selection may be reported under, most specific first.
const SELECTION_KEYS: &[&str] = &[
    "selection",
    "selections",
    "selected",
    "sections",
    "section",
    "subsections",
    "subsection",
    "modules",
    "module",
    "ids",
    "id",
    "choices",
    "choice",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    /// Normalized node ids in answer order, duplicates removed. Empty means
    /// the oracle explicitly selected nothing.
    pub ids: Vec<String>,
    pub confidence: Option<Confidence>,
    pub rationale: Option<String>,
}

impl ParsedAnswer {
    pub fn first(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON object found in answer")]
    NoJson,

    #[error("Malformed JSON: {0}")]
    InvalidJson(String),

    #[error("Answer has no selection field")]
    MissingSelection,
}

/// Interpret one raw oracle answer.
pub fn parse_answer(raw: &str) -> Result<ParsedAnswer, ParseError> {
    let json = extract_json_object(raw).ok_or(ParseError::NoJson)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ParseError::NoJson);
    };

    let selection = SELECTION_KEYS
        .iter()
        .find_map(|key| lookup_key(&map, key))
        .ok_or(ParseError::MissingSelection)?;

    let mut ids: Vec<String> = Vec::new();
    collect_ids(selection, &mut ids);

    let confidence = lookup_key(&map, "confidence").and_then(parse_confidence);
    let rationale = ["rationale", "reasoning", "reason", "explanation"]
        .iter()
        .find_map(|key| lookup_key(&map, key))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(ParsedAnswer {
        ids,
        confidence,
        rationale,
    })
}

/// Case-insensitive key lookup.
fn lookup_key<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn collect_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_ids(item, out);
            }
        }
        Value::String(s) => push_id(normalize_id(s), out),
        Value::Number(n) => push_id(normalize_id(&n.to_string()), out),
        // {"id": "5.3.1", "title": ...} entries inside a list
        Value::Object(obj) => {
            if let Some(inner) = lookup_key(obj, "id").or_else(|| lookup_key(obj, "section")) {
                collect_ids(inner, out);
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn push_id(id: Option<String>, out: &mut Vec<String>) {
    if let Some(id) = id {
        if !out.contains(&id) {
            out.push(id);
        }
    }
}

/// "Module 5" -> "5", "5.3.1 Reports of ..." -> "5.3.1", "none" -> nothing.
fn normalize_id(raw: &str) -> Option<String> {
    let mut text = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    for prefix in ["module", "section", "subsection"] {
        let head = text.get(..prefix.len());
        if text.len() > prefix.len() && head.is_some_and(|h| h.eq_ignore_ascii_case(prefix)) {
            text = text[prefix.len()..].trim_start();
            break;
        }
    }

    let token = text
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',' || c == ')' || c == '(')
        .find(|t| !t.is_empty())?
        .trim_end_matches('.');

    if token.is_empty() || !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(token.to_string())
}

fn parse_confidence(value: &Value) -> Option<Confidence> {
    match value {
        Value::String(s) => Confidence::from_str_lenient(s),
        Value::Number(n) => {
            let mut score = n.as_f64()?;
            // 0-100 scale
            if score > 1.0 {
                score /= 100.0;
            }
            Some(if score >= 0.8 {
                Confidence::High
            } else if score >= 0.5 {
                Confidence::Medium
            } else {
                Confidence::Low
            })
        }
        _ => None,
    }
}

/// Locate the JSON object in a response that may carry a ```json fence or prose.
fn extract_json_object(raw: &str) -> Option<&str> {
    let mut text = raw.trim();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            text = after[..end].trim();
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
