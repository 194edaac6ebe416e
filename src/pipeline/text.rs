//! Small text utilities shared by prompt builders.

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers ending at a sentence or line break when that keeps at least 80% of
/// the budget; appends a marker when anything was dropped.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];

    let boundary = head
        .rfind(". ")
        .map(|i| i + 1)
        .into_iter()
        .chain(head.rfind('\n'))
        .max()
        .filter(|&i| head[..i].chars().count() * 5 >= max_chars * 4);

    let kept = boundary.map_or(head, |i| &head[..i]);
    format!("{}\n[... truncated]", kept.trim_end())
}

/// First sentence (or first 200 characters) of a summary.
pub fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let end = text
        .find(". ")
        .map(|i| i + 1)
        .unwrap_or(text.len());
    let end = text
        .char_indices()
        .nth(200)
        .map_or(end, |(i, _)| i.min(end));
    &text[..end]
}

/// Remove a surrounding markdown code fence (```latex ... ```).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
