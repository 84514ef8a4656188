//! Text segmentation: raw text into paragraph-like units.
//!
//! A paragraph ends at `.`, `!` or `?` followed by a run of at least two
//! whitespace characters (a blank line or a double space). When the text
//! has at most one such paragraph, segmentation falls back to sentences.
//! Whitespace inside every unit is collapsed to single spaces, and units
//! shorter than [`MIN_PARAGRAPH_CHARS`] are dropped as noise.

/// Units with fewer characters than this are discarded.
pub const MIN_PARAGRAPH_CHARS: usize = 11;

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Split raw text into ordered paragraphs.
pub fn segment(raw: &str) -> Vec<String> {
    let paragraphs = keep_substantial(split_after_terminators(raw, 2));
    if paragraphs.len() > 1 {
        return paragraphs;
    }

    let normalized = normalize_whitespace(raw);
    keep_substantial(split_after_terminators(&normalized, 1))
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` right after each terminator followed by at least `min_gap`
/// whitespace characters.
fn split_after_terminators(text: &str, min_gap: usize) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if !TERMINATORS.contains(&c) {
            continue;
        }
        let end = i + c.len_utf8();
        let gap = text[end..]
            .chars()
            .take_while(|ch| ch.is_whitespace())
            .take(min_gap)
            .count();
        if gap >= min_gap {
            spans.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        spans.push(&text[start..]);
    }
    spans
}

fn keep_substantial(spans: Vec<&str>) -> Vec<String> {
    spans
        .into_iter()
        .map(normalize_whitespace)
        .filter(|span| span.chars().count() >= MIN_PARAGRAPH_CHARS)
        .collect()
}
