//! Rendering chunks into platform-sized messages.
//!
//! A chunk is word-wrapped at [`SOFT_WRAP_WIDTH`], quoted line by line and
//! packed under a `Chunk n` header. When the quoted text does not fit in
//! one message it continues in further messages headed
//! `Chunk n (continued k)`. A character-level split catches unbroken
//! tokens so no message ever exceeds [`MAX_MESSAGE_LENGTH`] characters.

/// Maximum message length for Discord, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Width lines are wrapped at before quoting.
pub const SOFT_WRAP_WIDTH: usize = 1900;

const QUOTE_PREFIX: &str = "> ";

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Header for the first (`part == 0`) or a continuation message of a chunk.
pub fn chunk_header(number: usize, part: usize) -> String {
    if part == 0 {
        format!("📚 **Chunk {number}**")
    } else {
        format!("📚 **Chunk {number} (continued {part})**")
    }
}

/// Render chunk `number` (1-based) into one or more messages.
pub fn render_chunk(number: usize, text: &str) -> Vec<String> {
    // Room for a quoted line beside the widest header this chunk could get.
    let line_budget = MAX_MESSAGE_LENGTH - char_len(&chunk_header(number, usize::MAX)) - 1;
    let piece_budget = line_budget - QUOTE_PREFIX.len();

    let mut segments = Vec::new();
    let mut current = chunk_header(number, 0);
    let mut body_lines = 0;

    let quoted = text
        .lines()
        .flat_map(|line| wrap_line(line, SOFT_WRAP_WIDTH))
        .flat_map(|line| split_chars(&line, piece_budget))
        .map(|piece| quote(&piece));

    for line in quoted {
        if body_lines > 0 && char_len(&current) + 1 + char_len(&line) > MAX_MESSAGE_LENGTH {
            segments.push(std::mem::take(&mut current));
            current = chunk_header(number, segments.len());
            body_lines = 0;
        }
        // A continuation never opens on a blank separator line.
        if body_lines == 0 && !segments.is_empty() && line.trim() == ">" {
            continue;
        }
        current.push('\n');
        current.push_str(&line);
        body_lines += 1;
    }

    segments.push(current);
    segments
}

fn quote(line: &str) -> String {
    if line.is_empty() {
        ">".to_string()
    } else {
        format!("{QUOTE_PREFIX}{line}")
    }
}

/// Greedy word wrap. Words longer than `width` are left on their own line.
pub fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if char_len(line) <= width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let word_len = char_len(word);
        if current_len > 0 && current_len + 1 + word_len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Split into pieces of at most `max` characters. Empty input yields one
/// empty piece so blank lines survive.
fn split_chars(text: &str, max: usize) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Split a plain reply into messages that fit the limit.
///
/// Attempts to split at newlines, then spaces, then characters.
pub fn split_message(text: &str) -> Vec<String> {
    if char_len(text) <= MAX_MESSAGE_LENGTH {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let pieces: Vec<String> = wrap_line(line, MAX_MESSAGE_LENGTH)
            .iter()
            .flat_map(|piece| split_chars(piece, MAX_MESSAGE_LENGTH))
            .collect();

        for piece in pieces {
            let separator = usize::from(!current.is_empty());
            if char_len(&current) + separator + char_len(&piece) > MAX_MESSAGE_LENGTH {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_within_limit(segments: &[String]) {
        for segment in segments {
            assert!(
                char_len(segment) <= MAX_MESSAGE_LENGTH,
                "segment of {} chars",
                char_len(segment)
            );
        }
    }

    /// Strip headers and quote markers, rejoining hard-split pieces.
    fn body_words(segments: &[String]) -> Vec<String> {
        segments
            .iter()
            .flat_map(|s| s.lines().skip(1))
            .map(|line| line.trim_start_matches('>').trim_start().to_string())
            .flat_map(|line| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn short_chunk_is_one_message() {
        let segments = render_chunk(2, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(
            segments,
            vec!["📚 **Chunk 2**\n> First paragraph.\n>\n> Second paragraph.".to_string()]
        );
    }

    #[test]
    fn long_chunk_continues() {
        let paragraph = "word ".repeat(300).trim_end().to_string();
        let text = vec![paragraph.clone(); 4].join("\n\n");
        let segments = render_chunk(7, &text);

        assert!(segments.len() > 1);
        assert!(segments[0].starts_with("📚 **Chunk 7**\n"));
        assert!(segments[1].starts_with("📚 **Chunk 7 (continued 1)**\n> word"));
        assert_within_limit(&segments);
        assert_eq!(body_words(&segments).len(), 1200);
    }

    #[test]
    fn soft_wraps_long_lines() {
        let text = "abcd ".repeat(1000);
        let segments = render_chunk(1, text.trim_end());
        assert_within_limit(&segments);
        for line in segments.iter().flat_map(|s| s.lines().skip(1)) {
            assert!(char_len(line) <= SOFT_WRAP_WIDTH + QUOTE_PREFIX.len());
        }
        assert_eq!(body_words(&segments).len(), 1000);
    }

    #[test]
    fn unbroken_token_is_hard_split() {
        let token = "x".repeat(5000);
        let segments = render_chunk(3, &token);
        assert!(segments.len() >= 3);
        assert_within_limit(&segments);
        let rejoined: String = body_words(&segments).concat();
        assert_eq!(rejoined, token);
    }

    #[test]
    fn multibyte_counts_characters() {
        let text = "é".repeat(4500);
        let segments = render_chunk(1, &text);
        assert_within_limit(&segments);
        assert_eq!(body_words(&segments).concat().chars().count(), 4500);
    }

    #[test]
    fn wrap_line_keeps_short_lines() {
        assert_eq!(wrap_line("short", 10), vec!["short"]);
        assert_eq!(wrap_line("aa bb cc dd", 5), vec!["aa bb", "cc dd"]);
        assert_eq!(wrap_line("aaaaaaa bb", 5), vec!["aaaaaaa", "bb"]);
    }

    #[test]
    fn split_short_message() {
        assert_eq!(split_message("Short message"), vec!["Short message"]);
    }

    #[test]
    fn split_long_message() {
        let text = "a ".repeat(1500);
        let chunks = split_message(&text);
        assert!(chunks.len() > 1);
        assert_within_limit(&chunks);
    }
}
