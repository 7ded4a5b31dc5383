//! Overlapping-window text chunker shared by the Library (C5) and Journal
//! (C6) ingestion pipelines, with differing `window`/`overlap` parameters.
//!
//! Prefers to break at a paragraph boundary, then a sentence boundary,
//! falling back to a hard cut at the window edge.

const SENTENCE_BREAKS: [&str; 6] = [". ", ".\n", "? ", "?\n", "! ", "!\n"];

/// `window` is the target chunk size `W`, `overlap` the overlap `O` (must be
/// `< window`). Chunks form a covering sequence: consecutive chunks share at
/// most `O` characters.
pub fn chunk_text(text: &str, window: usize, overlap: usize, prefer_paragraph_breaks: bool) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if len <= window {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            vec![]
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + window).min(len);

        if end < len {
            let min_pos = start + (end - start) / 2;
            let mut broke = false;

            if prefer_paragraph_breaks {
                if let Some(pos) = rfind_in(&chars, "\n\n", min_pos, end) {
                    end = pos + 2;
                    broke = true;
                }
            }

            if !broke {
                if let Some(pos) = find_sentence_break(&chars, min_pos, end) {
                    end = pos;
                }
            }
        }

        let slice: String = chars[start..end].iter().collect();
        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        start = end.saturating_sub(overlap);
        if start >= len || end >= len {
            break;
        }
    }

    chunks
}

/// Journal conversations use a larger window/overlap than Library documents
/// by default (dialogue is denser); always prefers paragraph breaks.
pub fn chunk_conversation(text: &str, window: usize, overlap: usize) -> Vec<String> {
    chunk_text(text, window, overlap, true)
}

fn find_sentence_break(chars: &[char], min_pos: usize, end: usize) -> Option<usize> {
    // First separator (in listed order) whose rightmost match starts after
    // min_pos wins — not the overall rightmost match across all separators.
    for sep in SENTENCE_BREAKS {
        if let Some(pos) = rfind_in(chars, sep, min_pos, end) {
            return Some(pos + sep.chars().count());
        }
    }
    None
}

/// Last occurrence of `needle` whose start position lies in `[min_pos, end)`.
fn rfind_in(chars: &[char], needle: &str, min_pos: usize, end: usize) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || end > chars.len() || needle.len() > end {
        return None;
    }
    let search_end = end.saturating_sub(needle.len());
    for pos in (min_pos..=search_end).rev() {
        if chars[pos..pos + needle.len()] == needle[..] {
            return Some(pos);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("short text", 1000, 100, true);
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   ", 1000, 100, true).is_empty());
    }

    #[test]
    fn long_text_produces_multiple_overlapping_chunks() {
        let text = "Apples are red. Bananas are yellow. Cherries are dark red.";
        let chunks = chunk_text(text, 40, 5, true);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40 + 10);
        }
    }

    #[test]
    fn prefers_paragraph_break_over_sentence_break() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = chunk_text(&text, 50, 5, true);
        assert!(chunks[0].chars().all(|c| c == 'a'));
    }

    #[test]
    fn chunking_covers_the_whole_text_with_overlap() {
        let text = "word ".repeat(50);
        let chunks = chunk_text(&text, 60, 10, false);
        let rejoined_prefix_len: usize = chunks.iter().map(|c| c.len()).sum();
        assert!(rejoined_prefix_len >= text.trim().len());
    }
}
