//! Sentence-aligned text chunking for streaming synthesis.
//!
//! Long inputs are split into small pieces so the client can start playback
//! while later pieces are still generating.  Strategy:
//!
//! 1. Split at sentence boundaries (`.` `!` `?` followed by whitespace and a
//!    capital letter).
//! 2. Group consecutive sentences until the chunk would exceed the character
//!    budget or the per-chunk sentence bound.
//! 3. A single sentence longer than the budget is split at word boundaries,
//!    so no emitted chunk ever exceeds the budget.
//!
//! Chunk order always matches input order.

use fancy_regex::Regex;
use once_cell::sync::Lazy;

/// Default character budget per chunk.
pub const DEFAULT_CHUNK_CHARS: usize = 150;

/// Default maximum number of sentences grouped into one chunk.
pub const DEFAULT_CHUNK_SENTENCES: usize = 3;

/// Sentence boundary: terminal punctuation, whitespace, then a capital.
/// Look-around keeps the punctuation attached to the preceding sentence.
static RE_SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?<=[.!?])\s+(?=[A-Z])").unwrap());

static RE_SPACES: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"\s+").unwrap());

/// Collapse runs of whitespace and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    RE_SPACES.replace_all(text.trim(), " ").into_owned()
}

/// Split one oversized sentence at word boundaries into pieces of at most
/// `max_chars` characters.  A single word longer than the budget is emitted
/// as its own piece rather than broken mid-word.
fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split `text` into ordered chunks of at most `max_chars` characters and at
/// most `max_sentences` sentences each.
///
/// Returns an empty vector for blank input.
pub fn split_into_chunks(text: &str, max_chars: usize, max_sentences: usize) -> Vec<String> {
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences: Vec<&str> = Vec::new();
    let mut last = 0;
    for m in RE_SENTENCE.find_iter(&text).flatten() {
        sentences.push(&text[last..m.start()]);
        last = m.end();
    }
    sentences.push(&text[last..]);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut sentence_count = 0;

    let mut flush = |current: &mut String, sentence_count: &mut usize, chunks: &mut Vec<String>| {
        if !current.is_empty() {
            chunks.push(std::mem::take(current));
        }
        *sentence_count = 0;
    };

    for sentence in sentences {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        // A sentence that cannot fit in any chunk is word-split on its own.
        if sentence.chars().count() > max_chars {
            flush(&mut current, &mut sentence_count, &mut chunks);
            chunks.extend(split_long_sentence(sentence, max_chars));
            continue;
        }

        let fits = current.is_empty()
            || (current.chars().count() + 1 + sentence.chars().count() <= max_chars
                && sentence_count < max_sentences);

        if !fits {
            flush(&mut current, &mut sentence_count, &mut chunks);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        sentence_count += 1;
    }
    flush(&mut current, &mut sentence_count, &mut chunks);

    tracing::debug!(
        chunks = chunks.len(),
        avg_chars = if chunks.is_empty() {
            0
        } else {
            chunks.iter().map(|c| c.chars().count()).sum::<usize>() / chunks.len()
        },
        "split text for streaming"
    );

    chunks
}

/// Split with the default budget and sentence bound.
pub fn split_default(text: &str) -> Vec<String> {
    split_into_chunks(text, DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_SENTENCES)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(split_default("").is_empty());
        assert!(split_default("   \n ").is_empty());
    }

    #[test]
    fn test_single_sentence() {
        let chunks = split_default("Hello world.");
        assert_eq!(chunks, vec!["Hello world."]);
    }

    #[test]
    fn test_groups_short_sentences() {
        let chunks = split_into_chunks("One. Two. Three. Four.", 150, 3);
        // The sentence bound caps grouping at three per chunk.
        assert_eq!(chunks, vec!["One. Two. Three.", "Four."]);
    }

    #[test]
    fn test_respects_char_budget() {
        let text = "This sentence is fairly long and detailed. So is this one, \
                    with several clauses in it. And here is a third sentence. \
                    Plus a fourth one for good measure.";
        let chunks = split_into_chunks(text, 80, 3);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 80, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn test_order_matches_input() {
        let chunks = split_into_chunks("First here. Second there. Third everywhere.", 20, 3);
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, "First here. Second there. Third everywhere.");
    }

    #[test]
    fn test_long_sentence_word_split() {
        let long = format!("{}.", "word ".repeat(60).trim());
        let chunks = split_into_chunks(&long, 50, 3);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn test_abbreviation_not_split_before_lowercase() {
        // Boundary requires a following capital, so "i.e. lowercase" stays whole.
        let chunks = split_into_chunks("This is tricky, i.e. not a boundary. Next one.", 150, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "This is tricky, i.e. not a boundary.");
    }

    #[test]
    fn test_whitespace_normalized() {
        let chunks = split_default("Hello\n\n   world.  Again  now.");
        assert_eq!(chunks, vec!["Hello world. Again now."]);
    }
}
