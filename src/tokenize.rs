//! Character-level tokenizer for the synthesizer's text input.
//!
//! Maps each character of the (lowercased) input to its integer ID in a
//! fixed vocabulary, then wraps the sequence with start/end pad tokens (0).
//! The vocabulary must match the one the checkpoint was exported with:
//! pad, punctuation, ASCII letters, digits.
//!
//! Characters outside the vocabulary are silently skipped — the model was
//! never trained on them and the decoder tolerates the gap better than an
//! unknown-token id would.

use std::collections::HashMap;

use once_cell::sync::Lazy;

const PAD: char = '$';

/// Punctuation the checkpoint understands, space included.
const PUNCTUATION: &str = ";:,.!?¡¿—…\"«»“”'- ";

/// ASCII letters a–z (input is lowercased before lookup).
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";

const DIGITS: &str = "0123456789";

/// Character → index mapping, built at first use.
static VOCAB: Lazy<HashMap<char, i64>> = Lazy::new(|| {
    let symbols: Vec<char> = std::iter::once(PAD)
        .chain(PUNCTUATION.chars())
        .chain(LETTERS.chars())
        .chain(DIGITS.chars())
        .collect();

    symbols.into_iter().enumerate().map(|(i, c)| (c, i as i64)).collect()
});

/// Convert text to token ids, wrapped in pad tokens: `[0, tok…, 0]`.
pub fn text_to_ids(text: &str) -> Vec<i64> {
    let mut ids = Vec::with_capacity(text.len() + 2);
    ids.push(0);
    for c in text.to_lowercase().chars() {
        if let Some(&id) = VOCAB.get(&c) {
            ids.push(id);
        }
    }
    ids.push(0);
    ids
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_in_pad() {
        let ids = text_to_ids("hi");
        assert_eq!(ids.first(), Some(&0));
        assert_eq!(ids.last(), Some(&0));
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(text_to_ids("Hello"), text_to_ids("hello"));
    }

    #[test]
    fn test_unknown_chars_skipped() {
        // The emoji is not in the vocabulary and must not produce an id.
        assert_eq!(text_to_ids("hi🙂"), text_to_ids("hi"));
    }

    #[test]
    fn test_distinct_ids() {
        let ids = text_to_ids("ab");
        assert_ne!(ids[1], ids[2]);
    }
}
