// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic token estimation for budget accounting.
//!
//! tokens ≈ word_count × 1.33, where a word is a maximal alphanumeric run
//! (whitespace and punctuation are boundaries, locale-independent).  The
//! estimate is used only for prompt budgeting; real usage numbers come from
//! the provider's usage record when available.

pub(crate) const TOKENS_PER_WORD: f64 = 1.33;

/// Locale-independent word count: maximal alphanumeric runs.
pub fn word_count(text: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .count()
}

/// Estimate the token count of one text fragment.
pub fn estimate_tokens(text: &str) -> usize {
    (word_count(text) as f64 * TOKENS_PER_WORD) as usize
}

/// Estimate the summed token count of a batch of fragments.
pub fn estimate_batch<'a>(texts: impl IntoIterator<Item = &'a str>) -> usize {
    texts.into_iter().map(estimate_tokens).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n\t"), 0);
    }

    #[test]
    fn two_words_floor_to_two_tokens() {
        assert_eq!(estimate_tokens("Hello back"), 2);
    }

    #[test]
    fn punctuation_is_a_boundary() {
        // "foo,bar.baz" → 3 words → 3.99 → 3
        assert_eq!(estimate_tokens("foo,bar.baz"), 3);
    }

    #[test]
    fn estimate_is_idempotent() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
    }

    #[test]
    fn batch_matches_sum_of_parts() {
        let parts = ["one two", "three four five"];
        assert_eq!(
            estimate_batch(parts),
            estimate_tokens(parts[0]) + estimate_tokens(parts[1])
        );
    }

    #[test]
    fn hundred_words_scale_by_factor() {
        let text = vec!["word"; 100].join(" ");
        assert_eq!(estimate_tokens(&text), 133);
    }
}
