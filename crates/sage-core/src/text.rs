//! Word-count helpers for context budgeting.
//!
//! The provider payload is budgeted in whitespace-separated words, not
//! tokens — cheap to compute and stable across providers.

/// Count whitespace-separated words in `s`.
#[inline]
#[must_use]
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Keep at most the first `max_words` whitespace-separated words of `s`.
///
/// Collapses runs of whitespace to single spaces in the truncated form.
/// Returns the input unchanged (modulo ownership) when it already fits.
#[must_use]
pub fn truncate_words(s: &str, max_words: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= max_words {
        return s.to_owned();
    }
    words[..max_words].join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
