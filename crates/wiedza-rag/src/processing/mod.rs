//! Text processing primitives shared across the pipeline.

pub mod chunker;

use std::sync::LazyLock;

use regex::Regex;

pub use chunker::{chunk_document, chunk_tokens};

/// Word-or-punctuation tokenizer used for token budgets and overlap
/// sets. Mirrors the index-side analysis closely enough for counting.
static TOKEN_WITH_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").expect("token regex is valid"));

pub fn tokenize(text: &str) -> Vec<&str> {
    TOKEN_WITH_PUNCT_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .collect()
}

/// Lowercased distinct tokens longer than 2 characters, the unit the
/// filter compares chunks and queries in.
pub fn significant_tokens(text: &str) -> std::collections::HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_words_and_punctuation() {
        assert_eq!(tokenize("Ala ma kota."), vec!["Ala", "ma", "kota", "."]);
    }

    #[test]
    fn test_tokenize_keeps_unicode_words() {
        assert_eq!(tokenize("żółć łąka"), vec!["żółć", "łąka"]);
    }

    #[test]
    fn test_significant_tokens_drop_short_and_lowercase() {
        let tokens = significant_tokens("Inflacja w Polsce");
        assert!(tokens.contains("inflacja"));
        assert!(tokens.contains("polsce"));
        assert!(!tokens.contains("w"));
    }
}
