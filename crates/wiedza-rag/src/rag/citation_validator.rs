//! Citation grounding validation.
//!
//! Extracts every `[n]` citation from a model answer together with the
//! text it is supposed to support, then checks that the text actually
//! appears in fragment n: first as a normalized substring, then via a
//! fuzzy ratio over a sliding word window. An answer with no citations
//! or with any ungrounded citation is invalid.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CITATION_NUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation number regex is valid"));

static QUOTED_CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:"([^"]+)"\s*\[(\d+)\])|(?:\[(\d+)\]\s*"([^"]+)")"#)
        .expect("quoted citation regex is valid")
});

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!]\s+").expect("sentence split regex is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

static PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation regex is valid"));

/// Characters of surrounding answer text considered when recovering
/// the sentence a citation marker refers to.
const CONTEXT_WINDOW: usize = 200;

/// Number of `[n]` citation markers in an answer.
pub fn count_citations(answer: &str) -> usize {
    CITATION_NUM_RE.find_iter(answer).count()
}

/// A citation paired with the fragment number it claims to come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCitation {
    pub text: String,
    pub doc_number: usize,
}

pub struct CitationValidator {
    fuzzy_threshold: f64,
}

impl Default for CitationValidator {
    fn default() -> Self {
        Self::new(0.75)
    }
}

impl CitationValidator {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    /// Extract citations of both shapes: each `[n]` with the nearest
    /// sentence around it, and explicit `"…" [n]` / `[n] "…"` quoted
    /// forms. Quoted texts already captured are not duplicated.
    pub fn extract_citations(&self, answer: &str) -> Vec<ExtractedCitation> {
        let chars: Vec<char> = answer.chars().collect();
        let char_starts: Vec<usize> = answer.char_indices().map(|(i, _)| i).collect();
        let to_char_index =
            |byte: usize| char_starts.binary_search(&byte).unwrap_or_else(|i| i);

        let mut citations = Vec::new();

        for capture in CITATION_NUM_RE.captures_iter(answer) {
            let Some(number) = capture.get(1).and_then(|m| m.as_str().parse::<usize>().ok())
            else {
                continue;
            };
            let full = capture.get(0).expect("group 0 always present");
            let start = to_char_index(full.start());
            let end = to_char_index(full.end());

            let before: String = chars[start.saturating_sub(CONTEXT_WINDOW)..start]
                .iter()
                .collect::<String>()
                .trim()
                .to_string();
            let after: String = chars[end..(end + CONTEXT_WINDOW).min(chars.len())]
                .iter()
                .collect::<String>()
                .trim()
                .to_string();

            let text = if before.chars().count() > after.chars().count() {
                SENTENCE_SPLIT_RE
                    .split(&before)
                    .last()
                    .unwrap_or(&before)
                    .to_string()
            } else {
                SENTENCE_SPLIT_RE
                    .split(&after)
                    .next()
                    .unwrap_or(&after)
                    .to_string()
            };

            citations.push(ExtractedCitation {
                text,
                doc_number: number,
            });
        }

        for capture in QUOTED_CITATION_RE.captures_iter(answer) {
            let (text, number) = if let (Some(text), Some(number)) =
                (capture.get(1), capture.get(2))
            {
                (text.as_str(), number.as_str())
            } else if let (Some(number), Some(text)) = (capture.get(3), capture.get(4)) {
                (text.as_str(), number.as_str())
            } else {
                continue;
            };
            let Ok(number) = number.parse::<usize>() else {
                continue;
            };
            if citations.iter().any(|c| c.text == text) {
                continue;
            }
            citations.push(ExtractedCitation {
                text: text.to_string(),
                doc_number: number,
            });
        }

        citations
    }

    fn normalize(text: &str) -> String {
        let collapsed = WHITESPACE_RE.replace_all(text, " ");
        let stripped = PUNCT_RE.replace_all(&collapsed, "");
        stripped.to_lowercase().trim().to_string()
    }

    /// A citation is grounded when its normalized text is a substring
    /// of the fragment, or some word window of the fragment matches it
    /// with a ratio at or above the threshold.
    pub fn is_grounded(&self, citation_text: &str, document: &str) -> bool {
        let citation_norm = Self::normalize(citation_text);
        let document_norm = Self::normalize(document);

        // An empty recovered sentence matches vacuously; the answer is
        // still held to its other citations.
        if document_norm.contains(&citation_norm) {
            return true;
        }

        let citation_words = citation_norm.split_whitespace().count();
        let document_words: Vec<&str> = document_norm.split_whitespace().collect();
        let window = citation_words.max(5);
        if document_words.len() < window {
            return false;
        }

        let mut best: f64 = 0.0;
        for start in 0..=(document_words.len() - window) {
            let candidate = document_words[start..start + window].join(" ");
            let score = sequence_ratio(&citation_norm, &candidate);
            if score > best {
                best = score;
            }
        }
        best >= self.fuzzy_threshold
    }

    /// Validate every citation in an answer against the fragments the
    /// model was shown. `retrieved_docs` is 0-indexed; citations are
    /// 1-based.
    pub fn validate_answer(&self, answer: &str, retrieved_docs: &[String]) -> bool {
        let citations = self.extract_citations(answer);
        if citations.is_empty() {
            return false;
        }

        for citation in &citations {
            if citation.doc_number < 1 || citation.doc_number > retrieved_docs.len() {
                tracing::debug!(
                    doc_number = citation.doc_number,
                    "Citation points outside the fragment list"
                );
                return false;
            }
            let document = &retrieved_docs[citation.doc_number - 1];
            if !self.is_grounded(&citation.text, document) {
                tracing::debug!(citation = %citation.text, "Ungrounded citation");
                return false;
            }
        }
        true
    }
}

/// Gestalt similarity ratio: `2 * M / T`, where M is the total length
/// of the recursively found matching blocks and T the combined length
/// of both strings. Credits shared runs wherever they sit, so a
/// reordered clause still scores high.
fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_block_chars(&a, &b) as f64 / total as f64
}

/// Total characters covered by matching blocks: the longest common
/// block, then recursion on the pieces to its left and right. Ties go
/// to the earliest block in `a`, then in `b`.
fn matching_block_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut best_a = 0usize;
    let mut best_b = 0usize;
    let mut best_len = 0usize;
    let mut lengths = vec![0usize; b.len() + 1];
    for (i, &ch) in a.iter().enumerate() {
        let mut prev = 0usize;
        for (j, &other) in b.iter().enumerate() {
            let diagonal = lengths[j + 1];
            if ch == other {
                let len = prev + 1;
                lengths[j + 1] = len;
                if len > best_len {
                    best_len = len;
                    best_a = i + 1 - len;
                    best_b = j + 1 - len;
                }
            } else {
                lengths[j + 1] = 0;
            }
            prev = diagonal;
        }
    }

    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_block_chars(&a[..best_a], &b[..best_b])
        + matching_block_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}
