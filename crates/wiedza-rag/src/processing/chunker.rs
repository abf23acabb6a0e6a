//! Document chunking.
//!
//! The pipeline splits retrieved documents with the sentence-based
//! splitter: sentences are appended until the word budget would
//! overflow, and each new chunk is seeded with the tail sentences of
//! the previous one so context survives the cut. A plain token-window
//! splitter is kept alongside it as a reference implementation for the
//! chunking laws in the tests.

use super::tokenize;

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Sentence-based splitter with sentence-preserving overlap.
///
/// `sentences` must be the sentence list of `text` as produced by the
/// NLP pipeline. Empty text yields no chunks; text within the word
/// budget yields a single chunk.
pub fn chunk_document(
    text: &str,
    sentences: &[String],
    max_tokens: usize,
    overlap: usize,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if word_count(text) <= max_tokens {
        return vec![text.trim().to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;
    // Sentences appended since the last overlap seed; a trailing chunk
    // holding only seed sentences would duplicate the previous one.
    let mut fresh = 0usize;

    for sentence in sentences {
        let words = word_count(sentence);
        if current_words + words > max_tokens && !current.is_empty() {
            chunks.push(current.join(" "));

            let mut seed: Vec<&str> = Vec::new();
            let mut seed_words = 0usize;
            for prior in current.iter().rev() {
                seed.insert(0, prior);
                seed_words += word_count(prior);
                if seed_words >= overlap {
                    break;
                }
            }
            current = seed;
            current_words = seed_words;
            fresh = 0;
        }
        current.push(sentence.as_str());
        current_words += words;
        fresh += 1;
    }

    if fresh > 0 && !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Token-window splitter: fixed windows of `max_tokens` tokens that
/// step forward by `max_tokens - overlap`.
pub fn chunk_tokens(text: &str, max_tokens: usize, overlap: usize) -> Vec<String> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }
    if tokens.len() <= max_tokens {
        return vec![text.to_string()];
    }

    let step = max_tokens.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_tokens).min(tokens.len());
        chunks.push(tokens[start..end].join(" "));
        if end >= tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(words_per_sentence: usize, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let words: Vec<String> =
                    (0..words_per_sentence).map(|w| format!("s{}w{}", i, w)).collect();
                words.join(" ")
            })
            .collect()
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_document("", &[], 200, 30).is_empty());
        assert!(chunk_document("   ", &[], 200, 30).is_empty());
    }

    #[test]
    fn test_short_text_yields_single_chunk() {
        let text = "Krótki dokument o inflacji.";
        let sents = vec![text.to_string()];
        let chunks = chunk_document(text, &sents, 200, 30);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_consecutive_chunks_share_overlap_words() {
        let sents = sentences(10, 12);
        let text = sents.join(" ");
        let chunks = chunk_document(&text, &sents, 50, 20);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].split_whitespace().collect();
            let next: Vec<&str> = pair[1].split_whitespace().collect();
            // The seed is whole sentences totalling at least the
            // overlap, so the next chunk starts inside the previous.
            let shared = next
                .iter()
                .take_while(|w| prev.contains(w))
                .count();
            assert!(shared >= 20, "chunks share only {} words", shared);
        }
    }

    /// Locate a chunk as a span of consecutive sentences.
    fn sentence_span(chunk: &str, sents: &[String]) -> (usize, usize) {
        for start in 0..sents.len() {
            for end in (start + 1)..=sents.len() {
                if sents[start..end].join(" ") == chunk {
                    return (start, end);
                }
            }
        }
        panic!("chunk is not a consecutive sentence span: {}", chunk);
    }

    #[test]
    fn test_chunks_preserve_sentence_sequence() {
        let sents = sentences(8, 10);
        let text = sents.join(" ");
        let chunks = chunk_document(&text, &sents, 40, 16);
        assert!(chunks.len() > 1);

        // Every chunk is a consecutive sentence span; spans overlap and
        // advance, starting at the first sentence and ending at the last.
        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| sentence_span(c, &sents)).collect();
        assert_eq!(spans[0].0, 0);
        assert_eq!(spans.last().unwrap().1, sents.len());
        for pair in spans.windows(2) {
            assert!(pair[1].0 <= pair[0].1, "gap between consecutive chunks");
            assert!(pair[1].1 > pair[0].1, "chunk does not advance");
        }
    }

    #[test]
    fn test_single_oversized_sentence_still_chunks() {
        let long: Vec<String> = (0..100).map(|i| format!("w{}", i)).collect();
        let sents = vec![long.join(" "), "koniec tekstu tutaj".to_string()];
        let text = sents.join(" ");
        let chunks = chunk_document(&text, &sents, 50, 10);
        assert!(!chunks.is_empty());
        assert!(chunks[0].contains("w0"));
    }

    #[test]
    fn test_token_window_short_text_single_chunk() {
        let chunks = chunk_tokens("jeden dwa trzy", 250, 30);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_token_window_steps_by_size_minus_overlap() {
        let words: Vec<String> = (0..100).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_tokens(&text, 40, 10);
        assert!(chunks.len() > 1);
        // Second window starts at token 30.
        assert!(chunks[1].starts_with("w30"));
    }

    #[test]
    fn test_token_window_covers_all_tokens() {
        let words: Vec<String> = (0..75).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_tokens(&text, 40, 10);
        let last = chunks.last().unwrap();
        assert!(last.contains("w74"));
    }
}
