//! Chunk filtering between fusion and prompting.
//!
//! Drops chunks that are too short to carry an answer, and for factual
//! queries (identifiers, numbers, dates) applies a cosine check to
//! chunks that share no significant token with the query. Chunk
//! embeddings are cached per call, keyed by chunk text.

use std::collections::HashMap;

use crate::embeddings::{cosine_similarity, Embedder};
use crate::processing::significant_tokens;
use crate::types::QueryFeatures;

#[derive(Debug, Clone)]
pub struct FilterParams {
    pub min_tokens: usize,
    pub max_docs: usize,
    pub cosine_threshold: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_tokens: 15,
            max_docs: 10,
            cosine_threshold: 0.55,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub input_docs: usize,
    pub kept_docs: usize,
    pub rejected_short: usize,
    pub rejected_overlap: usize,
    pub overlaps: Vec<usize>,
}

/// Filter retrieved chunks against the query, keeping at most
/// `max_docs` survivors in their incoming order.
pub async fn filter_retrieved(
    chunks: &[String],
    query: &str,
    query_vec: &[f32],
    features: &QueryFeatures,
    embedder: &dyn Embedder,
    params: &FilterParams,
) -> (Vec<String>, FilterStats) {
    let query_tokens = significant_tokens(query);

    let mut stats = FilterStats {
        input_docs: chunks.len(),
        ..Default::default()
    };
    let mut kept: Vec<String> = Vec::new();
    let mut embedding_cache: HashMap<String, Vec<f32>> = HashMap::new();

    for chunk in chunks {
        let tokens = significant_tokens(chunk);
        if tokens.len() < params.min_tokens {
            stats.rejected_short += 1;
            continue;
        }

        let overlap = tokens.intersection(&query_tokens).count();
        stats.overlaps.push(overlap);

        if features.is_factual() && overlap == 0 {
            let similarity = match embedding_cache.get(chunk) {
                Some(vector) => cosine_similarity(query_vec, vector),
                None => match embedder.embed(chunk).await {
                    Ok(vector) => {
                        let similarity = cosine_similarity(query_vec, &vector);
                        embedding_cache.insert(chunk.clone(), vector);
                        similarity
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Chunk embedding failed during filtering");
                        0.0
                    }
                },
            };
            if similarity < params.cosine_threshold {
                stats.rejected_overlap += 1;
                continue;
            }
        }

        kept.push(chunk.clone());
        stats.kept_docs += 1;
    }

    kept.truncate(params.max_docs);
    (kept, stats)
}
