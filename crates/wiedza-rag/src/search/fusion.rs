//! Weighted Reciprocal Rank Fusion.
//!
//! Merges the lexical and dense ranked lists into one scored list:
//! `score(x) = w_L / rank_L(x) + w_D / rank_D(x)` with 1-based ranks
//! and a zero contribution from a list that does not contain x.

use std::collections::HashMap;

use crate::types::FusionWeights;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: u64,
    pub text: String,
    pub score: f64,
}

/// Fuse two ranked `(id, text)` lists, returning the `top_k` best.
///
/// Ties are stable: the document appearing earlier in the lexical list
/// wins, then the earlier dense rank. Text is resolved from the
/// lexical list first.
pub fn weighted_rrf(
    lexical: &[(u64, String)],
    dense: &[(u64, String)],
    weights: FusionWeights,
    top_k: usize,
) -> Vec<FusedHit> {
    let mut lexical_rank: HashMap<u64, usize> = HashMap::new();
    let mut dense_rank: HashMap<u64, usize> = HashMap::new();
    let mut texts: HashMap<u64, &str> = HashMap::new();

    for (rank, (id, text)) in lexical.iter().enumerate() {
        lexical_rank.entry(*id).or_insert(rank + 1);
        texts.entry(*id).or_insert(text.as_str());
    }
    for (rank, (id, text)) in dense.iter().enumerate() {
        dense_rank.entry(*id).or_insert(rank + 1);
        texts.entry(*id).or_insert(text.as_str());
    }

    let mut scores: HashMap<u64, f64> = HashMap::new();
    for (id, rank) in &lexical_rank {
        *scores.entry(*id).or_insert(0.0) += weights.lexical / *rank as f64;
    }
    for (id, rank) in &dense_rank {
        *scores.entry(*id).or_insert(0.0) += weights.dense / *rank as f64;
    }

    let mut fused: Vec<(u64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_lex = lexical_rank.get(&a.0).copied().unwrap_or(usize::MAX);
                let b_lex = lexical_rank.get(&b.0).copied().unwrap_or(usize::MAX);
                a_lex.cmp(&b_lex)
            })
            .then_with(|| {
                let a_dense = dense_rank.get(&a.0).copied().unwrap_or(usize::MAX);
                let b_dense = dense_rank.get(&b.0).copied().unwrap_or(usize::MAX);
                a_dense.cmp(&b_dense)
            })
    });
    fused.truncate(top_k);

    fused
        .into_iter()
        .map(|(id, score)| FusedHit {
            id,
            text: texts.get(&id).copied().unwrap_or_default().to_string(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[u64]) -> Vec<(u64, String)> {
        ids.iter().map(|id| (*id, format!("doc {}", id))).collect()
    }

    #[test]
    fn test_pure_lexical_weights_preserve_lexical_order() {
        let lexical = hits(&[3, 1, 2]);
        let dense = hits(&[2, 1, 3]);
        let weights = FusionWeights {
            lexical: 1.0,
            dense: 0.0,
        };
        let fused = weighted_rrf(&lexical, &dense, weights, 10);
        let order: Vec<u64> = fused.iter().map(|h| h.id).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn test_pure_dense_weights_preserve_dense_order() {
        let lexical = hits(&[3, 1, 2]);
        let dense = hits(&[2, 1, 3]);
        let weights = FusionWeights {
            lexical: 0.0,
            dense: 1.0,
        };
        let fused = weighted_rrf(&lexical, &dense, weights, 10);
        let order: Vec<u64> = fused.iter().map(|h| h.id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_each_id_appears_once() {
        let lexical = hits(&[1, 2, 3]);
        let dense = hits(&[3, 2, 1]);
        let weights = FusionWeights {
            lexical: 0.5,
            dense: 0.5,
        };
        let fused = weighted_rrf(&lexical, &dense, weights, 10);
        let mut ids: Vec<u64> = fused.iter().map(|h| h.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), fused.len());
    }

    #[test]
    fn test_identical_lists_equal_single_list_with_summed_weight() {
        let list = hits(&[5, 6, 7]);
        let weights = FusionWeights {
            lexical: 0.6,
            dense: 0.4,
        };
        let fused = weighted_rrf(&list, &list, weights, 10);
        let order: Vec<u64> = fused.iter().map(|h| h.id).collect();
        assert_eq!(order, vec![5, 6, 7]);
        for (rank, hit) in fused.iter().enumerate() {
            let expected = 1.0 / (rank + 1) as f64;
            assert!((hit.score - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_inputs_produce_empty_output() {
        let weights = FusionWeights {
            lexical: 0.5,
            dense: 0.5,
        };
        assert!(weighted_rrf(&[], &[], weights, 10).is_empty());
    }

    #[test]
    fn test_top_k_truncates() {
        let lexical = hits(&[1, 2, 3, 4, 5]);
        let weights = FusionWeights {
            lexical: 1.0,
            dense: 0.0,
        };
        assert_eq!(weighted_rrf(&lexical, &[], weights, 2).len(), 2);
    }

    #[test]
    fn test_tie_broken_by_lexical_position() {
        // 1 is first lexically, 2 is first densely; symmetric weights
        // give both the same score, so lexical position decides.
        let lexical = hits(&[1, 2]);
        let dense = hits(&[2, 1]);
        let weights = FusionWeights {
            lexical: 0.5,
            dense: 0.5,
        };
        let fused = weighted_rrf(&lexical, &dense, weights, 10);
        assert_eq!(fused[0].id, 1);
    }

    #[test]
    fn test_text_resolved_from_lexical_first() {
        let lexical = vec![(9u64, "lexical text".to_string())];
        let dense = vec![(9u64, "dense text".to_string())];
        let weights = FusionWeights {
            lexical: 0.5,
            dense: 0.5,
        };
        let fused = weighted_rrf(&lexical, &dense, weights, 10);
        assert_eq!(fused[0].text, "lexical text");
    }
}
