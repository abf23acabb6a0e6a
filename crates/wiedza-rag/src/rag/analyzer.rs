//! Query feature analysis and fusion weight choice.
//!
//! Features come from fixed regexes plus the NER annotation; weights
//! come from a deterministic decision tree where the first matching
//! rule wins. Same query + same NLP state always produces the same
//! features.

use std::sync::LazyLock;

use regex::Regex;

use crate::nlp::Annotation;
use crate::types::{FusionWeights, QueryFeatures};

/// Whole query is an uppercase Polish acronym.
pub static ACRONYM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-ZĄĆĘŁŃÓŚŻŹ]{2,}$").expect("acronym regex is valid"));

/// Document-style identifier anywhere in the query.
pub static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]{1,5}[-_]?\d+").expect("id regex is valid"));

/// Four-digit year in the 1900-2099 range.
pub static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year regex is valid"));

pub static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("token regex is valid"));

const FILTER_WORDS: [&str; 6] = ["autor", "dokumenty", "po", "przed", "od", "dotyczące"];
const ABSTRACT_PHRASES: [&str; 6] = ["czym", "co to", "jak", "dlaczego", "sens", "znaczenie"];

/// Extract lexical and semantic features from a query.
pub fn analyze_query(query: &str, annotation: &Annotation) -> QueryFeatures {
    let text = query.trim();
    let text_lower = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_RE.find_iter(&text_lower).map(|m| m.as_str()).collect();

    let entities: Vec<_> = annotation
        .entities
        .iter()
        .map(|e| (e.text.clone(), e.label))
        .collect();
    let has_specific_entity = entities
        .iter()
        .any(|(_, label)| label.is_person_or_org() || label.is_place());
    let has_date_entity = entities
        .iter()
        .any(|(_, label)| *label == crate::nlp::EntityLabel::Date);

    QueryFeatures {
        has_number: tokens
            .iter()
            .any(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())),
        has_year: YEAR_RE.is_match(text) || has_date_entity,
        has_id: ID_RE.is_match(text),
        is_acronym: ACRONYM_RE.is_match(text),
        has_filter: tokens.iter().any(|t| FILTER_WORDS.contains(t)),
        is_question: text.ends_with('?'),
        is_abstract: ABSTRACT_PHRASES.iter().any(|p| text_lower.contains(p)),
        token_len: tokens.len(),
        has_named_entity: !entities.is_empty(),
        has_specific_entity,
        entities,
    }
}

/// Map features to `(lexical, dense)` fusion weights. First matching
/// rule wins; the weights always sum to 1.
pub fn choose_weights(f: &QueryFeatures) -> FusionWeights {
    // Hard identifiers: the lexical side dominates.
    if f.is_acronym || f.has_id {
        return FusionWeights {
            lexical: 0.8,
            dense: 0.2,
        };
    }
    // Named entities: still lexical-leaning, softer for short queries.
    if f.has_specific_entity {
        let lexical = if f.token_len > 4 { 0.7 } else { 0.6 };
        return FusionWeights {
            lexical,
            dense: 1.0 - lexical,
        };
    }
    // Dates and numbers.
    if f.has_year || f.has_number {
        return FusionWeights {
            lexical: 0.65,
            dense: 0.35,
        };
    }
    // Definition and abstraction queries: dense dominates.
    if f.is_abstract {
        return FusionWeights {
            lexical: 0.3,
            dense: 0.7,
        };
    }
    // Short semantic queries without entities.
    if f.token_len <= 3 && !f.has_named_entity {
        return FusionWeights {
            lexical: 0.3,
            dense: 0.7,
        };
    }
    // Natural-language default.
    FusionWeights {
        lexical: 0.45,
        dense: 0.55,
    }
}

/// Build the two retrieval queries for one input: the prefixed
/// semantic form for the embedder and the OR-joined keyword form for
/// the lexical index. `keyword_annotation` must be the annotation of
/// the lowercased query.
pub fn build_search_queries(query: &str, keyword_annotation: &Annotation) -> (String, String) {
    let semantic_query = format!("query: {}", query);
    let keyword_query = keyword_annotation.keywords().join(" OR ");
    (semantic_query, keyword_query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::{EntityLabel, NlpEntity};

    fn annotation_with_entities(entities: Vec<(&str, EntityLabel)>) -> Annotation {
        Annotation {
            tokens: vec![],
            sentences: vec![],
            entities: entities
                .into_iter()
                .map(|(text, label)| NlpEntity {
                    text: text.to_string(),
                    label,
                })
                .collect(),
        }
    }

    #[test]
    fn test_acronym_query_gets_lexical_dominant_weights() {
        let features = analyze_query("PAN", &Annotation::default());
        assert!(features.is_acronym);
        let weights = choose_weights(&features);
        assert_eq!(weights.lexical, 0.8);
        assert_eq!(weights.dense, 0.2);
    }

    #[test]
    fn test_year_query_weights() {
        let features = analyze_query("inflacja w 2023 roku", &Annotation::default());
        assert!(features.has_year);
        assert!(features.has_number);
        let weights = choose_weights(&features);
        assert_eq!(weights.lexical, 0.65);
        assert_eq!(weights.dense, 0.35);
    }

    #[test]
    fn test_abstract_query_weights() {
        let features = analyze_query("jaki jest sens odpowiedzialności", &Annotation::default());
        assert!(features.is_abstract);
        let weights = choose_weights(&features);
        assert_eq!(weights.lexical, 0.3);
        assert_eq!(weights.dense, 0.7);
    }

    #[test]
    fn test_document_id_detected() {
        let features = analyze_query("co zawiera dokument AB-123", &Annotation::default());
        assert!(features.has_id);
    }

    #[test]
    fn test_date_entity_sets_has_year() {
        let annotation = annotation_with_entities(vec![("maj ubiegłego roku", EntityLabel::Date)]);
        let features = analyze_query("co wydarzyło się w maju", &annotation);
        assert!(features.has_year);
    }

    #[test]
    fn test_specific_entity_weights_depend_on_length() {
        let annotation = annotation_with_entities(vec![("Adam Mickiewicz", EntityLabel::PersName)]);
        let short = analyze_query("kim był Mickiewicz", &annotation);
        assert_eq!(choose_weights(&short).lexical, 0.6);

        let long = analyze_query("co napisał Adam Mickiewicz w czasie emigracji", &annotation);
        assert_eq!(choose_weights(&long).lexical, 0.7);
    }

    #[test]
    fn test_filter_word_detected() {
        let features = analyze_query("dokumenty po 2010", &Annotation::default());
        assert!(features.has_filter);
    }

    #[test]
    fn test_weights_always_sum_to_one() {
        let cases = [
            "PAN",
            "AB-123",
            "inflacja w 2023 roku",
            "czym jest inflacja",
            "kot",
            "jak wyglądała gospodarka po transformacji ustrojowej",
        ];
        for query in cases {
            let features = analyze_query(query, &Annotation::default());
            let weights = choose_weights(&features);
            assert!(
                (weights.lexical + weights.dense - 1.0).abs() < 1e-9,
                "weights for {:?} do not sum to 1",
                query
            );
        }
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let annotation = annotation_with_entities(vec![("Warszawa", EntityLabel::PlaceName)]);
        let a = analyze_query("co działo się w Warszawie?", &annotation);
        let b = analyze_query("co działo się w Warszawie?", &annotation);
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    #[test]
    fn test_question_mark_detected() {
        let features = analyze_query("czy inflacja rośnie?", &Annotation::default());
        assert!(features.is_question);
    }
}
