use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::nlp::EntityLabel;

/// Document record as indexed in both stores. A record is only valid
/// for indexing when `id`, `text`, and `vector` are all present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub places: Vec<String>,
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub vector: Vec<f32>,
}

/// Lexical and semantic features of a query, driving weight choice,
/// decomposition skipping, and the factual-query filter path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryFeatures {
    pub has_number: bool,
    pub has_year: bool,
    pub has_id: bool,
    pub is_acronym: bool,
    pub has_filter: bool,
    pub is_question: bool,
    /// Definition/abstraction query ("czym", "sens", ...). `abstract`
    /// is a reserved word, hence the suffix.
    pub is_abstract: bool,
    pub token_len: usize,
    pub has_named_entity: bool,
    pub has_specific_entity: bool,
    pub entities: Vec<(String, EntityLabel)>,
}

impl QueryFeatures {
    /// Factual queries get the cosine fallback in the filter.
    pub fn is_factual(&self) -> bool {
        self.is_acronym || self.has_id || self.has_number || self.has_year || self.has_filter
    }
}

/// Fusion weights for the two retrieval sides. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub lexical: f64,
    pub dense: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionKind {
    Factual,
    Filter,
    Simple,
    Complex,
    Error,
}

/// Output of the query decomposer. Sub-questions are additional
/// retrieval seeds, never alternative answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    pub main_question: String,
    pub sub_questions: Vec<String>,
    pub kind: DecompositionKind,
}

/// A declarative phrase appended to the user query to disambiguate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    pub label: String,
    pub clarification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    pub needs_clarification: bool,
    pub original_query: String,
    pub interpretations: Vec<Interpretation>,
}

/// Per-request retrieval statistics, filled in by the filter and the
/// orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub input_docs: usize,
    pub kept_docs: usize,
    pub rejected_short: usize,
    pub rejected_overlap: usize,
    pub overlaps: Vec<usize>,
    pub tokens_used: usize,
    pub citations: usize,
}

/// The single mutable result record a request owns end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub original_query: String,
    pub answer: String,
    pub chunks: Vec<String>,
    pub decomposition: Option<Decomposition>,
    pub clarification: Option<Clarification>,
    pub stats: RetrievalStats,
}

impl AnswerResult {
    pub fn new(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            answer: String::new(),
            chunks: Vec::new(),
            decomposition: None,
            clarification: None,
            stats: RetrievalStats::default(),
        }
    }
}

/// Entity/place/year hints extracted from a query, used to match
/// unresolved queries against newly indexed documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub entities: Vec<String>,
    pub places: Vec<String>,
    pub years: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Resolved,
}

/// A query the pipeline could not answer, persisted for replay when
/// matching documents arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub id: u64,
    pub query: String,
    pub entities_hint: Vec<String>,
    pub years_hint: Vec<i32>,
    pub places_hint: Vec<String>,
    pub retry_count: u32,
    pub status: QueryStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Metadata view of a document that appeared after the initial
/// snapshot was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: u64,
    pub entities: Vec<String>,
    pub places: Vec<String>,
    pub years: Vec<i32>,
    /// First 200 characters of the document text.
    pub text: String,
}

/// Ordered retry strategies the orchestrator may consume when an
/// answer fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ModifyPrompt,
    ChangeInterpretation,
    SaveToMemory,
}

impl RetryStrategy {
    pub fn defaults() -> Vec<RetryStrategy> {
        vec![
            RetryStrategy::ChangeInterpretation,
            RetryStrategy::ModifyPrompt,
            RetryStrategy::SaveToMemory,
        ]
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modify_prompt" => Ok(RetryStrategy::ModifyPrompt),
            "change_interpretation" => Ok(RetryStrategy::ChangeInterpretation),
            "save_to_memory" => Ok(RetryStrategy::SaveToMemory),
            other => Err(format!("unknown retry strategy: {}", other)),
        }
    }
}

/// Outcome of replaying one unresolved query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub query_id: u64,
    pub query: String,
    pub status: QueryStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_docs: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_count: Option<usize>,
}
