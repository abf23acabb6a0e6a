//! The end-to-end pipeline: analyze, clarify, decompose, retrieve,
//! ask, validate, and retry under the caller's strategies.
//!
//! One engine serves many concurrent requests; every handle it holds
//! is an immutable `Arc` safe for concurrent calls, and all per-request
//! state lives in the `AnswerResult` the request owns. External
//! failures never abort a request on their own: a dead retrieval side
//! contributes nothing, a dead model produces an empty answer, and the
//! retry loop is the only place a request is declared unresolved.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;

use crate::config::PipelineParams;
use crate::embeddings::Embedder;
use crate::llm::{ChatModel, ChatOptions};
use crate::memory::change_detector::{match_query_with_new_docs, DocumentChangeDetector};
use crate::memory::UnresolvedMemory;
use crate::nlp::{Annotation, NlpPipeline};
use crate::processing::{chunker::chunk_document, tokenize};
use crate::rag::citation_validator::count_citations;
use crate::rag::{
    analyze_query, build_prompt, build_search_queries, choose_weights, decompose_query,
    filter_retrieved, metadata::extract_metadata_from_query, CitationValidator, Clarifier,
    ClarifierLexicon, FilterParams,
};
use crate::search::{weighted_rrf, FusedHit, LexicalIndex, VectorIndex};
use crate::types::{
    AnswerResult, FusionWeights, QueryStatus, RetryOutcome, RetryStrategy, UnresolvedEntry,
};

/// External-service handles injected at construction. Each component
/// receives only what it needs.
pub struct ServiceHandles {
    pub nlp: Arc<dyn NlpPipeline>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub vector: Arc<dyn VectorIndex>,
}

pub struct RagEngine {
    nlp: Arc<dyn NlpPipeline>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    memory: Arc<UnresolvedMemory>,
    clarifier: Clarifier,
    validator: CitationValidator,
    prompt_cores: Vec<String>,
    params: PipelineParams,
    enable_decomposition: bool,
}

impl RagEngine {
    pub fn new(
        handles: ServiceHandles,
        memory: Arc<UnresolvedMemory>,
        prompt_cores: Vec<String>,
        params: PipelineParams,
        enable_decomposition: bool,
    ) -> Self {
        Self {
            nlp: handles.nlp,
            embedder: handles.embedder,
            chat: handles.chat,
            lexical: handles.lexical,
            vector: handles.vector,
            memory,
            clarifier: Clarifier::new(ClarifierLexicon::default()),
            validator: CitationValidator::new(params.fuzzy_threshold),
            prompt_cores,
            params,
            enable_decomposition,
        }
    }

    pub fn with_clarifier_lexicon(mut self, lexicon: ClarifierLexicon) -> Self {
        self.clarifier = Clarifier::new(lexicon);
        self
    }

    /// Run the full retry-driven pipeline for one user query.
    pub async fn answer(&self, query: &str, strategies: &[RetryStrategy]) -> Result<AnswerResult> {
        let mut result = AnswerResult::new(query);

        let clarification = self.clarifier.clarify(query, self.chat.as_ref()).await;
        let interpretations: Vec<String> = clarification
            .interpretations
            .iter()
            .map(|i| i.clarification.clone())
            .collect();
        let needs_clarification = clarification.needs_clarification;
        result.clarification = Some(clarification);

        let mut interpretation_idx = 0usize;
        let mut current_query = if needs_clarification {
            tracing::info!(
                interpretations = interpretations.len(),
                "Query is ambiguous, starting with the first interpretation"
            );
            format!("{} {}", query, interpretations[interpretation_idx])
        } else {
            query.to_string()
        };

        let mut prompt_idx = 0usize;
        tracing::info!(query = %current_query, "Running pipeline");
        self.run_pipeline(&current_query, &mut result, prompt_idx).await;
        let mut valid = self.evaluate(&result);

        // Strategies are consumed from a local list; the caller's
        // slice is never modified. Each pass applies the first
        // strategy still in the list, dropping it once exhausted.
        let mut remaining: Vec<RetryStrategy> = strategies.to_vec();
        while !valid {
            let Some(strategy) = remaining.first().copied() else {
                tracing::warn!("Retry strategies exhausted, saving query to memory");
                self.persist_unresolved(query).await;
                return Ok(result);
            };
            match strategy {
                RetryStrategy::ModifyPrompt => {
                    prompt_idx += 1;
                    if prompt_idx >= self.prompt_cores.len() {
                        tracing::warn!("No prompt cores left to try");
                        remaining.retain(|s| *s != RetryStrategy::ModifyPrompt);
                        continue;
                    }
                    tracing::info!(prompt = prompt_idx + 1, "Answer invalid, trying next prompt core");
                    let answer = self.ask(&result.chunks, prompt_idx, &current_query).await;
                    result.stats.citations = count_citations(&answer);
                    valid = self.evaluate_answer(&answer, &result);
                    if valid {
                        result.answer = answer;
                    }
                }
                RetryStrategy::ChangeInterpretation => {
                    if interpretation_idx + 1 >= interpretations.len() {
                        tracing::warn!("No interpretations left to try");
                        remaining.retain(|s| *s != RetryStrategy::ChangeInterpretation);
                        continue;
                    }
                    interpretation_idx += 1;
                    current_query = format!("{} {}", query, interpretations[interpretation_idx]);
                    tracing::info!(
                        interpretation = interpretation_idx + 1,
                        query = %current_query,
                        "Answer invalid, retrying under the next interpretation"
                    );
                    self.run_pipeline(&current_query, &mut result, prompt_idx).await;
                    valid = self.evaluate(&result);
                }
                RetryStrategy::SaveToMemory => {
                    tracing::info!("Answer invalid, saving query to memory");
                    self.persist_unresolved(query).await;
                    return Ok(result);
                }
            }
        }
        Ok(result)
    }

    /// One pass of RETRIEVE + ASK for a (possibly clarified) query,
    /// mutating the request's result record in place.
    async fn run_pipeline(&self, query: &str, result: &mut AnswerResult, prompt_idx: usize) {
        let annotation = self.annotate_or_empty(query).await;
        let features = analyze_query(query, &annotation);
        let weights = choose_weights(&features);

        if self.enable_decomposition {
            let decomposition = decompose_query(query, &features, self.chat.as_ref()).await;
            if !decomposition.sub_questions.is_empty() {
                tracing::info!(
                    main = %decomposition.main_question,
                    subs = decomposition.sub_questions.len(),
                    "Query decomposed"
                );
            }
            result.decomposition = Some(decomposition);
        }

        let mut queries: Vec<String> = vec![query.to_string()];
        if let Some(decomposition) = &result.decomposition {
            queries.extend(decomposition.sub_questions.iter().cloned());
        }

        // Sub-queries retrieve in parallel; fusion and chunk scoring
        // consume them in deterministic order (original first, then
        // decomposition order), and the per-chunk max is commutative.
        let retrievals = join_all(
            queries
                .iter()
                .map(|q| self.retrieve_for(q.as_str(), weights)),
        )
        .await;

        let query_vec = retrievals
            .first()
            .and_then(|(vec, _)| vec.clone())
            .unwrap_or_default();

        let mut best_score: HashMap<String, f64> = HashMap::new();
        let mut chunk_order: Vec<String> = Vec::new();
        for (_, fused) in &retrievals {
            for hit in fused {
                for chunk in self.chunk_hit(hit).await {
                    match best_score.entry(chunk.clone()) {
                        Entry::Occupied(mut occupied) => {
                            let score = occupied.get_mut();
                            *score = score.max(hit.score);
                        }
                        Entry::Vacant(vacant) => {
                            vacant.insert(hit.score);
                            chunk_order.push(chunk);
                        }
                    }
                }
            }
        }

        let mut scored: Vec<(String, f64)> = chunk_order
            .into_iter()
            .map(|chunk| {
                let score = best_score[&chunk];
                (chunk, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let chunks: Vec<String> = scored.into_iter().map(|(chunk, _)| chunk).collect();

        let filter_params = FilterParams {
            min_tokens: self.params.min_chunk_tokens,
            max_docs: self.params.max_docs,
            cosine_threshold: self.params.cosine_threshold,
        };
        let (filtered, filter_stats) = filter_retrieved(
            &chunks,
            query,
            &query_vec,
            &features,
            self.embedder.as_ref(),
            &filter_params,
        )
        .await;

        let mut used_chunks = Vec::new();
        let mut used_tokens = 0usize;
        for chunk in filtered {
            let tokens = tokenize(&chunk).len();
            if used_tokens + tokens <= self.params.max_context_tokens {
                used_tokens += tokens;
                used_chunks.push(chunk);
            } else {
                break;
            }
        }
        tracing::info!(
            tokens = used_tokens,
            chunks = used_chunks.len(),
            "Context assembled"
        );

        result.chunks = used_chunks;
        result.stats.tokens_used = used_tokens;
        result.stats.input_docs = filter_stats.input_docs;
        result.stats.kept_docs = filter_stats.kept_docs;
        result.stats.rejected_short = filter_stats.rejected_short;
        result.stats.rejected_overlap = filter_stats.rejected_overlap;
        result.stats.overlaps = filter_stats.overlaps;

        result.answer = self.ask(&result.chunks, prompt_idx, query).await;
        result.stats.citations = count_citations(&result.answer);
        tracing::debug!(answer = %result.answer, "Model answered");
    }

    /// Retrieve and fuse both sides for one sub-query. A failed side
    /// degrades to an empty list; a failed embedding empties the dense
    /// side.
    async fn retrieve_for(
        &self,
        query: &str,
        weights: FusionWeights,
    ) -> (Option<Vec<f32>>, Vec<FusedHit>) {
        let keyword_annotation = self.annotate_or_empty(&query.to_lowercase()).await;
        let (semantic_query, keyword_query) = build_search_queries(query, &keyword_annotation);

        let query_vec = match self.embedder.embed(&semantic_query).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, dense side disabled");
                None
            }
        };

        let lexical_future = async {
            if keyword_query.is_empty() {
                return Vec::new();
            }
            match self
                .lexical
                .search(&keyword_query, self.params.search_size)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(error = %e, "Lexical search failed, continuing without it");
                    Vec::new()
                }
            }
        };
        let dense_future = async {
            match &query_vec {
                Some(vec) => match self.vector.search(vec, self.params.search_size).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(error = %e, "Vector search failed, continuing without it");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        };
        let (lexical_hits, dense_hits) = tokio::join!(lexical_future, dense_future);

        let fused = weighted_rrf(
            &lexical_hits,
            &dense_hits,
            weights,
            self.params.fusion_top_k,
        );
        (query_vec, fused)
    }

    /// Split one fused document into scored chunks.
    async fn chunk_hit(&self, hit: &FusedHit) -> Vec<String> {
        let sentences = match self.nlp.annotate(&hit.text).await {
            Ok(annotation) if !annotation.sentences.is_empty() => annotation.sentences,
            Ok(_) => vec![hit.text.clone()],
            Err(e) => {
                tracing::warn!(error = %e, "Sentence split failed, chunking whole text");
                vec![hit.text.clone()]
            }
        };
        chunk_document(
            &hit.text,
            &sentences,
            self.params.max_chunk_tokens,
            self.params.chunk_overlap,
        )
    }

    /// One answering call. Transport failures and timeouts yield an
    /// empty answer, which never validates and so falls into the
    /// retry policy.
    async fn ask(&self, chunks: &[String], prompt_idx: usize, query: &str) -> String {
        let Some(core) = self.prompt_cores.get(prompt_idx) else {
            tracing::warn!(prompt_idx, "No such prompt core");
            return String::new();
        };
        let message = build_prompt(chunks, core, query);
        match self
            .chat
            .chat(&[message], &ChatOptions::with_temperature(0.6))
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "Answering call failed");
                String::new()
            }
        }
    }

    fn evaluate(&self, result: &AnswerResult) -> bool {
        self.evaluate_answer(&result.answer, result)
    }

    /// An answer passes when the model actually answered and every
    /// citation is grounded.
    fn evaluate_answer(&self, answer: &str, result: &AnswerResult) -> bool {
        if self
            .memory
            .should_save_as_unresolved(answer, &result.chunks, &result.stats)
        {
            tracing::warn!("Model could not answer from the provided fragments");
            return false;
        }
        if !self.validator.validate_answer(answer, &result.chunks) {
            tracing::warn!("Model returned ungrounded citations");
            return false;
        }
        true
    }

    /// Persist an unanswerable query with its metadata hints.
    async fn persist_unresolved(&self, query: &str) {
        let metadata =
            match extract_metadata_from_query(query, self.nlp.as_ref(), self.chat.as_ref()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(error = %e, "Metadata extraction failed, saving bare query");
                    Default::default()
                }
            };
        match self.memory.add(query, &metadata) {
            Ok(id) => tracing::info!(id, "Query saved to unresolved memory"),
            Err(e) => tracing::error!(error = %e, "Failed to persist unresolved query"),
        }
    }

    async fn annotate_or_empty(&self, text: &str) -> Annotation {
        match self.nlp.annotate(text).await {
            Ok(annotation) => annotation,
            Err(e) => {
                tracing::warn!(error = %e, "NLP annotation failed");
                Annotation::default()
            }
        }
    }

    /// Replay one stored entry: bump its retry counter, run the
    /// pipeline once, and resolve it when the answer validates.
    pub async fn retry_entry(&self, entry: &UnresolvedEntry) -> Result<RetryOutcome> {
        self.memory.increment_retry(entry.id)?;

        let mut result = AnswerResult::new(&entry.query);
        self.run_pipeline(&entry.query, &mut result, 0).await;

        let status = if self.evaluate(&result) {
            self.memory.mark_resolved(entry.id)?;
            QueryStatus::Resolved
        } else {
            QueryStatus::Pending
        };

        Ok(RetryOutcome {
            query_id: entry.id,
            query: entry.query.clone(),
            status,
            retry_count: entry.retry_count + 1,
            matched_docs: Vec::new(),
            answer: Some(result.answer),
            chunks_count: Some(result.chunks.len()),
        })
    }

    /// Replay every pending query matched by documents that arrived
    /// since the snapshot, returning the accumulated outcomes.
    pub async fn retry_all_pending(
        &self,
        detector: &DocumentChangeDetector,
    ) -> Result<Vec<RetryOutcome>> {
        let new_docs = detector.get_new_documents().await?;
        if new_docs.is_empty() {
            tracing::info!("No new documents to retry against");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        for entry in self.memory.pending() {
            let (has_match, matched_docs) = match_query_with_new_docs(&entry, &new_docs);
            if !has_match {
                continue;
            }
            match self.retry_entry(&entry).await {
                Ok(mut outcome) => {
                    outcome.matched_docs = matched_docs;
                    outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::error!(id = entry.id, error = %e, "Retry failed");
                    continue;
                }
            }
        }
        Ok(outcomes)
    }
}
