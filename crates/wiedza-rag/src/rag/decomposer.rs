//! Compound-query decomposition via the chat model.
//!
//! Acronym, identifier, and filter queries are never decomposed. For
//! the rest, the model is asked for a JSON split into a main question
//! and 0-3 sub-questions; any parse failure falls back to the
//! undecomposed query. Sub-questions only ever seed extra retrieval,
//! they are not answered separately.

use serde::Deserialize;

use crate::llm::{strip_code_fences, ChatMessage, ChatModel, ChatOptions};
use crate::types::{Decomposition, DecompositionKind, QueryFeatures};

#[derive(Debug, Deserialize)]
struct DecompositionPayload {
    main_question: Option<String>,
    #[serde(default)]
    sub_questions: Vec<String>,
}

fn undecomposed(query: &str, kind: DecompositionKind) -> Decomposition {
    Decomposition {
        main_question: query.to_string(),
        sub_questions: Vec::new(),
        kind,
    }
}

fn decomposition_prompt(query: &str) -> String {
    format!(
        r#"Jesteś ekspertem od analizy zapytań. Twoim zadaniem jest rozłożyć pytanie na komponenty.

Pytanie: {}

Zasady:
1. Jeśli pytanie jest proste i konkretne (np. "Co zawiera dokument X?", "Czy inflacja rośnie?"), zwróć je jako main_question bez sub_questions.
2. Jeśli pytanie jest złożone (np. "Jak poprawić pracę zespołową?"), rozbij je na 2-3 podzapytania.
3. Format odpowiedzi (JSON):
{{
  "main_question": "...",
  "sub_questions": ["...", "..."]
}}

NIE dodawaj komentarzy. Zwróć TYLKO JSON."#,
        query
    )
}

/// Decompose a query into retrieval seeds. Never fails: transport or
/// parse errors degrade to the undecomposed query.
pub async fn decompose_query(
    query: &str,
    features: &QueryFeatures,
    chat: &dyn ChatModel,
) -> Decomposition {
    if features.is_acronym || features.has_id {
        return undecomposed(query, DecompositionKind::Factual);
    }
    if features.has_filter {
        return undecomposed(query, DecompositionKind::Filter);
    }

    let messages = [ChatMessage::user(decomposition_prompt(query))];
    let options = ChatOptions::with_temperature(0.2);

    let content = match chat.chat(&messages, &options).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(error = %e, "Decomposition call failed");
            return undecomposed(query, DecompositionKind::Error);
        }
    };

    match serde_json::from_str::<DecompositionPayload>(&strip_code_fences(&content)) {
        Ok(payload) => {
            let kind = if payload.sub_questions.is_empty() {
                DecompositionKind::Simple
            } else {
                DecompositionKind::Complex
            };
            Decomposition {
                main_question: payload.main_question.unwrap_or_else(|| query.to_string()),
                sub_questions: payload.sub_questions,
                kind,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Decomposition output was not valid JSON");
            undecomposed(query, DecompositionKind::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::analyzer::analyze_query;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct ScriptedChat(Option<String>);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| anyhow!("model unavailable"))
        }
    }

    #[tokio::test]
    async fn test_acronym_query_skips_decomposition() {
        let features = analyze_query("PAN", &Default::default());
        let chat = ScriptedChat(Some("should never be called".into()));
        let result = decompose_query("PAN", &features, &chat).await;
        assert_eq!(result.kind, DecompositionKind::Factual);
        assert!(result.sub_questions.is_empty());
    }

    #[tokio::test]
    async fn test_filter_query_skips_decomposition() {
        let features = analyze_query("dokumenty autor Kowalski", &Default::default());
        let chat = ScriptedChat(None);
        let result = decompose_query("dokumenty autor Kowalski", &features, &chat).await;
        assert_eq!(result.kind, DecompositionKind::Filter);
    }

    #[tokio::test]
    async fn test_fenced_json_is_parsed() {
        let features = analyze_query("jak poprawić pracę zespołową", &Default::default());
        let chat = ScriptedChat(Some(
            "```json\n{\"main_question\": \"jak poprawić pracę zespołową\", \"sub_questions\": [\"komunikacja w zespole\", \"narzędzia do współpracy\"]}\n```"
                .into(),
        ));
        let result = decompose_query("jak poprawić pracę zespołową", &features, &chat).await;
        assert_eq!(result.kind, DecompositionKind::Complex);
        assert_eq!(result.sub_questions.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_back() {
        let features = analyze_query("jak poprawić pracę zespołową", &Default::default());
        let chat = ScriptedChat(Some("to nie jest json".into()));
        let result = decompose_query("jak poprawić pracę zespołową", &features, &chat).await;
        assert_eq!(result.kind, DecompositionKind::Error);
        assert_eq!(result.main_question, "jak poprawić pracę zespołową");
        assert!(result.sub_questions.is_empty());
    }

    #[tokio::test]
    async fn test_missing_main_question_defaults_to_query() {
        let features = analyze_query("czy inflacja rośnie", &Default::default());
        let chat = ScriptedChat(Some("{\"sub_questions\": []}".into()));
        let result = decompose_query("czy inflacja rośnie", &features, &chat).await;
        assert_eq!(result.main_question, "czy inflacja rośnie");
        assert_eq!(result.kind, DecompositionKind::Simple);
    }

    #[tokio::test]
    async fn test_transport_error_falls_back() {
        let features = analyze_query("czy inflacja rośnie", &Default::default());
        let chat = ScriptedChat(None);
        let result = decompose_query("czy inflacja rośnie", &features, &chat).await;
        assert_eq!(result.kind, DecompositionKind::Error);
    }
}
