//! NLP pipeline seam.
//!
//! The orchestrator needs three things from NLP: lemmatized tokens with
//! stopword flags, sentence boundaries, and named entities with the
//! Polish NER label set. `SpacyPipeline` fetches all of it from a spaCy
//! HTTP sidecar in one round trip; tests plug in their own impls.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// NER labels produced by the Polish model. Anything else maps to
/// `Other` and is ignored by the feature analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityLabel {
    #[serde(rename = "persName")]
    PersName,
    #[serde(rename = "orgName")]
    OrgName,
    #[serde(rename = "placeName")]
    PlaceName,
    #[serde(rename = "geogName")]
    GeogName,
    #[serde(rename = "date")]
    Date,
    #[serde(other)]
    Other,
}

impl EntityLabel {
    pub fn is_person_or_org(self) -> bool {
        matches!(self, EntityLabel::PersName | EntityLabel::OrgName)
    }

    pub fn is_place(self) -> bool {
        matches!(self, EntityLabel::PlaceName | EntityLabel::GeogName)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpToken {
    pub text: String,
    pub lemma: String,
    #[serde(default)]
    pub is_stop: bool,
    #[serde(default)]
    pub is_alpha: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpEntity {
    pub text: String,
    pub label: EntityLabel,
}

/// Full annotation of one text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub tokens: Vec<NlpToken>,
    #[serde(default)]
    pub sentences: Vec<String>,
    #[serde(default)]
    pub entities: Vec<NlpEntity>,
}

impl Annotation {
    /// Lemmatized, deduplicated keywords: non-stopword alphabetic
    /// tokens whose lemma is longer than 2 characters, in first-seen
    /// order.
    pub fn keywords(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut keywords = Vec::new();
        for token in &self.tokens {
            if token.is_stop || !token.is_alpha {
                continue;
            }
            if token.lemma.chars().count() <= 2 {
                continue;
            }
            if seen.insert(token.lemma.clone()) {
                keywords.push(token.lemma.clone());
            }
        }
        keywords
    }
}

#[async_trait]
pub trait NlpPipeline: Send + Sync {
    async fn annotate(&self, text: &str) -> Result<Annotation>;
}

/// HTTP client for a spaCy sidecar exposing `POST /annotate`.
pub struct SpacyPipeline {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl SpacyPipeline {
    pub fn new(url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build NLP http client")?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl NlpPipeline for SpacyPipeline {
    async fn annotate(&self, text: &str) -> Result<Annotation> {
        let endpoint = format!("{}/annotate", self.url);
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({ "model": self.model, "text": text }))
            .send()
            .await
            .with_context(|| format!("NLP request to {} failed", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("NLP service error ({}): {}", status, body));
        }

        response
            .json::<Annotation>()
            .await
            .context("Failed to parse NLP annotation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_label_parses_polish_ner_set() {
        let label: EntityLabel = serde_json::from_str("\"persName\"").unwrap();
        assert_eq!(label, EntityLabel::PersName);
        let label: EntityLabel = serde_json::from_str("\"geogName\"").unwrap();
        assert!(label.is_place());
        let label: EntityLabel = serde_json::from_str("\"misc\"").unwrap();
        assert_eq!(label, EntityLabel::Other);
    }

    #[test]
    fn test_keywords_drop_stopwords_and_short_lemmas() {
        let annotation = Annotation {
            tokens: vec![
                NlpToken {
                    text: "w".into(),
                    lemma: "w".into(),
                    is_stop: true,
                    is_alpha: true,
                },
                NlpToken {
                    text: "Polsce".into(),
                    lemma: "polska".into(),
                    is_stop: false,
                    is_alpha: true,
                },
                NlpToken {
                    text: "2023".into(),
                    lemma: "2023".into(),
                    is_stop: false,
                    is_alpha: false,
                },
                NlpToken {
                    text: "polska".into(),
                    lemma: "polska".into(),
                    is_stop: false,
                    is_alpha: true,
                },
            ],
            sentences: vec![],
            entities: vec![],
        };
        assert_eq!(annotation.keywords(), vec!["polska".to_string()]);
    }
}
