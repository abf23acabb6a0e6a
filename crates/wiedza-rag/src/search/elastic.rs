//! Elasticsearch adapter speaking the REST API over reqwest.
//!
//! Covers the four things the system needs from the lexical side:
//! `query_string` search, full-index id scrolls (page 1000, 2-minute
//! cursor), single-document fetch, and index bootstrap + bulk writes
//! for ingestion.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::LexicalIndex;
use crate::types::Document;

const SCROLL_KEEPALIVE: &str = "2m";
const SCROLL_PAGE_SIZE: usize = 1000;

pub struct ElasticIndex {
    client: reqwest::Client,
    url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct EsSearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: EsHits,
}

#[derive(Debug, Deserialize)]
struct EsHits {
    hits: Vec<EsHit>,
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EsGetResponse {
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct EsCountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct EsBulkResponse {
    errors: bool,
}

impl ElasticIndex {
    pub fn new(url: &str, index: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build Elasticsearch http client")?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    /// Create the index with the corpus mapping when it does not
    /// exist yet.
    pub async fn ensure_index(&self) -> Result<()> {
        let head = self
            .client
            .head(format!("{}/{}", self.url, self.index))
            .send()
            .await
            .context("Index existence check failed")?;
        if head.status().is_success() {
            tracing::debug!(index = %self.index, "Index already exists");
            return Ok(());
        }

        let body = json!({
            "settings": {
                "analysis": {
                    "analyzer": {
                        "pl_lemma": {
                            "tokenizer": "standard",
                            "filter": ["lowercase"]
                        }
                    }
                }
            },
            "mappings": {
                "properties": {
                    "id": { "type": "keyword" },
                    "domain": { "type": "keyword" },
                    "date": { "type": "date" },
                    "text": { "type": "text", "analyzer": "pl_lemma" },
                    "vector": {
                        "type": "dense_vector",
                        "dims": 384,
                        "index": true,
                        "similarity": "cosine"
                    },
                    "entities": { "type": "keyword" },
                    "places": { "type": "keyword" },
                    "years": { "type": "integer" }
                }
            }
        });

        let response = self
            .client
            .put(format!("{}/{}", self.url, self.index))
            .json(&body)
            .send()
            .await
            .context("Index creation request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Index creation failed ({}): {}", status, text));
        }
        tracing::info!(index = %self.index, "Created index");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let response: EsCountResponse = self
            .client
            .get(format!("{}/{}/_count", self.url, self.index))
            .send()
            .await
            .context("Count request failed")?
            .json()
            .await
            .context("Failed to parse count response")?;
        Ok(response.count)
    }

    /// Bulk-index a batch of documents, one action/source line pair
    /// per document.
    pub async fn bulk_index(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for doc in documents {
            body.push_str(&json!({ "index": { "_index": self.index, "_id": doc.id } }).to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.url))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Bulk request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bulk indexing failed ({}): {}", status, text));
        }
        let parsed: EsBulkResponse = response
            .json()
            .await
            .context("Failed to parse bulk response")?;
        if parsed.errors {
            return Err(anyhow!("Bulk indexing reported per-document errors"));
        }
        Ok(())
    }

    fn collect_page(page: &EsSearchResponse, ids: &mut HashSet<u64>) {
        for hit in &page.hits.hits {
            match hit.id.parse::<u64>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => tracing::warn!(id = %hit.id, "Skipping non-numeric document id"),
            }
        }
    }
}

#[async_trait]
impl LexicalIndex for ElasticIndex {
    async fn search(&self, query: &str, size: usize) -> Result<Vec<(u64, String)>> {
        let body = json!({
            "query": { "query_string": { "query": query } },
            "size": size,
        });
        let response = self
            .client
            .post(format!("{}/{}/_search", self.url, self.index))
            .json(&body)
            .send()
            .await
            .context("Lexical search request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Lexical search failed ({}): {}", status, text));
        }
        let parsed: EsSearchResponse = response
            .json()
            .await
            .context("Failed to parse lexical search response")?;

        let mut results = Vec::with_capacity(parsed.hits.hits.len());
        for hit in parsed.hits.hits {
            let Ok(id) = hit.id.parse::<u64>() else {
                tracing::warn!(id = %hit.id, "Skipping non-numeric document id");
                continue;
            };
            let text = hit
                .source
                .as_ref()
                .and_then(|s| s.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            results.push((id, text));
        }
        Ok(results)
    }

    async fn all_ids(&self) -> Result<HashSet<u64>> {
        let mut ids = HashSet::new();
        let body = json!({
            "query": { "match_all": {} },
            "_source": false,
            "size": SCROLL_PAGE_SIZE,
        });
        let mut page: EsSearchResponse = self
            .client
            .post(format!(
                "{}/{}/_search?scroll={}",
                self.url, self.index, SCROLL_KEEPALIVE
            ))
            .json(&body)
            .send()
            .await
            .context("Scroll start failed")?
            .json()
            .await
            .context("Failed to parse scroll response")?;

        Self::collect_page(&page, &mut ids);
        let mut scroll_id = page.scroll_id.clone();

        while !page.hits.hits.is_empty() {
            let Some(current) = scroll_id.clone() else {
                break;
            };
            page = self
                .client
                .post(format!("{}/_search/scroll", self.url))
                .json(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": current }))
                .send()
                .await
                .context("Scroll continuation failed")?
                .json()
                .await
                .context("Failed to parse scroll response")?;
            Self::collect_page(&page, &mut ids);
            scroll_id = page.scroll_id.clone().or(scroll_id);
        }

        if let Some(id) = scroll_id {
            let _ = self
                .client
                .delete(format!("{}/_search/scroll", self.url))
                .json(&json!({ "scroll_id": [id] }))
                .send()
                .await;
        }
        Ok(ids)
    }

    async fn get_document(&self, id: u64) -> Result<Option<Document>> {
        let response = self
            .client
            .get(format!("{}/{}/_doc/{}", self.url, self.index, id))
            .send()
            .await
            .context("Document fetch failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Document fetch failed ({}): {}", status, text));
        }
        let parsed: EsGetResponse = response
            .json()
            .await
            .context("Failed to parse document response")?;
        if !parsed.found {
            return Ok(None);
        }
        Ok(parsed.source)
    }
}
