//! Retrieval adapters and fusion.
//!
//! Both index clients implement a narrow async trait so the
//! orchestrator (and tests) never depend on a concrete backend. On a
//! transport error the orchestrator degrades that side to an empty
//! list and continues with whichever side succeeded.

pub mod elastic;
pub mod fusion;
pub mod qdrant;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Document;

pub use elastic::ElasticIndex;
pub use fusion::{weighted_rrf, FusedHit};
pub use qdrant::QdrantIndex;

/// Lexical full-text store (BM25-like relevance ordering).
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Run a keyword query, returning up to `size` `(id, text)` pairs
    /// ordered by relevance.
    async fn search(&self, query: &str, size: usize) -> Result<Vec<(u64, String)>>;

    /// Scroll the whole index and collect every document id.
    async fn all_ids(&self) -> Result<HashSet<u64>>;

    /// Fetch one document by id, `None` when absent.
    async fn get_document(&self, id: u64) -> Result<Option<Document>>;
}

/// Vector store with cosine ANN search over 384-dim embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` `(id, text)` pairs ordered by descending
    /// cosine similarity to `vector`.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(u64, String)>>;
}
