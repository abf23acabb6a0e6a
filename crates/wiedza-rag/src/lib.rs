pub mod config;
pub mod embeddings;
pub mod error;
pub mod indexing;
pub mod llm;
pub mod memory;
pub mod nlp;
pub mod processing;
pub mod rag;
pub mod rag_engine;
pub mod search;
pub mod types;

// Re-export primary types for convenience
pub use config::{PipelineParams, RagConfig};
pub use error::RagError;
pub use rag_engine::RagEngine;
pub use types::{AnswerResult, Document, QueryFeatures, RetryStrategy, UnresolvedEntry};

// Re-export common types
pub use anyhow::{Error, Result};
