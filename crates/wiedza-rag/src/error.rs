//! Error taxonomy for the orchestrator.
//!
//! Retrieval and LLM transport failures are caught at the adapter
//! boundary and degrade to empty results, so most of the crate returns
//! `anyhow::Result`. The typed variants below exist for the cases the
//! HTTP layer has to distinguish.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unknown unresolved-query id.
    #[error("query with id {0} not found in memory")]
    NotFound(u64),

    /// Startup configuration is unusable; fail fast.
    #[error("invalid configuration: {0}")]
    Config(String),
}
