//! Environment-driven configuration for the pipeline and its external
//! services. Every service endpoint and model name comes from the
//! environment with defaults matching the docker-compose deployment.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub es_url: String,
    pub qdrant_url: String,
    pub ollama_host: String,
    pub spacy_url: String,
    pub ollama_model_name: String,
    pub transformer_model_name: String,
    pub spacy_model_name: String,
    pub qdrant_index_name: String,
    pub es_index_name: String,
    pub data_file_name: String,
    pub unresolved_storage_path: PathBuf,
    pub snapshot_storage_path: PathBuf,
    pub enable_decomposition: bool,
    pub params: PipelineParams,
}

/// Pipeline tunables. Defaults are the values the orchestrator was
/// calibrated with; tests override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Word budget for a single chunk.
    pub max_chunk_tokens: usize,
    /// Word overlap carried between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks with fewer distinct tokens than this are dropped.
    pub min_chunk_tokens: usize,
    /// Upper bound on chunks surviving the filter.
    pub max_docs: usize,
    /// Token budget for the context passed to the model.
    pub max_context_tokens: usize,
    /// Fused list length after reciprocal rank fusion.
    pub fusion_top_k: usize,
    /// Hits requested from each index per sub-query.
    pub search_size: usize,
    /// Cosine floor for zero-overlap chunks on factual queries.
    pub cosine_threshold: f32,
    /// Grounding ratio floor for fuzzy citation matching.
    pub fuzzy_threshold: f64,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 200,
            chunk_overlap: 30,
            min_chunk_tokens: 15,
            max_docs: 10,
            max_context_tokens: 250,
            fusion_top_k: 15,
            search_size: 35,
            cosine_threshold: 0.55,
            fuzzy_threshold: 0.75,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wiedza-rag")
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            es_url: "http://elasticsearch:9200".to_string(),
            qdrant_url: "http://qdrant:6334".to_string(),
            ollama_host: "http://ollama:11434".to_string(),
            spacy_url: "http://spacy:8000".to_string(),
            ollama_model_name: "gemma2:2b".to_string(),
            transformer_model_name: "intfloat/multilingual-e5-small".to_string(),
            spacy_model_name: "pl_core_news_sm".to_string(),
            qdrant_index_name: "culturax".to_string(),
            es_index_name: "culturax".to_string(),
            data_file_name: "culturax_vectors.ndjson".to_string(),
            unresolved_storage_path: data_dir().join("unresolved_queries.json"),
            snapshot_storage_path: data_dir().join("snapshots").join("initial_state.json"),
            enable_decomposition: true,
            params: PipelineParams::default(),
        }
    }
}

impl RagConfig {
    /// Build the config from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            es_url: env_or("ES_URL", &defaults.es_url),
            qdrant_url: env_or("QDRANT_URL", &defaults.qdrant_url),
            ollama_host: env_or("OLLAMA_HOST", &defaults.ollama_host),
            spacy_url: env_or("SPACY_URL", &defaults.spacy_url),
            ollama_model_name: env_or("OLLAMA_MODEL_NAME", &defaults.ollama_model_name),
            transformer_model_name: env_or(
                "TRANSFORMER_MODEL_NAME",
                &defaults.transformer_model_name,
            ),
            spacy_model_name: env_or("SPACY_MODEL_NAME", &defaults.spacy_model_name),
            qdrant_index_name: env_or("QDRANT_INDEX_NAME", &defaults.qdrant_index_name),
            es_index_name: env_or("ES_INDEX_NAME", &defaults.es_index_name),
            data_file_name: env_or("DATA_FILE_NAME", &defaults.data_file_name),
            unresolved_storage_path: env::var("UNRESOLVED_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.unresolved_storage_path),
            snapshot_storage_path: env::var("SNAPSHOT_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_storage_path),
            enable_decomposition: true,
            params: PipelineParams::default(),
        }
    }

    /// Validate config values, returning errors for clearly broken
    /// configurations. Called once at startup; a failure here is fatal.
    pub fn validate(&self) -> Result<(), RagError> {
        for (name, value) in [
            ("ES_URL", &self.es_url),
            ("QDRANT_URL", &self.qdrant_url),
            ("OLLAMA_HOST", &self.ollama_host),
            ("OLLAMA_MODEL_NAME", &self.ollama_model_name),
            ("ES_INDEX_NAME", &self.es_index_name),
            ("QDRANT_INDEX_NAME", &self.qdrant_index_name),
        ] {
            if value.trim().is_empty() {
                return Err(RagError::Config(format!("{} must not be empty", name)));
            }
        }
        let p = &self.params;
        if p.max_chunk_tokens == 0 {
            return Err(RagError::Config("max_chunk_tokens must be > 0".into()));
        }
        if p.chunk_overlap >= p.max_chunk_tokens {
            return Err(RagError::Config(
                "chunk_overlap must be < max_chunk_tokens".into(),
            ));
        }
        if p.max_docs == 0 {
            return Err(RagError::Config("max_docs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&p.cosine_threshold) {
            return Err(RagError::Config(
                "cosine_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&p.fuzzy_threshold) {
            return Err(RagError::Config(
                "fuzzy_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// The instruction prefixes tried in priority order under the
/// `modify_prompt` retry strategy. Each constrains the model to answer
/// only from the numbered fragments and to cite them.
pub fn default_prompt_cores() -> Vec<String> {
    vec![
        r#"Twoim zadaniem jest odpowiedzieć na pytanie WYŁĄCZNIE na podstawie fragmentów poniżej.

Zasady:
- Nie używaj wiedzy spoza fragmentów.
- Napisz odpowiedź i poprzyj ją cytatem w formie [numer_fragmentu] "cytat z fragmentu".
- Cały zwrócony tekst powinien mieć formę: ODPOWIEDŹ, [numer_fragmentu] "cytat z fragmentu".
- Jeżeli nie wypiszesz żadnej odpowiedzi, zwróć dokładnie: "BRAK ODPOWIEDZI".
- Jeśli zwrócisz jakąkolwiek odpowiedź, albo cytat to NIE PISZ "BRAK ODPOWIEDZI".
"#
        .to_string(),
        r#"Twoim zadaniem jest odpowiedzieć na pytanie WYŁĄCZNIE na podstawie fragmentów poniżej.

Zasady:
- Nie używaj wiedzy spoza fragmentów.
- Każde zdanie odpowiedzi musi być poparte cytatem w formacie [numer_fragmentu] "cytat z fragmentu".
- Jeśli fragmenty nie zawierają odpowiedzi na pytanie, napisz dokładnie: "BRAK INFORMACJI".
"#
        .to_string(),
        "Jesteś asystentem, który odpowiada na pytania wyłącznie na podstawie dostarczonych fragmentów."
            .to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_stay_below_chunk_size() {
        let mut config = RagConfig::default();
        config.params.chunk_overlap = config.params.max_chunk_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_index_name_rejected() {
        let mut config = RagConfig::default();
        config.es_index_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_three_prompt_cores_defined() {
        let cores = default_prompt_cores();
        assert_eq!(cores.len(), 3);
        assert!(cores[0].contains("BRAK ODPOWIEDZI"));
        assert!(cores[1].contains("BRAK INFORMACJI"));
    }
}
