//! Thin HTTP adapter over the RAG orchestrator. Wires the external
//! services from env config, bootstraps the indexes and corpus, and
//! translates HTTP to core calls.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use wiedza_rag::config::{default_prompt_cores, RagConfig};
use wiedza_rag::embeddings::OllamaEmbedder;
use wiedza_rag::error::RagError;
use wiedza_rag::indexing::{populate_indexes, Enrichment};
use wiedza_rag::llm::OllamaChat;
use wiedza_rag::memory::change_detector::DocumentChangeDetector;
use wiedza_rag::memory::UnresolvedMemory;
use wiedza_rag::nlp::SpacyPipeline;
use wiedza_rag::rag::ClarifierLexicon;
use wiedza_rag::rag_engine::{RagEngine, ServiceHandles};
use wiedza_rag::search::{ElasticIndex, LexicalIndex, QdrantIndex};
use wiedza_rag::types::{QueryStatus, RetryStrategy};

#[derive(Clone)]
struct AppState {
    engine: Arc<RagEngine>,
    memory: Arc<UnresolvedMemory>,
    detector: Arc<DocumentChangeDetector>,
}

#[derive(Debug, Deserialize)]
struct AskParams {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct AskBody {
    #[serde(default)]
    retry_strats: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RetryParams {
    id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RagConfig::from_env();
    config.validate().context("Configuration is unusable")?;

    let lexical = Arc::new(
        ElasticIndex::new(&config.es_url, &config.es_index_name)
            .context("Failed to build Elasticsearch client")?,
    );
    let vector = Arc::new(
        QdrantIndex::new(&config.qdrant_url, &config.qdrant_index_name)
            .context("Failed to build Qdrant client")?,
    );
    let chat = Arc::new(
        OllamaChat::new(&config.ollama_host, &config.ollama_model_name)
            .context("Failed to build LLM client")?,
    );
    let embedder = Arc::new(
        OllamaEmbedder::new(&config.ollama_host, &config.transformer_model_name)
            .context("Failed to build embedding client")?,
    );
    let nlp = Arc::new(
        SpacyPipeline::new(&config.spacy_url, &config.spacy_model_name)
            .context("Failed to build NLP client")?,
    );

    // Index bootstrap and corpus ingestion are best-effort: a store
    // that is briefly unreachable degrades searches, it does not stop
    // the server from coming up.
    if let Err(e) = lexical.ensure_index().await {
        tracing::warn!(error = %e, "Lexical index bootstrap failed");
    }
    if let Err(e) = vector.ensure_collection().await {
        tracing::warn!(error = %e, "Vector collection bootstrap failed");
    }
    let ner_enrichment = std::env::var("NER_ENRICHMENT")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let data_path = std::path::Path::new("data").join(&config.data_file_name);
    if data_path.exists() {
        let enrichment = ner_enrichment.then(|| Enrichment {
            nlp: nlp.as_ref(),
            chat: chat.as_ref(),
        });
        match populate_indexes(&data_path, &lexical, &vector, enrichment).await {
            Ok(stats) => {
                if stats.inserted > 0 {
                    tracing::info!(inserted = stats.inserted, "Corpus ingested");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Corpus ingestion failed"),
        }
    } else {
        tracing::warn!(path = %data_path.display(), "Corpus file not found, skipping ingestion");
    }
    if let Err(e) = chat.ensure_model().await {
        tracing::warn!(error = %e, "Model availability check failed");
    }

    let memory = Arc::new(
        UnresolvedMemory::new(&config.unresolved_storage_path)
            .context("Failed to open unresolved-query memory")?,
    );
    let lexical_handle: Arc<dyn LexicalIndex> = lexical.clone();
    let detector = Arc::new(
        DocumentChangeDetector::new(lexical_handle, &config.snapshot_storage_path)
            .await
            .context("Failed to initialize change detector")?,
    );

    let handles = ServiceHandles {
        nlp,
        embedder,
        chat,
        lexical,
        vector,
    };
    let mut engine = RagEngine::new(
        handles,
        memory.clone(),
        default_prompt_cores(),
        config.params.clone(),
        config.enable_decomposition,
    );
    if let Ok(path) = std::env::var("CLARIFIER_LEXICON_PATH") {
        let lexicon = ClarifierLexicon::from_file(std::path::Path::new(&path))
            .with_context(|| format!("Failed to load clarifier lexicon from {}", path))?;
        engine = engine.with_clarifier_lexicon(lexicon);
    }
    let engine = Arc::new(engine);

    let state = AppState {
        engine,
        memory,
        detector,
    };

    let app = Router::new()
        .route("/ask", post(ask))
        .route("/pending", get(pending))
        .route("/pending/:id", get(pending_by_id))
        .route("/retry", post(retry))
        .route("/retry_all", post(retry_all))
        .route("/stats", get(stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    tracing::info!(addr = %bind_addr, "Serving");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

fn parse_strategies(body: Option<AskBody>) -> Vec<RetryStrategy> {
    let Some(strats) = body.and_then(|b| b.retry_strats) else {
        return RetryStrategy::defaults();
    };
    strats
        .iter()
        .filter_map(|s| match RetryStrategy::from_str(s) {
            Ok(strategy) => Some(strategy),
            Err(e) => {
                tracing::warn!(strategy = %s, error = %e, "Ignoring unknown retry strategy");
                None
            }
        })
        .collect()
}

async fn ask(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
    body: Option<Json<AskBody>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let strategies = parse_strategies(body.map(|Json(b)| b));
    let result = state
        .engine
        .answer(&params.query, &strategies)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "model_answer": result })))
}

async fn pending(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "pending_queries": state.memory.pending() }))
}

async fn pending_by_id(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.memory.by_id(id) {
        Some(entry) if entry.status == QueryStatus::Pending => {
            Ok(Json(json!({ "query": entry })))
        }
        _ => Err((StatusCode::NOT_FOUND, RagError::NotFound(id).to_string())),
    }
}

async fn retry(
    State(state): State<AppState>,
    Query(params): Query<RetryParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let Some(entry) = state.memory.by_id(params.id) else {
        return Err((
            StatusCode::NOT_FOUND,
            RagError::NotFound(params.id).to_string(),
        ));
    };
    if entry.status != QueryStatus::Pending {
        return Ok(Json(json!({
            "message": format!("Query with id {} already resolved", params.id),
            "query": entry,
        })));
    }
    let outcome = state
        .engine
        .retry_entry(&entry)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Retry failed: {}", e)))?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

async fn retry_all(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let outcomes = state
        .engine
        .retry_all_pending(&state.detector)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if outcomes.is_empty() {
        return Ok(Json(json!({
            "message": "No new documents or matching pending queries",
            "retried_count": 0,
            "results": [],
        })));
    }
    Ok(Json(json!({
        "retried_count": outcomes.len(),
        "results": outcomes,
    })))
}

async fn stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let new_documents = state
        .detector
        .get_new_documents()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .len();
    Ok(Json(json!({
        "memory": state.memory.stats(),
        "detector": {
            "initial_documents": state.detector.initial_count(),
            "new_documents": new_documents,
        },
    })))
}
