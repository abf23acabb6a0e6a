//! Corpus ingestion from NDJSON into both indexes.
//!
//! The corpus file interleaves bulk-metadata lines (starting with
//! `{"index"`) with document records; metadata lines are skipped and
//! records missing `id`, `text`, or `vector` are rejected. Writes go
//! out in small batches, and stores that already hold documents are
//! left untouched. Optionally fills in missing entity/place/year
//! fields with NER plus hybrid date extraction.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::llm::ChatModel;
use crate::nlp::NlpPipeline;
use crate::rag::metadata::{hybrid_date_extraction, years_from_dates};
use crate::search::{ElasticIndex, QdrantIndex};
use crate::types::Document;

const BATCH_SIZE: usize = 5;
const REQUIRED_KEYS: [&str; 3] = ["id", "text", "vector"];

#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub inserted: usize,
    pub rejected: usize,
}

/// NER + date enrichment services for records missing metadata fields.
pub struct Enrichment<'a> {
    pub nlp: &'a dyn NlpPipeline,
    pub chat: &'a dyn ChatModel,
}

/// Load the corpus file into both stores. Stores that already contain
/// documents are skipped so restarts do not re-ingest.
pub async fn populate_indexes(
    data_path: &Path,
    es: &ElasticIndex,
    qdrant: &QdrantIndex,
    enrichment: Option<Enrichment<'_>>,
) -> Result<IngestStats> {
    let write_es = match es.count().await {
        Ok(0) => true,
        Ok(count) => {
            tracing::info!(count, "Lexical index already populated, skipping");
            false
        }
        Err(e) => return Err(e.context("Lexical index count failed")),
    };
    let write_qdrant = match qdrant.count().await {
        Ok(0) => true,
        Ok(count) => {
            tracing::info!(count, "Vector collection already populated, skipping");
            false
        }
        Err(e) => return Err(e.context("Vector collection count failed")),
    };

    let mut stats = IngestStats::default();
    if !write_es && !write_qdrant {
        return Ok(stats);
    }

    let file = std::fs::File::open(data_path)
        .with_context(|| format!("Failed to open corpus file {}", data_path.display()))?;
    let reader = BufReader::new(file);

    let mut batch: Vec<Document> = Vec::with_capacity(BATCH_SIZE);
    for (line_number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read corpus line")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with("{\"index\"") {
            continue;
        }

        let Some(mut doc) = parse_record(line) else {
            tracing::warn!(line = line_number + 1, "Invalid corpus record, skipping");
            stats.rejected += 1;
            continue;
        };

        if let Some(enrichment) = &enrichment {
            if let Err(e) = enrich_if_missing(&mut doc, line, enrichment).await {
                tracing::warn!(id = doc.id, error = %e, "Enrichment failed, indexing as-is");
            }
        }

        batch.push(doc);
        if batch.len() == BATCH_SIZE {
            flush(&batch, es, qdrant, write_es, write_qdrant).await?;
            stats.inserted += batch.len();
            batch.clear();
        }
    }
    if !batch.is_empty() {
        flush(&batch, es, qdrant, write_es, write_qdrant).await?;
        stats.inserted += batch.len();
    }

    tracing::info!(
        inserted = stats.inserted,
        rejected = stats.rejected,
        "Corpus ingestion finished"
    );
    Ok(stats)
}

/// Parse one NDJSON record, requiring `id`, `text`, and `vector`.
fn parse_record(line: &str) -> Option<Document> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    if REQUIRED_KEYS.iter().any(|key| !object.contains_key(*key)) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Fill in entities/places/years when the record did not carry them.
/// Presence is judged on the raw JSON so an explicitly empty list is
/// left alone.
async fn enrich_if_missing(
    doc: &mut Document,
    raw_line: &str,
    enrichment: &Enrichment<'_>,
) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw_line)?;
    let needs_entities = value.get("entities").is_none();
    let needs_places = value.get("places").is_none();
    let needs_years = value.get("years").is_none();
    if !(needs_entities || needs_places || needs_years) || doc.text.is_empty() {
        return Ok(());
    }

    let annotation = enrichment.nlp.annotate(&doc.text).await?;

    if needs_entities {
        let entities: BTreeSet<String> = annotation
            .entities
            .iter()
            .filter(|e| e.label.is_person_or_org())
            .map(|e| e.text.clone())
            .collect();
        doc.entities = entities.into_iter().collect();
    }
    if needs_places {
        let places: BTreeSet<String> = annotation
            .entities
            .iter()
            .filter(|e| e.label.is_place())
            .map(|e| e.text.clone())
            .collect();
        doc.places = places.into_iter().collect();
    }
    if needs_years {
        let dates = hybrid_date_extraction(&doc.text, &annotation, enrichment.chat).await;
        doc.years = years_from_dates(&dates);
    }
    Ok(())
}

async fn flush(
    batch: &[Document],
    es: &ElasticIndex,
    qdrant: &QdrantIndex,
    write_es: bool,
    write_qdrant: bool,
) -> Result<()> {
    if write_es {
        es.bulk_index(batch).await.context("Bulk indexing failed")?;
    }
    if write_qdrant {
        qdrant
            .upsert_documents(batch)
            .await
            .context("Point upsert failed")?;
    }
    Ok(())
}
