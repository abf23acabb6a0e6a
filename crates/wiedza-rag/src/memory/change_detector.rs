//! Corpus change detection.
//!
//! Remembers the set of document ids present when the system first
//! ran, and diffs the live index against it to find documents that
//! arrived since. New documents are matched against unresolved-query
//! hints to decide which queries are worth replaying.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::search::LexicalIndex;
use crate::types::{NewDocument, UnresolvedEntry};

const TEXT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotState {
    doc_ids: Vec<u64>,
    timestamp: DateTime<Utc>,
}

pub struct DocumentChangeDetector {
    lexical: Arc<dyn LexicalIndex>,
    state_path: PathBuf,
    initial_doc_ids: RwLock<HashSet<u64>>,
}

impl DocumentChangeDetector {
    /// Load the persisted snapshot, or take one from the live index
    /// when none exists yet.
    pub async fn new(lexical: Arc<dyn LexicalIndex>, state_path: impl Into<PathBuf>) -> Result<Self> {
        let state_path = state_path.into();
        if let Some(parent) = state_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let initial_doc_ids = if state_path.exists() {
            let content = std::fs::read_to_string(&state_path)
                .with_context(|| format!("Failed to read {}", state_path.display()))?;
            let state: SnapshotState =
                serde_json::from_str(&content).context("Failed to parse snapshot state")?;
            tracing::info!(documents = state.doc_ids.len(), "Loaded initial snapshot");
            state.doc_ids.into_iter().collect()
        } else {
            let ids = lexical.all_ids().await.context("Initial id scroll failed")?;
            Self::save_state(&state_path, &ids)?;
            tracing::info!(documents = ids.len(), "Persisted initial snapshot");
            ids
        };

        Ok(Self {
            lexical,
            state_path,
            initial_doc_ids: RwLock::new(initial_doc_ids),
        })
    }

    fn save_state(state_path: &PathBuf, ids: &HashSet<u64>) -> Result<()> {
        let mut doc_ids: Vec<u64> = ids.iter().copied().collect();
        doc_ids.sort_unstable();
        let state = SnapshotState {
            doc_ids,
            timestamp: Utc::now(),
        };
        std::fs::write(state_path, serde_json::to_string_pretty(&state)?)
            .with_context(|| format!("Failed to write {}", state_path.display()))?;
        Ok(())
    }

    pub fn initial_count(&self) -> usize {
        self.initial_doc_ids.read().len()
    }

    /// Documents present in the index but absent from the initial
    /// snapshot, with the metadata needed for hint matching.
    pub async fn get_new_documents(&self) -> Result<Vec<NewDocument>> {
        let current = self.lexical.all_ids().await.context("Id scroll failed")?;
        let mut new_ids: Vec<u64> = {
            let initial = self.initial_doc_ids.read();
            current.difference(&initial).copied().collect()
        };
        if new_ids.is_empty() {
            tracing::debug!("No new documents since snapshot");
            return Ok(Vec::new());
        }
        new_ids.sort_unstable();
        tracing::info!(count = new_ids.len(), "Found new documents");

        let mut new_docs = Vec::with_capacity(new_ids.len());
        for id in new_ids {
            match self.lexical.get_document(id).await {
                Ok(Some(doc)) => new_docs.push(NewDocument {
                    id,
                    entities: doc.entities,
                    places: doc.places,
                    years: doc.years,
                    text: doc.text.chars().take(TEXT_PREVIEW_CHARS).collect(),
                }),
                Ok(None) => tracing::warn!(id, "New document vanished before fetch"),
                Err(e) => tracing::warn!(id, error = %e, "Failed to fetch new document"),
            }
        }
        Ok(new_docs)
    }

    /// Re-scroll the index and overwrite the snapshot with the current
    /// state.
    pub async fn reset_initial_state(&self) -> Result<()> {
        let ids = self.lexical.all_ids().await.context("Id scroll failed")?;
        Self::save_state(&self.state_path, &ids)?;
        tracing::info!(documents = ids.len(), "Snapshot reset");
        *self.initial_doc_ids.write() = ids;
        Ok(())
    }
}

/// A new document matches a stored query when any of its entities,
/// places, or years intersects the query's hints.
pub fn match_query_with_new_docs(
    entry: &UnresolvedEntry,
    new_documents: &[NewDocument],
) -> (bool, Vec<u64>) {
    let entities: HashSet<&String> = entry.entities_hint.iter().collect();
    let places: HashSet<&String> = entry.places_hint.iter().collect();
    let years: HashSet<i32> = entry.years_hint.iter().copied().collect();

    let mut matched = Vec::new();
    for doc in new_documents {
        let entity_match = doc.entities.iter().any(|e| entities.contains(e));
        let place_match = doc.places.iter().any(|p| places.contains(p));
        let year_match = doc.years.iter().any(|y| years.contains(y));
        if entity_match || place_match || year_match {
            matched.push(doc.id);
        }
    }
    (!matched.is_empty(), matched)
}
