//! Unresolved-query memory.
//!
//! Durable store of the queries the pipeline could not answer, kept in
//! one JSON file that is rewritten and fsynced on every mutation. A
//! single lock serializes writers; readers get defensive copies, so a
//! snapshot never changes under the caller.

pub mod change_detector;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{QueryMetadata, QueryStatus, RetrievalStats, UnresolvedEntry};

const MIN_CHUNKS: usize = 1;
const MIN_CITATIONS: usize = 1;

/// Answer markers the prompt cores instruct the model to emit when the
/// fragments contain no answer.
const NO_ANSWER_MARKERS: [&str; 2] = ["BRAK INFORMACJI", "BRAK ODPOWIEDZI"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub pending: usize,
    pub resolved: usize,
    pub avg_retry_count: f64,
}

struct MemoryInner {
    queries: Vec<UnresolvedEntry>,
    next_id: u64,
}

pub struct UnresolvedMemory {
    storage_path: PathBuf,
    inner: Mutex<MemoryInner>,
}

impl UnresolvedMemory {
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let storage_path = storage_path.into();
        if let Some(parent) = storage_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let queries = Self::load(&storage_path);
        let next_id = queries.iter().map(|q| q.id).max().unwrap_or(0) + 1;
        tracing::info!(
            path = %storage_path.display(),
            entries = queries.len(),
            "Unresolved-query memory ready"
        );

        Ok(Self {
            storage_path,
            inner: Mutex::new(MemoryInner { queries, next_id }),
        })
    }

    fn load(path: &PathBuf) -> Vec<UnresolvedEntry> {
        if !path.exists() {
            return Vec::new();
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read memory file, starting fresh");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(queries) => queries,
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt memory file, starting fresh");
                Vec::new()
            }
        }
    }

    /// Rewrite the backing file and fsync it before releasing the
    /// writer.
    fn persist(&self, queries: &[UnresolvedEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(queries)?;
        let mut file = std::fs::File::create(&self.storage_path)
            .with_context(|| format!("Failed to open {}", self.storage_path.display()))?;
        file.write_all(json.as_bytes())?;
        file.sync_all().context("Failed to fsync memory file")?;
        Ok(())
    }

    /// Append a new pending entry and return its id.
    pub fn add(&self, query: &str, metadata: &QueryMetadata) -> Result<u64> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.queries.push(UnresolvedEntry {
            id,
            query: query.to_string(),
            entities_hint: metadata.entities.clone(),
            years_hint: metadata.years.clone(),
            places_hint: metadata.places.clone(),
            retry_count: 0,
            status: QueryStatus::Pending,
            timestamp: Utc::now(),
            resolved_at: None,
        });
        inner.next_id += 1;
        self.persist(&inner.queries)?;
        Ok(id)
    }

    pub fn pending(&self) -> Vec<UnresolvedEntry> {
        self.inner
            .lock()
            .queries
            .iter()
            .filter(|q| q.status == QueryStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn by_id(&self, id: u64) -> Option<UnresolvedEntry> {
        self.inner
            .lock()
            .queries
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    pub fn increment_retry(&self, id: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.queries.iter_mut().find(|q| q.id == id) else {
            return Ok(false);
        };
        entry.retry_count += 1;
        self.persist(&inner.queries)?;
        Ok(true)
    }

    /// Mark an entry resolved. Idempotent: resolving an already
    /// resolved entry changes nothing.
    pub fn mark_resolved(&self, id: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.queries.iter_mut().find(|q| q.id == id) else {
            return Ok(false);
        };
        if entry.status == QueryStatus::Resolved {
            return Ok(true);
        }
        entry.status = QueryStatus::Resolved;
        entry.resolved_at = Some(Utc::now());
        self.persist(&inner.queries)?;
        Ok(true)
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();
        let pending: Vec<_> = inner
            .queries
            .iter()
            .filter(|q| q.status == QueryStatus::Pending)
            .collect();
        let resolved = inner
            .queries
            .iter()
            .filter(|q| q.status == QueryStatus::Resolved)
            .count();
        let avg_retry_count = pending
            .iter()
            .map(|q| q.retry_count as f64)
            .sum::<f64>()
            / pending.len().max(1) as f64;

        MemoryStats {
            total: inner.queries.len(),
            pending: pending.len(),
            resolved,
            avg_retry_count,
        }
    }

    /// Drop resolved entries, keeping only what is still pending.
    pub fn clear_resolved(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.queries.retain(|q| q.status == QueryStatus::Pending);
        self.persist(&inner.queries)
    }

    /// Whether an answer should land in this memory: the model said it
    /// had nothing, no fragments were used, or nothing was cited.
    pub fn should_save_as_unresolved(
        &self,
        answer: &str,
        used_chunks: &[String],
        stats: &RetrievalStats,
    ) -> bool {
        let answer_upper = answer.to_uppercase();
        if NO_ANSWER_MARKERS.iter().any(|m| answer_upper.contains(m)) {
            return true;
        }
        if used_chunks.len() < MIN_CHUNKS {
            return true;
        }
        stats.citations < MIN_CITATIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory(dir: &TempDir) -> UnresolvedMemory {
        UnresolvedMemory::new(dir.path().join("unresolved_queries.json")).unwrap()
    }

    fn metadata() -> QueryMetadata {
        QueryMetadata {
            entities: vec!["PAN".into()],
            places: vec!["Warszawa".into()],
            years: vec![2023],
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let first = memory.add("pytanie pierwsze", &metadata()).unwrap();
        let second = memory.add("pytanie drugie", &metadata()).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_ids_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unresolved_queries.json");
        let first = {
            let memory = UnresolvedMemory::new(&path).unwrap();
            memory.add("pytanie", &metadata()).unwrap()
        };
        let reloaded = UnresolvedMemory::new(&path).unwrap();
        let second = reloaded.add("kolejne pytanie", &metadata()).unwrap();
        assert!(second > first);
        assert_eq!(reloaded.pending().len(), 2);
    }

    #[test]
    fn test_pending_and_resolved_are_disjoint() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let id = memory.add("pytanie", &metadata()).unwrap();
        memory.add("inne pytanie", &metadata()).unwrap();
        memory.mark_resolved(id).unwrap();

        let pending = memory.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending.iter().all(|q| q.id != id));

        let stats = memory.stats();
        assert_eq!(stats.pending + stats.resolved, stats.total);
    }

    #[test]
    fn test_mark_resolved_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let id = memory.add("pytanie", &metadata()).unwrap();
        assert!(memory.mark_resolved(id).unwrap());
        let resolved_at = memory.by_id(id).unwrap().resolved_at;
        assert!(memory.mark_resolved(id).unwrap());
        assert_eq!(memory.by_id(id).unwrap().resolved_at, resolved_at);
        assert_eq!(memory.stats().resolved, 1);
    }

    #[test]
    fn test_mark_resolved_unknown_id_is_false() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        assert!(!memory.mark_resolved(42).unwrap());
    }

    #[test]
    fn test_increment_retry_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unresolved_queries.json");
        let id = {
            let memory = UnresolvedMemory::new(&path).unwrap();
            let id = memory.add("pytanie", &metadata()).unwrap();
            memory.increment_retry(id).unwrap();
            memory.increment_retry(id).unwrap();
            id
        };
        let reloaded = UnresolvedMemory::new(&path).unwrap();
        assert_eq!(reloaded.by_id(id).unwrap().retry_count, 2);
    }

    #[test]
    fn test_stats_average_over_pending_only() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let a = memory.add("a", &metadata()).unwrap();
        let b = memory.add("b", &metadata()).unwrap();
        memory.increment_retry(a).unwrap();
        memory.increment_retry(a).unwrap();
        memory.mark_resolved(b).unwrap();

        let stats = memory.stats();
        assert_eq!(stats.pending, 1);
        assert!((stats.avg_retry_count - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_resolved_keeps_pending() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let id = memory.add("pytanie", &metadata()).unwrap();
        memory.add("pozostaje", &metadata()).unwrap();
        memory.mark_resolved(id).unwrap();
        memory.clear_resolved().unwrap();

        let stats = memory.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.resolved, 0);
    }

    #[test]
    fn test_hints_are_stored() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let id = memory.add("pytanie", &metadata()).unwrap();
        let entry = memory.by_id(id).unwrap();
        assert_eq!(entry.entities_hint, vec!["PAN"]);
        assert_eq!(entry.places_hint, vec!["Warszawa"]);
        assert_eq!(entry.years_hint, vec![2023]);
    }

    #[test]
    fn test_should_save_on_no_answer_marker() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let chunks = vec!["fragment".to_string()];
        let stats = RetrievalStats {
            citations: 2,
            ..Default::default()
        };
        assert!(memory.should_save_as_unresolved("brak informacji w tekście", &chunks, &stats));
        assert!(memory.should_save_as_unresolved("BRAK ODPOWIEDZI", &chunks, &stats));
        assert!(!memory.should_save_as_unresolved("Odpowiedź [1]", &chunks, &stats));
    }

    #[test]
    fn test_should_save_without_chunks_or_citations() {
        let dir = TempDir::new().unwrap();
        let memory = memory(&dir);
        let stats_with_citation = RetrievalStats {
            citations: 1,
            ..Default::default()
        };
        assert!(memory.should_save_as_unresolved("Odpowiedź [1]", &[], &stats_with_citation));

        let chunks = vec!["fragment".to_string()];
        let stats_without_citation = RetrievalStats::default();
        assert!(memory.should_save_as_unresolved("Odpowiedź", &chunks, &stats_without_citation));
    }
}
