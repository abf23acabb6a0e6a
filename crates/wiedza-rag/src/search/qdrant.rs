//! Qdrant adapter for the dense retrieval side.
//!
//! The collection holds 384-dim cosine vectors; the payload is the
//! document JSON minus the vector itself. `QDRANT_URL` points at the
//! gRPC port (6334).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, CreateCollectionBuilder, Distance, Filter,
    PointStruct, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};

use super::VectorIndex;
use crate::embeddings::EMBEDDING_DIM;
use crate::types::Document;

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .with_context(|| format!("Failed to connect Qdrant client to {}", url))?;
        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub async fn ensure_collection(&self) -> Result<()> {
        if self
            .client
            .collection_exists(&self.collection)
            .await
            .context("Collection existence check failed")?
        {
            tracing::debug!(collection = %self.collection, "Collection already exists");
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(EMBEDDING_DIM as u64, Distance::Cosine),
                ),
            )
            .await
            .context("Collection creation failed")?;
        tracing::info!(collection = %self.collection, "Created collection");
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .context("Collection info request failed")?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    /// Upsert a batch of documents as points. The payload carries the
    /// full record minus the vector.
    pub async fn upsert_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut points = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut value = serde_json::to_value(doc)?;
            if let Some(object) = value.as_object_mut() {
                object.remove("vector");
            }
            let payload = Payload::try_from(value)
                .map_err(|e| anyhow!("Document {} payload is not an object: {}", doc.id, e))?;
            points.push(PointStruct::new(doc.id, doc.vector.clone(), payload));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .context("Point upsert failed")?;
        Ok(())
    }

    /// Vector search restricted to documents tagged with any of the
    /// given years.
    pub async fn search_filtered(
        &self,
        vector: &[f32],
        limit: usize,
        years: &[i32],
    ) -> Result<Vec<(u64, String)>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                .with_payload(true);
        if !years.is_empty() {
            let any: Vec<i64> = years.iter().map(|y| *y as i64).collect();
            builder = builder.filter(Filter::should([Condition::matches("years", any)]));
        }
        let response = self
            .client
            .search_points(builder)
            .await
            .context("Filtered vector search failed")?;
        Ok(response.result.iter().filter_map(point_to_hit).collect())
    }
}

fn point_to_hit(point: &ScoredPoint) -> Option<(u64, String)> {
    let id = match point.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => *n,
        PointIdOptions::Uuid(_) => return None,
    };
    let text = point
        .payload
        .get("text")
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default();
    Some((id, text))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(u64, String)>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await
            .context("Vector search failed")?;
        Ok(response.result.iter().filter_map(point_to_hit).collect())
    }
}
