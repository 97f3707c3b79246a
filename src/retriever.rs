//! Retrieval orchestration: rebuild the vector index from the chunk store,
//! and answer similarity queries against the persisted snapshot.
//!
//! # Build
//!
//! ```text
//! store.get_all_batched ──► sort/verify ascending ids ──► drop empty content
//!        ──► embed batch ──► index.add(vectors, ids) ──► ... ──► save (tmp + rename)
//! ```
//!
//! Any failure before the final save leaves the previous snapshot in place.
//!
//! # Query
//!
//! ```text
//! text ──► embed ──► load snapshot ──► top-k positions
//!      ──► position → vector id ──► store.get_by_vector_id ──► ranked hits
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{embed_query, embed_texts, Embedder};
use crate::error::{DriftError, IndexError, Result};
use crate::index::{HnswParams, VectorIndex};
use crate::models::SearchHit;
use crate::store::ChunkStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub chunks_seen: usize,
    pub vectors_indexed: usize,
    pub skipped_empty: usize,
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    snapshot_path: PathBuf,
    params: HnswParams,
    batch_size: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            store,
            embedder,
            snapshot_path: config.index.snapshot_path.clone(),
            params: HnswParams::from(&config.index),
            batch_size: config.build.batch_size,
        }
    }

    pub fn snapshot_path(&self) -> &std::path::Path {
        &self.snapshot_path
    }

    /// Rebuild the index from every stored chunk and replace the snapshot.
    pub async fn build(&self) -> Result<BuildReport> {
        let mut index = VectorIndex::new(self.embedder.dims(), self.params);
        let mut report = BuildReport::default();
        let mut previous: Option<i64> = None;

        let mut batches = self.store.get_all_batched(self.batch_size)?;
        while let Some(mut batch) = batches.next_batch().await? {
            batch.sort_by_key(|c| c.vector_id);
            report.chunks_seen += batch.len();

            let mut texts = Vec::with_capacity(batch.len());
            let mut ids = Vec::with_capacity(batch.len());
            for chunk in batch {
                let id = chunk
                    .vector_id
                    .ok_or_else(|| DriftError::MissingId(chunk.file_path.clone()))?;
                if let Some(prev) = previous {
                    if id <= prev {
                        return Err(DriftError::OutOfOrder { previous: prev, got: id }.into());
                    }
                }
                previous = Some(id);

                if chunk.content.is_empty() {
                    report.skipped_empty += 1;
                    continue;
                }
                texts.push(chunk.content);
                ids.push(id);
            }

            if texts.is_empty() {
                continue;
            }

            let vectors = embed_texts(self.embedder.as_ref(), &texts).await?;
            debug!(batch = vectors.len(), last_id = ?previous, "embedded batch");

            index = tokio::task::spawn_blocking(move || -> std::result::Result<_, IndexError> {
                index.add(&vectors, &ids)?;
                Ok(index)
            })
            .await??;
            report.vectors_indexed += texts.len();
        }

        let path = self.snapshot_path.clone();
        tokio::task::spawn_blocking(move || index.save(&path)).await??;

        info!(
            chunks = report.chunks_seen,
            vectors = report.vectors_indexed,
            skipped_empty = report.skipped_empty,
            snapshot = %self.snapshot_path.display(),
            "index built"
        );
        Ok(report)
    }

    /// Up to `k` chunks most similar to `query`, best first. `k` is clamped
    /// to the number of indexed vectors.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;

        let path = self.snapshot_path.clone();
        let dims = self.embedder.dims();
        let params = self.params;
        let index = match tokio::task::spawn_blocking(move || VectorIndex::load(&path, dims, params))
            .await?
        {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "index snapshot unusable, treating as empty");
                return Ok(Vec::new());
            }
        };
        if index.is_empty() {
            warn!(snapshot = %self.snapshot_path.display(), "no index built yet");
            return Ok(Vec::new());
        }

        let k = k.min(index.len());
        let (output, index) = tokio::task::spawn_blocking(move || {
            index.search(&vector, k).map(|output| (output, index))
        })
        .await??;

        let mut hits = Vec::with_capacity(output.positions.len());
        for (&position, &distance) in output.positions.iter().zip(&output.distances) {
            if position < 0 {
                continue;
            }
            let Some(vector_id) = index.vector_id_at(position) else {
                warn!(position, "index position has no vector id");
                continue;
            };
            match self.store.get_by_vector_id(vector_id).await? {
                Some(chunk) => hits.push(SearchHit {
                    content: chunk.content,
                    distance,
                    vector_id,
                    file_path: chunk.file_path,
                    name: chunk.name,
                    kind: chunk.kind,
                }),
                None => {
                    warn!(vector_id, "indexed chunk missing from store, skipping");
                }
            }
        }
        Ok(hits)
    }

    /// Delete the snapshot. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool> {
        let path = self.snapshot_path.clone();
        let removed = tokio::task::spawn_blocking(move || VectorIndex::remove_snapshot(&path)).await??;
        if removed {
            info!(snapshot = %self.snapshot_path.display(), "index cleared");
        }
        Ok(removed)
    }
}
