use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{require_vector_id, ChunkBatches, ChunkStore};
use crate::error::StoreError;
use crate::models::Chunk;

/// Ephemeral chunk store keyed by vector id.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<BTreeMap<i64, Chunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn insert(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let id = require_vector_id(chunk)?;
        let mut chunks = self.chunks.write().await;
        if chunks.contains_key(&id) {
            return Err(StoreError::Conflict(id));
        }
        chunks.insert(id, chunk.clone());
        Ok(())
    }

    async fn get_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().await;
        Ok(chunks
            .values()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect())
    }

    async fn get_by_vector_id(&self, vector_id: i64) -> Result<Option<Chunk>, StoreError> {
        Ok(self.chunks.read().await.get(&vector_id).cloned())
    }

    async fn fetch_page(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().await;
        let page = match after {
            Some(after) => chunks
                .range(after.saturating_add(1)..)
                .take(limit)
                .map(|(_, c)| c.clone())
                .collect(),
            None => chunks.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    fn get_all_batched(&self, batch_size: usize) -> Result<ChunkBatches<'_>, StoreError> {
        ChunkBatches::new(self, batch_size)
    }

    async fn get_all(&self) -> Result<Vec<Chunk>, StoreError> {
        Ok(self.chunks.read().await.values().cloned().collect())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize, StoreError> {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|_, c| c.file_path != file_path);
        Ok(before - chunks.len())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut chunks = self.chunks.write().await;
        let removed = chunks.len();
        chunks.clear();
        Ok(removed)
    }

    async fn last_vector_id(&self) -> Result<i64, StoreError> {
        Ok(self
            .chunks
            .read()
            .await
            .keys()
            .next_back()
            .copied()
            .unwrap_or(-1))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.chunks.read().await.len())
    }
}
