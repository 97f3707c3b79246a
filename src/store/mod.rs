//! Chunk persistence.
//!
//! The [`ChunkStore`] trait is the seam between the pipeline and its
//! storage. Two backends implement it:
//!
//! - [`SqliteChunkStore`]: durable, content-addressed blobs plus an indexed
//!   metadata table (sqlx / SQLite).
//! - [`InMemoryChunkStore`]: ephemeral, for tests and one-shot runs.
//!
//! Vector ids are assigned by the caller (see [`crate::walker`]); the store
//! only enforces that they are present and unique.

mod memory;
mod sqlite;

pub use memory::InMemoryChunkStore;
pub use sqlite::SqliteChunkStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::Chunk;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist a chunk. `chunk.vector_id` must be set and unused.
    async fn insert(&self, chunk: &Chunk) -> Result<(), StoreError>;

    async fn get_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError>;

    async fn get_by_vector_id(&self, vector_id: i64) -> Result<Option<Chunk>, StoreError>;

    /// Up to `limit` chunks with `vector_id > after` (all ids when `after` is
    /// `None`), sorted ascending by vector id.
    async fn fetch_page(&self, after: Option<i64>, limit: usize)
        -> Result<Vec<Chunk>, StoreError>;

    /// Lazy ascending-id cursor over every stored chunk.
    fn get_all_batched(&self, batch_size: usize) -> Result<ChunkBatches<'_>, StoreError>;

    /// Every stored chunk. Order unspecified.
    async fn get_all(&self) -> Result<Vec<Chunk>, StoreError>;

    /// Remove all chunks of a file. Returns how many were removed.
    async fn delete_by_file(&self, file_path: &str) -> Result<usize, StoreError>;

    async fn delete_all(&self) -> Result<usize, StoreError>;

    /// Highest assigned vector id, or `-1` for an empty store.
    async fn last_vector_id(&self) -> Result<i64, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Keyset-paginated cursor returned by [`ChunkStore::get_all_batched`].
///
/// Each batch is sorted by vector id and starts after the last id of the
/// previous batch, so concatenated batches are strictly ascending. Every
/// call to `get_all_batched` starts a fresh cursor.
pub struct ChunkBatches<'a> {
    store: &'a dyn ChunkStore,
    batch_size: usize,
    after: Option<i64>,
    exhausted: bool,
}

impl<'a> ChunkBatches<'a> {
    pub fn new(store: &'a dyn ChunkStore, batch_size: usize) -> Result<Self, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::InvalidBatchSize);
        }
        Ok(Self {
            store,
            batch_size,
            after: None,
            exhausted: false,
        })
    }

    /// The next non-empty batch, or `None` once every chunk has been yielded.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Chunk>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.store.fetch_page(self.after, self.batch_size).await?;
        if page.len() < self.batch_size {
            self.exhausted = true;
        }

        match page.last().and_then(|c| c.vector_id) {
            Some(last) => {
                self.after = Some(last);
                Ok(Some(page))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

/// Shared insert precondition for both backends.
fn require_vector_id(chunk: &Chunk) -> Result<i64, StoreError> {
    match chunk.vector_id {
        Some(id) if id >= 0 => Ok(id),
        Some(id) => Err(StoreError::InvalidChunk(format!(
            "negative vector id {id} for {}",
            chunk.file_path
        ))),
        None => Err(StoreError::InvalidChunk(format!(
            "chunk from {} has no vector id",
            chunk.file_path
        ))),
    }
}
