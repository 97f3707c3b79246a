//! The boundary operations, wired over shared components.
//!
//! [`CodeRag`] owns the chunk store, the embedder, the walker and the job
//! registry. It is cheap to clone; clones share everything, including the
//! two locks:
//!
//! - the **write lock** serializes walks and chunk deletions, so vector ids
//!   are assigned by one writer at a time;
//! - the **build lock** serializes index builds and snapshot removal.
//!
//! Each long operation has a `*_now` form that runs to completion and a
//! job form that returns a [`Uuid`] immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::jobs::{JobInfo, JobRegistry};
use crate::models::{Chunk, SearchHit};
use crate::retriever::{BuildReport, Retriever};
use crate::store::{ChunkStore, SqliteChunkStore};
use crate::walker::{WalkReport, Walker};

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub chunks_deleted: usize,
    pub walk: WalkReport,
    pub build: BuildReport,
}

#[derive(Clone)]
pub struct CodeRag {
    config: Arc<Config>,
    store: Arc<dyn ChunkStore>,
    retriever: Retriever,
    walker: Walker,
    jobs: JobRegistry,
    write_lock: Arc<Mutex<()>>,
    build_lock: Arc<Mutex<()>>,
}

impl CodeRag {
    /// Open the SQLite store and load the configured embedder.
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteChunkStore::open(&config.store.path).await?;
        let embedder = create_embedder(&config.embedding)?;
        Self::with_components(config, Arc::new(store), embedder)
    }

    pub fn with_components(
        config: Config,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if embedder.dims() != config.embedding.dims {
            return Err(RagError::InvalidArgument(format!(
                "embedder '{}' produces {} dimensions, config says {}",
                embedder.model_name(),
                embedder.dims(),
                config.embedding.dims
            )));
        }

        let walker = Walker::new(&config.walker)?;
        let retriever = Retriever::new(Arc::clone(&store), embedder, &config);

        Ok(Self {
            config: Arc::new(config),
            store,
            retriever,
            walker,
            jobs: JobRegistry::new(),
            write_lock: Arc::new(Mutex::new(())),
            build_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Walk `root` into the chunk store and wait for the result.
    pub async fn parse_now(&self, root: &Path) -> Result<WalkReport> {
        let _guard = self.write_lock.lock().await;
        self.walker.walk(root, self.store.as_ref()).await
    }

    /// Start a background walk of `root`.
    pub async fn parse(&self, root: PathBuf) -> Uuid {
        let this = self.clone();
        self.jobs
            .spawn("parse", async move { this.parse_now(&root).await })
            .await
    }

    pub async fn get_chunks(&self, file_path: &str) -> Result<Vec<Chunk>> {
        Ok(self.store.get_by_file(file_path).await?)
    }

    pub async fn delete_chunks(&self, file_path: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.delete_by_file(file_path).await?;
        info!(file = file_path, removed, "deleted chunks");
        Ok(removed)
    }

    pub async fn delete_all_chunks(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.delete_all().await?;
        info!(removed, "deleted all chunks");
        Ok(removed)
    }

    /// Rebuild the index from the chunk store and wait for the result.
    pub async fn build_index_now(&self) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;
        self.retriever.build().await
    }

    /// Start a background index rebuild.
    pub async fn build_index(&self) -> Uuid {
        let this = self.clone();
        self.jobs
            .spawn("build", async move { this.build_index_now().await })
            .await
    }

    /// Ranked chunks for `query`; `k` defaults to `retrieval.default_k` and
    /// may not exceed `retrieval.max_k`.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<SearchHit>> {
        let k = k.unwrap_or(self.config.retrieval.default_k);
        let max_k = self.config.retrieval.max_k;
        if k > max_k {
            return Err(RagError::InvalidArgument(format!(
                "k must be <= {max_k}, got {k}"
            )));
        }
        self.retriever.search(query, k).await
    }

    /// Remove the index snapshot. Returns whether one existed.
    pub async fn clear_index(&self) -> Result<bool> {
        let _guard = self.build_lock.lock().await;
        self.retriever.clear().await
    }

    /// Clear the index and the chunk store, re-walk the configured root and
    /// rebuild, all in one job.
    pub async fn refresh(&self) -> Uuid {
        let this = self.clone();
        self.jobs
            .spawn("refresh", async move { this.refresh_now().await })
            .await
    }

    pub async fn refresh_now(&self) -> Result<RefreshReport> {
        self.clear_index().await?;
        let chunks_deleted = self.delete_all_chunks().await?;
        let root = self.config.walker.root.clone();
        let walk = self.parse_now(&root).await?;
        let build = self.build_index_now().await?;
        Ok(RefreshReport {
            chunks_deleted,
            walk,
            build,
        })
    }

    pub async fn job(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.get(id).await
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        self.jobs.list().await
    }

    /// Block until job `id` finishes.
    pub async fn wait_job(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.wait(id).await
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        Ok(self.store.count().await?)
    }
}
