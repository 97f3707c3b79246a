//! End-to-end pipeline tests over the SQLite store: walk a temporary
//! codebase, build the index, and query it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use code_rag::config::Config;
use code_rag::embedding::{Embedder, HashEmbedder};
use code_rag::models::{Chunk, ChunkKind};
use code_rag::retriever::Retriever;
use code_rag::store::{ChunkStore, SqliteChunkStore};
use code_rag::walker::walk;
use tempfile::TempDir;

const DIMS: usize = 512;

fn config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.store.path = tmp.path().join("data/chunks.sqlite");
    config.index.snapshot_path = tmp.path().join("data/index.hnsw");
    config.index.m = 8;
    config.index.ef_construction = 64;
    config.index.ef_search = 64;
    config.build.batch_size = 3;
    config.embedding.provider = "hash".into();
    config.embedding.dims = DIMS;
    config
}

fn write_codebase(root: &Path) {
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(
        root.join("a.py"),
        "def foo():\n    return 1\n\nclass Bar:\n    pass\n",
    )
    .unwrap();
    fs::write(
        root.join("pkg/users.csv"),
        "alice,admin,berlin\nbob,viewer,paris\n",
    )
    .unwrap();
    fs::write(
        root.join("pkg/settings.json"),
        r#"{"timeout": 30, "endpoint": "https://example.invalid/api"}"#,
    )
    .unwrap();
    fs::write(root.join("README.md"), "# not indexed\n").unwrap();
}

fn extensions() -> Vec<String> {
    [".py", ".csv", ".json"].iter().map(|s| s.to_string()).collect()
}

struct Fixture {
    tmp: TempDir,
    store: Arc<SqliteChunkStore>,
    retriever: Retriever,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        write_codebase(&tmp.path().join("code"));
        let config = config(&tmp);
        let store = Arc::new(SqliteChunkStore::open(&config.store.path).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIMS));
        let retriever = Retriever::new(store.clone(), embedder, &config);
        Self {
            tmp,
            store,
            retriever,
        }
    }

    fn root(&self) -> std::path::PathBuf {
        self.tmp.path().join("code")
    }

    fn file(&self, relative: &str) -> String {
        self.root().join(relative).to_string_lossy().to_string()
    }
}

#[tokio::test]
async fn test_function_lookup_by_name() {
    let fx = Fixture::new().await;
    let report = walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    assert_eq!(report.files_parsed, 3);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.chunks_written, 6);

    fx.retriever.build().await.unwrap();

    let hits = fx.retriever.search("foo", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name.as_deref(), Some("foo"));
    assert_eq!(hits[0].kind, ChunkKind::Function);
    assert_eq!(hits[0].file_path, fx.file("a.py"));
    assert_eq!(hits[0].content, "def foo():\n    return 1");
}

#[tokio::test]
async fn test_vector_ids_dense_across_walks() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();

    let mut ids: Vec<i64> = fx
        .store
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.vector_id.unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..12).collect::<Vec<i64>>());
    assert_eq!(fx.store.last_vector_id().await.unwrap(), 11);

    // Same content twice, under distinct ids.
    let chunks = fx.store.get_by_file(&fx.file("a.py")).await.unwrap();
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0].content, chunks[2].content);
    assert_ne!(chunks[0].vector_id, chunks[2].vector_id);
}

#[tokio::test]
async fn test_every_hit_resolves_to_its_stored_chunk() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.retriever.build().await.unwrap();

    for chunk in fx.store.get_all().await.unwrap() {
        let hits = fx.retriever.search(&chunk.content, 1).await.unwrap();
        assert_eq!(hits[0].vector_id, chunk.vector_id.unwrap());
        assert_eq!(hits[0].content, chunk.content);
        assert!(hits[0].distance > 0.99, "self-similarity was {}", hits[0].distance);
    }
}

#[tokio::test]
async fn test_results_bounded_by_k_and_ranked() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.retriever.build().await.unwrap();

    let hits = fx.retriever.search("alice admin berlin", 100).await.unwrap();
    assert_eq!(hits.len(), 6);
    assert!(hits.windows(2).all(|w| w[0].distance >= w[1].distance));
    assert_eq!(hits[0].kind, ChunkKind::CsvRow);
    assert_eq!(hits[0].content, "alice, admin, berlin");
}

#[tokio::test]
async fn test_gaps_and_empty_content_keep_mapping() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.store.delete_by_file(&fx.file("pkg/users.csv")).await.unwrap();

    let next = fx.store.last_vector_id().await.unwrap() + 1;
    let empty = Chunk::flat(ChunkKind::JsonEntry, String::new(), "empty.json").with_vector_id(next);
    fx.store.insert(&empty).await.unwrap();
    let late = Chunk::flat(
        ChunkKind::JsonEntry,
        "retention_days: 90".to_string(),
        "late.json",
    )
    .with_vector_id(next + 1);
    fx.store.insert(&late).await.unwrap();

    let report = fx.retriever.build().await.unwrap();
    assert_eq!(report.chunks_seen, 6);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.vectors_indexed, 5);

    let hits = fx.retriever.search("retention_days 90", 1).await.unwrap();
    assert_eq!(hits[0].vector_id, next + 1);
    assert_eq!(hits[0].file_path, "late.json");
}

#[tokio::test]
async fn test_rebuild_replaces_snapshot() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.retriever.build().await.unwrap();
    assert_eq!(fx.retriever.search("foo", 50).await.unwrap().len(), 6);

    fx.store.delete_by_file(&fx.file("a.py")).await.unwrap();
    fx.retriever.build().await.unwrap();

    let hits = fx.retriever.search("foo", 50).await.unwrap();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().all(|h| h.file_path != fx.file("a.py")));

    let leftovers: Vec<_> = fs::read_dir(fx.tmp.path().join("data"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
}

#[tokio::test]
async fn test_clear_then_search_is_empty() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.retriever.build().await.unwrap();

    assert!(fx.retriever.clear().await.unwrap());
    assert!(!fx.retriever.clear().await.unwrap());
    assert!(fx.retriever.search("foo", 3).await.unwrap().is_empty());
    assert_eq!(fx.store.count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_index_and_store_survive_reopen() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    fx.retriever.build().await.unwrap();
    fx.store.close().await;

    let config = config(&fx.tmp);
    let store = Arc::new(SqliteChunkStore::open(&config.store.path).await.unwrap());
    let retriever = Retriever::new(store.clone(), Arc::new(HashEmbedder::new(DIMS)), &config);

    assert_eq!(store.count().await.unwrap(), 6);
    let hits = retriever.search("class Bar", 1).await.unwrap();
    assert_eq!(hits[0].name.as_deref(), Some("Bar"));
}

fn without_ids(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by_key(|c| c.vector_id);
    chunks
        .into_iter()
        .map(|mut c| {
            c.vector_id = None;
            c
        })
        .collect()
}

#[tokio::test]
async fn test_rewalk_after_delete_all_is_identical() {
    let fx = Fixture::new().await;
    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    let first = fx.store.get_all().await.unwrap();

    assert_eq!(fx.store.delete_all().await.unwrap(), 6);
    assert_eq!(fx.store.last_vector_id().await.unwrap(), -1);

    walk(&fx.root(), &extensions(), fx.store.as_ref()).await.unwrap();
    let second = fx.store.get_all().await.unwrap();

    let mut second_ids: Vec<i64> = second.iter().map(|c| c.vector_id.unwrap()).collect();
    second_ids.sort_unstable();
    assert_eq!(second_ids, (0..6).collect::<Vec<i64>>());
    assert_eq!(without_ids(first), without_ids(second));
}

#[tokio::test]
async fn test_unrelated_query_returns_valid_ranked_hits() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let store = Arc::new(SqliteChunkStore::open(&config.store.path).await.unwrap());
    let retriever = Retriever::new(store.clone(), Arc::new(HashEmbedder::new(DIMS)), &config);

    let topics = [
        "quarterly revenue table",
        "weather station readings",
        "invoice number sequence",
        "shipping address line",
        "customer loyalty points",
        "warehouse stock levels",
        "employee badge color",
        "printer toner status",
        "parking lot capacity",
        "coffee machine schedule",
    ];
    for (id, topic) in topics.iter().enumerate() {
        let chunk = Chunk::flat(ChunkKind::JsonEntry, topic.to_string(), "topics.json")
            .with_vector_id(id as i64);
        store.insert(&chunk).await.unwrap();
    }
    assert_eq!(retriever.build().await.unwrap().vectors_indexed, 10);

    let hits = retriever.search("foo implementation", 3).await.unwrap();
    assert!(!hits.is_empty() && hits.len() <= 3);
    assert!(hits.windows(2).all(|w| w[0].distance >= w[1].distance));
    for hit in &hits {
        let stored = store.get_by_vector_id(hit.vector_id).await.unwrap().unwrap();
        assert_eq!(stored.content, hit.content);
    }
}
