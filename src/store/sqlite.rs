use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{require_vector_id, ChunkBatches, ChunkStore};
use crate::db;
use crate::error::StoreError;
use crate::migrate;
use crate::models::{content_digest, Chunk, ChunkKind, Point};

const SELECT_CHUNK: &str = r#"
    SELECT c.vector_id, c.file_path, c.kind, c.name,
           c.start_row, c.start_column, c.end_row, c.end_column,
           c.hash, b.content
    FROM chunks c
    JOIN chunk_blobs b ON b.digest = c.blob_digest
"#;

/// SQLite-backed chunk store.
///
/// Content lives in `chunk_blobs`, addressed by SHA-256 digest, so files
/// with repeated definitions store each distinct body once. Metadata rows in
/// `chunks` reference their blob; deletes remove orphaned blobs in the same
/// transaction.
#[derive(Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    /// Open the database at `path`, creating it and its schema if missing.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn point(row: Option<i64>, column: Option<i64>) -> Option<Point> {
    match (row, column) {
        (Some(r), Some(c)) => Some(Point::new(r as usize, c as usize)),
        _ => None,
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let kind: String = row.try_get("kind")?;
    let kind: ChunkKind = kind.parse().map_err(StoreError::Corrupt)?;

    Ok(Chunk {
        kind,
        content: row.try_get("content")?,
        file_path: row.try_get("file_path")?,
        start_point: point(row.try_get("start_row")?, row.try_get("start_column")?),
        end_point: point(row.try_get("end_row")?, row.try_get("end_column")?),
        name: row.try_get("name")?,
        hash: row.try_get("hash")?,
        vector_id: Some(row.try_get("vector_id")?),
    })
}

fn rows_to_chunks(rows: &[SqliteRow]) -> Result<Vec<Chunk>, StoreError> {
    rows.iter().map(row_to_chunk).collect()
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn insert(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let vector_id = require_vector_id(chunk)?;
        let digest = content_digest(&chunk.content);

        let mut tx = self.pool.begin().await?;

        let taken: Option<i64> = sqlx::query_scalar("SELECT vector_id FROM chunks WHERE vector_id = ?")
            .bind(vector_id)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(StoreError::Conflict(vector_id));
        }

        sqlx::query(
            "INSERT INTO chunk_blobs (digest, content) VALUES (?, ?) ON CONFLICT(digest) DO NOTHING",
        )
        .bind(&digest)
        .bind(&chunk.content)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (vector_id, file_path, kind, name, start_row, start_column,
                                end_row, end_column, hash, blob_digest, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(vector_id)
        .bind(&chunk.file_path)
        .bind(chunk.kind.as_str())
        .bind(&chunk.name)
        .bind(chunk.start_point.map(|p| p.row as i64))
        .bind(chunk.start_point.map(|p| p.column as i64))
        .bind(chunk.end_point.map(|p| p.row as i64))
        .bind(chunk.end_point.map(|p| p.column as i64))
        .bind(chunk.hash)
        .bind(&digest)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_CHUNK} WHERE c.file_path = ? ORDER BY c.vector_id ASC"
        ))
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;
        rows_to_chunks(&rows)
    }

    async fn get_by_vector_id(&self, vector_id: i64) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_CHUNK} WHERE c.vector_id = ?"))
            .bind(vector_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn fetch_page(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_CHUNK} WHERE c.vector_id > ? ORDER BY c.vector_id ASC LIMIT ?"
        ))
        .bind(after.unwrap_or(i64::MIN))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows_to_chunks(&rows)
    }

    fn get_all_batched(&self, batch_size: usize) -> Result<ChunkBatches<'_>, StoreError> {
        ChunkBatches::new(self, batch_size)
    }

    async fn get_all(&self) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(SELECT_CHUNK).fetch_all(&self.pool).await?;
        rows_to_chunks(&rows)
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "DELETE FROM chunk_blobs WHERE digest NOT IN (SELECT blob_digest FROM chunks)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunks")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM chunk_blobs")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn last_vector_id(&self) -> Result<i64, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(vector_id) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(-1))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::chunk;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteChunkStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteChunkStore::open(&tmp.path().join("db/chunks.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    async fn blob_count(store: &SqliteChunkStore) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_blobs")
            .fetch_one(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let (_tmp, store) = open_temp().await;
        let original = chunk("src/a.py", "def a():\n    return 1", 0);
        store.insert(&original).await.unwrap();

        let got = store.get_by_vector_id(0).await.unwrap().unwrap();
        assert_eq!(got, original);

        let mut flat = Chunk::flat(ChunkKind::JsonEntry, "k: v".to_string(), "c.json");
        flat = flat.with_vector_id(1);
        store.insert(&flat).await.unwrap();
        assert_eq!(store.get_by_vector_id(1).await.unwrap().unwrap(), flat);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (_tmp, store) = open_temp().await;
        assert_eq!(store.last_vector_id().await.unwrap(), -1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get_by_vector_id(0).await.unwrap().is_none());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_requires_vector_id() {
        let (_tmp, store) = open_temp().await;
        let c = Chunk::flat(ChunkKind::CsvRow, "a, b".to_string(), "t.csv");
        let err = store.insert(&c).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidChunk(_)));
    }

    #[tokio::test]
    async fn test_duplicate_vector_id_conflicts() {
        let (_tmp, store) = open_temp().await;
        store.insert(&chunk("a.py", "one", 5)).await.unwrap();
        let err = store.insert(&chunk("b.py", "two", 5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(5)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identical_content_shares_blob() {
        let (_tmp, store) = open_temp().await;
        store.insert(&chunk("a.py", "pass", 0)).await.unwrap();
        store.insert(&chunk("b.py", "pass", 1)).await.unwrap();
        store.insert(&chunk("b.py", "other", 2)).await.unwrap();
        assert_eq!(blob_count(&store).await, 2);

        // The shared blob survives while b.py still references it.
        assert_eq!(store.delete_by_file("a.py").await.unwrap(), 1);
        assert_eq!(blob_count(&store).await, 2);
        assert_eq!(
            store.get_by_vector_id(1).await.unwrap().unwrap().content,
            "pass"
        );

        assert_eq!(store.delete_by_file("b.py").await.unwrap(), 2);
        assert_eq!(blob_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_delete_by_file_idempotent() {
        let (_tmp, store) = open_temp().await;
        store.insert(&chunk("a.py", "x", 0)).await.unwrap();
        assert_eq!(store.delete_by_file("a.py").await.unwrap(), 1);
        assert_eq!(store.delete_by_file("a.py").await.unwrap(), 0);
        assert_eq!(store.delete_by_file("never.py").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_by_file_sorted() {
        let (_tmp, store) = open_temp().await;
        store.insert(&chunk("a.py", "second", 3)).await.unwrap();
        store.insert(&chunk("b.py", "other", 2)).await.unwrap();
        store.insert(&chunk("a.py", "first", 1)).await.unwrap();

        let chunks = store.get_by_file("a.py").await.unwrap();
        let ids: Vec<_> = chunks.iter().filter_map(|c| c.vector_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.last_vector_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batched_with_gaps() {
        let (_tmp, store) = open_temp().await;
        for id in [0, 1, 5, 6, 9] {
            store.insert(&chunk("a.py", &format!("c{id}"), id)).await.unwrap();
        }

        let mut batches = store.get_all_batched(2).unwrap();
        let mut seen = Vec::new();
        while let Some(batch) = batches.next_batch().await.unwrap() {
            assert!(batch.len() <= 2);
            seen.extend(batch.iter().filter_map(|c| c.vector_id));
        }
        assert_eq!(seen, vec![0, 1, 5, 6, 9]);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (_tmp, store) = open_temp().await;
        for id in 0..3 {
            store.insert(&chunk("a.py", &format!("c{id}"), id)).await.unwrap();
        }
        assert_eq!(store.delete_all().await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(blob_count(&store).await, 0);
        assert_eq!(store.last_vector_id().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chunks.sqlite");
        {
            let store = SqliteChunkStore::open(&path).await.unwrap();
            store.insert(&chunk("a.py", "kept", 0)).await.unwrap();
            store.close().await;
        }
        let store = SqliteChunkStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.last_vector_id().await.unwrap(), 0);
    }
}
