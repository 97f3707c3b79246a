//! Chunk store schema.
//!
//! Two tables: `chunk_blobs` holds content addressed by its SHA-256 hex
//! digest, `chunks` holds one metadata row per chunk keyed by vector id.
//! Every statement is idempotent, so migrations run on each open.

use sqlx::SqlitePool;

use crate::error::StoreError;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_blobs (
            digest TEXT PRIMARY KEY,
            content TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            vector_id INTEGER PRIMARY KEY,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT,
            start_row INTEGER,
            start_column INTEGER,
            end_row INTEGER,
            end_column INTEGER,
            hash INTEGER NOT NULL,
            blob_digest TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (blob_digest) REFERENCES chunk_blobs(digest)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_blob_digest ON chunks(blob_digest)")
        .execute(pool)
        .await?;

    Ok(())
}
