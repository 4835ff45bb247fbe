//! Row types, table creation, and row-level persistence helpers for the
//! durable index. The SQLite database itself is in-memory; durability comes
//! from the snapshot blob (see [`crate::persist`]).

use {
    serde::{Deserialize, Serialize},
    sqlx::SqlitePool,
    tracing::warn,
};

use crate::tokenizer::tokenize;

/// Keyword search strategy, decided once while the index initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordCapability {
    /// FTS5 virtual table with prefix matching.
    Accelerated,
    /// Case-insensitive substring scan over chunk text.
    SubstringFallback,
}

/// A tracked file row. `hash` is the freshness gate: indexing content with
/// an unchanged hash is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub path: String,
    pub hash: String,
    pub mtime: i64,
    pub size: i64,
}

/// A chunk row. `embedding` is present only once a caller has supplied a
/// vector for this chunk's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub id: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub hash: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: i64,
}

/// An embedding-cache row. Keyed by content hash; the model name travels
/// alongside the payload, not in the key, so cross-model hits are possible
/// and callers must treat them as a known limitation. The payload stays a
/// raw JSON string so a malformed row can be skipped at read time instead
/// of failing the whole cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheRow {
    pub hash: String,
    pub model: String,
    pub embedding_json: String,
    pub created_at: i64,
}

/// Serialize a vector to a BLOB of little-endian f32 bytes.
pub(crate) fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB of little-endian f32 bytes.
pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Create the base tables.
pub async fn create_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in [
        "CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            size INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            hash TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)",
        "CREATE TABLE IF NOT EXISTS embedding_cache (
            hash TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            embedding TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Probe for FTS5 by creating the search table. Runs exactly once per
/// initialization; the outcome is cached on the index, never re-probed per
/// call.
pub async fn probe_fts(pool: &SqlitePool) -> KeywordCapability {
    let created = sqlx::query(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
         USING fts5(text, id UNINDEXED, path UNINDEXED)",
    )
    .execute(pool)
    .await;

    match created {
        Ok(_) => KeywordCapability::Accelerated,
        Err(e) => {
            warn!(error = %e, "FTS5 unavailable, keyword search degrades to substring scan");
            KeywordCapability::SubstringFallback
        },
    }
}

pub async fn upsert_file<'e, E>(executor: E, file: &FileRow) -> anyhow::Result<()>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO files (path, hash, mtime, size) VALUES (?, ?, ?, ?)
         ON CONFLICT(path) DO UPDATE SET hash=excluded.hash, mtime=excluded.mtime, size=excluded.size",
    )
    .bind(&file.path)
    .bind(&file.hash)
    .bind(file.mtime)
    .bind(file.size)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_file(pool: &SqlitePool, path: &str) -> anyhow::Result<Option<FileRow>> {
    let row: Option<(String, String, i64, i64)> =
        sqlx::query_as("SELECT path, hash, mtime, size FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(path, hash, mtime, size)| FileRow {
        path,
        hash,
        mtime,
        size,
    }))
}

pub async fn insert_chunk<'e, E>(executor: E, chunk: &ChunkRow) -> anyhow::Result<()>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let blob = chunk.embedding.as_deref().map(vec_to_blob);
    sqlx::query(
        "INSERT INTO chunks (id, path, start_line, end_line, hash, text, embedding, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           path=excluded.path, start_line=excluded.start_line, end_line=excluded.end_line,
           hash=excluded.hash, text=excluded.text, embedding=excluded.embedding,
           updated_at=excluded.updated_at",
    )
    .bind(&chunk.id)
    .bind(&chunk.path)
    .bind(chunk.start_line)
    .bind(chunk.end_line)
    .bind(&chunk.hash)
    .bind(&chunk.text)
    .bind(blob)
    .bind(chunk.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Insert the FTS row for a chunk. The indexed column holds the tokenized
/// text so the index and the query builder segment identically.
pub async fn insert_fts_row<'e, E>(executor: E, chunk: &ChunkRow) -> anyhow::Result<()>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query("INSERT INTO chunks_fts (text, id, path) VALUES (?, ?, ?)")
        .bind(tokenize(&chunk.text).join(" "))
        .bind(&chunk.id)
        .bind(&chunk.path)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn upsert_cache_row(pool: &SqlitePool, row: &EmbeddingCacheRow) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO embedding_cache (hash, model, embedding, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(hash) DO UPDATE SET
           model=excluded.model, embedding=excluded.embedding, created_at=excluded.created_at",
    )
    .bind(&row.hash)
    .bind(&row.model)
    .bind(&row.embedding_json)
    .bind(row.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn all_files(pool: &SqlitePool) -> anyhow::Result<Vec<FileRow>> {
    let rows: Vec<(String, String, i64, i64)> =
        sqlx::query_as("SELECT path, hash, mtime, size FROM files ORDER BY path")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(path, hash, mtime, size)| FileRow {
            path,
            hash,
            mtime,
            size,
        })
        .collect())
}

pub async fn all_chunks(pool: &SqlitePool) -> anyhow::Result<Vec<ChunkRow>> {
    let rows: Vec<(String, String, i64, i64, String, String, Option<Vec<u8>>, i64)> =
        sqlx::query_as(
            "SELECT id, path, start_line, end_line, hash, text, embedding, updated_at
             FROM chunks ORDER BY path, start_line",
        )
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(
            |(id, path, start_line, end_line, hash, text, embedding, updated_at)| ChunkRow {
                id,
                path,
                start_line,
                end_line,
                hash,
                text,
                embedding: embedding.as_deref().map(blob_to_vec),
                updated_at,
            },
        )
        .collect())
}

pub async fn all_cache_rows(pool: &SqlitePool) -> anyhow::Result<Vec<EmbeddingCacheRow>> {
    let rows: Vec<(String, String, String, i64)> =
        sqlx::query_as("SELECT hash, model, embedding, created_at FROM embedding_cache")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(hash, model, embedding_json, created_at)| EmbeddingCacheRow {
            hash,
            model,
            embedding_json,
            created_at,
        })
        .collect())
}
