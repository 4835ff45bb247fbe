//! Whole-blob persistence: the entire durable index serializes to one
//! versioned snapshot, written under a fixed key through the host's
//! [`KvBackend`](crate::store::KvBackend).
//!
//! Persistence is deliberately not incremental. Batch call sites suppress
//! per-mutation persistence and issue one terminal
//! [`MemoryIndex::persist`](crate::index::MemoryIndex::persist) to avoid
//! rewriting the blob once per file.

use {
    anyhow::Context as _,
    serde::{Deserialize, Serialize},
    sqlx::SqlitePool,
    tracing::{info, warn},
};

use crate::{
    schema::{
        self, ChunkRow, EmbeddingCacheRow, FileRow, KeywordCapability, insert_chunk,
        insert_fts_row, upsert_cache_row, upsert_file,
    },
    store::KvBackend,
};

/// Store name the snapshot lives under in the backend.
pub const STORE_NAME: &str = "memory";
/// Key of the snapshot blob.
pub const SNAPSHOT_KEY: &str = "index-snapshot-v1";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    files: Vec<FileRow>,
    chunks: Vec<ChunkRow>,
    cache: Vec<EmbeddingCacheRow>,
}

/// Outcome of attempting to restore the persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A snapshot existed and was loaded.
    Restored,
    /// No snapshot existed; the store starts empty.
    Fresh,
    /// A snapshot existed but was corrupt or schema-incompatible. It was
    /// discarded; the caller must immediately re-persist the empty store.
    Discarded,
}

/// Serialize the whole store and write it to the backend.
pub async fn persist(pool: &SqlitePool, backend: &dyn KvBackend) -> anyhow::Result<()> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        files: schema::all_files(pool).await?,
        chunks: schema::all_chunks(pool).await?,
        cache: schema::all_cache_rows(pool).await?,
    };
    let blob = serde_json::to_vec(&snapshot).context("serialize index snapshot")?;
    backend
        .set(STORE_NAME, SNAPSHOT_KEY, &blob)
        .await
        .context("write index snapshot")?;
    Ok(())
}

/// Read the snapshot blob and load it into `pool`.
///
/// An unreadable backend is a propagated error; an absent, corrupt, or
/// incompatible snapshot is not — those degrade to an empty store, losing
/// the persisted index rather than failing initialization.
pub async fn restore(
    pool: &SqlitePool,
    capability: KeywordCapability,
    backend: &dyn KvBackend,
) -> anyhow::Result<RestoreOutcome> {
    let blob = backend
        .get(STORE_NAME, SNAPSHOT_KEY)
        .await
        .context("read index snapshot")?;
    let Some(blob) = blob else {
        return Ok(RestoreOutcome::Fresh);
    };

    let snapshot: Snapshot = match serde_json::from_slice(&blob) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "persisted index snapshot is corrupt, rebuilding empty store");
            return Ok(RestoreOutcome::Discarded);
        },
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "persisted index snapshot has incompatible schema, rebuilding empty store"
        );
        return Ok(RestoreOutcome::Discarded);
    }

    for file in &snapshot.files {
        upsert_file(pool, file).await?;
    }
    for chunk in &snapshot.chunks {
        insert_chunk(pool, chunk).await?;
        if capability == KeywordCapability::Accelerated {
            insert_fts_row(pool, chunk).await?;
        }
    }
    for row in &snapshot.cache {
        upsert_cache_row(pool, row).await?;
    }

    info!(
        files = snapshot.files.len(),
        chunks = snapshot.chunks.len(),
        "restored index snapshot"
    );
    Ok(RestoreOutcome::Restored)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{schema::create_schema, store::MemoryKv},
    };

    async fn setup() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_restore_missing_blob_is_fresh() {
        let pool = setup().await;
        let kv = MemoryKv::new();
        let outcome = restore(&pool, KeywordCapability::SubstringFallback, &kv)
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Fresh);
    }

    #[tokio::test]
    async fn test_restore_corrupt_blob_is_discarded() {
        let pool = setup().await;
        let kv = MemoryKv::new();
        kv.set(STORE_NAME, SNAPSHOT_KEY, b"definitely not json")
            .await
            .unwrap();

        let outcome = restore(&pool, KeywordCapability::SubstringFallback, &kv)
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Discarded);
        assert!(schema::all_files(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_incompatible_version_is_discarded() {
        let pool = setup().await;
        let kv = MemoryKv::new();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION + 1,
            files: vec![],
            chunks: vec![],
            cache: vec![],
        };
        kv.set(
            STORE_NAME,
            SNAPSHOT_KEY,
            &serde_json::to_vec(&snapshot).unwrap(),
        )
        .await
        .unwrap();

        let outcome = restore(&pool, KeywordCapability::SubstringFallback, &kv)
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_persist_restore_roundtrip() {
        let pool = setup().await;
        upsert_file(&pool, &FileRow {
            path: "a.md".into(),
            hash: "h".into(),
            mtime: 1,
            size: 2,
        })
        .await
        .unwrap();
        insert_chunk(&pool, &ChunkRow {
            id: "c1".into(),
            path: "a.md".into(),
            start_line: 1,
            end_line: 1,
            hash: "ch".into(),
            text: "hello world".into(),
            embedding: Some(vec![1.0, 0.0]),
            updated_at: 7,
        })
        .await
        .unwrap();

        let kv = MemoryKv::new();
        persist(&pool, &kv).await.unwrap();

        let fresh = setup().await;
        let outcome = restore(&fresh, KeywordCapability::SubstringFallback, &kv)
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);

        let chunks = schema::all_chunks(&fresh).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].embedding.as_deref(), Some(&[1.0f32, 0.0][..]));
    }
}
