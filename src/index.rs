//! The durable memory index: chunked files in SQLite, keyword search through
//! FTS5 or a substring scan, vector search over caller-supplied embeddings,
//! and snapshot persistence through the host's key-value backend.

use std::{collections::HashSet, sync::Arc};

use {
    anyhow::{Context as _, bail},
    chrono::Utc,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    chunker,
    config::MemoryConfig,
    hash::sha256_hex,
    persist::{self, RestoreOutcome},
    ranking,
    schema::{self, ChunkRow, EmbeddingCacheRow, FileRow, KeywordCapability},
    search::{self, SearchResult},
    store::KvBackend,
    tokenizer::tokenize,
};

/// Candidate pool multiplier for the accelerated keyword path.
const FTS_FETCH_FACTOR: usize = 3;
/// Candidate pool multiplier for hybrid search legs.
const HYBRID_FETCH_FACTOR: usize = 2;
/// Query terms considered by the substring fallback, after deduplication.
const FALLBACK_MAX_TERMS: usize = 12;
/// Minimum candidate pool for the substring fallback.
const FALLBACK_MIN_POOL: usize = 40;

/// Lifecycle of the index. Mutating and searching require `Ready`; a closed
/// index must be re-initialized before reuse.
enum IndexState {
    Uninitialized,
    Ready(IndexInner),
    Closed,
}

#[derive(Clone)]
struct IndexInner {
    pool: SqlitePool,
    capability: KeywordCapability,
}

/// Counts and capability of the live index.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub files: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub cached_embeddings: usize,
    pub capability: KeywordCapability,
}

/// Durable chunk index over markdown memory files.
///
/// Construct once per logical memory space and call [`init`](Self::init)
/// before anything else. All state lives behind an async mutex; concurrent
/// `init` calls coalesce onto the first initialization instead of racing to
/// build two stores.
pub struct MemoryIndex {
    config: MemoryConfig,
    backend: Arc<dyn KvBackend>,
    state: Mutex<IndexState>,
}

impl MemoryIndex {
    pub fn new(config: MemoryConfig, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            config,
            backend,
            state: Mutex::new(IndexState::Uninitialized),
        }
    }

    /// Initialize the index: open the in-memory database, create the schema,
    /// probe the keyword capability once, and restore the persisted snapshot.
    ///
    /// A missing snapshot starts empty; a corrupt or schema-incompatible one
    /// is discarded, replaced with an empty store, and immediately
    /// re-persisted. Only backend I/O failures propagate.
    pub async fn init(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, IndexState::Ready(_)) {
            return Ok(());
        }

        // Single connection: each new connection to ":memory:" would get its
        // own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .context("open in-memory index database")?;
        schema::create_schema(&pool)
            .await
            .context("create index schema")?;

        let capability = if self.config.disable_fts {
            warn!("accelerated full-text search disabled by configuration, using substring scan");
            KeywordCapability::SubstringFallback
        } else {
            schema::probe_fts(&pool).await
        };

        let outcome = persist::restore(&pool, capability, self.backend.as_ref()).await?;
        if outcome == RestoreOutcome::Discarded {
            persist::persist(&pool, self.backend.as_ref()).await?;
        }

        *state = IndexState::Ready(IndexInner { pool, capability });
        Ok(())
    }

    /// Close the index. Further operations fail until `init` is called again.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let IndexState::Ready(inner) = &*state {
            inner.pool.close().await;
        }
        *state = IndexState::Closed;
    }

    async fn inner(&self) -> anyhow::Result<IndexInner> {
        match &*self.state.lock().await {
            IndexState::Ready(inner) => Ok(inner.clone()),
            IndexState::Uninitialized => bail!("memory index is not initialized"),
            IndexState::Closed => bail!("memory index is closed"),
        }
    }

    /// Index `content` under `path`, replacing any previous chunk set.
    ///
    /// A content hash gates the work: re-indexing unchanged content is a
    /// no-op. Pass `persist = false` when bulk-loading many files and issue
    /// one [`persist`](Self::persist) afterwards; the snapshot rewrites the
    /// whole store on every call.
    pub async fn index_file(&self, path: &str, content: &str, persist: bool) -> anyhow::Result<()> {
        let inner = self.inner().await?;
        let hash = sha256_hex(content);

        if let Some(existing) = schema::get_file(&inner.pool, path).await?
            && existing.hash == hash
        {
            debug!(path, "file content unchanged, skipping");
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let chunks = chunker::chunk_text(
            content,
            path,
            self.config.chunk_target_chars,
            self.config.chunk_overlap_chars,
        );

        // Embedding lookups read through the pool, so they run before the
        // transaction below claims the pool's only connection.
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let embedding = cached_embedding_for_hash(&inner.pool, &chunk.hash).await?;
            rows.push(ChunkRow {
                id: chunk.id.clone(),
                path: path.to_string(),
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
                hash: chunk.hash.clone(),
                text: chunk.text.clone(),
                embedding,
                updated_at: now,
            });
        }

        // Delete and re-insert in one transaction so a concurrent search sees
        // either the old chunk set or the new one, never a mix.
        let mut tx = inner
            .pool
            .begin()
            .await
            .context("begin index transaction")?;
        delete_file_rows(&mut tx, inner.capability, path).await?;
        for row in &rows {
            schema::insert_chunk(&mut *tx, row).await?;
            if inner.capability == KeywordCapability::Accelerated {
                schema::insert_fts_row(&mut *tx, row).await?;
            }
        }
        schema::upsert_file(&mut *tx, &FileRow {
            path: path.to_string(),
            hash,
            mtime: now,
            size: content.len() as i64,
        })
        .await?;
        tx.commit().await.context("commit index transaction")?;

        info!(path, chunks = chunks.len(), "indexed file");

        if persist {
            persist::persist(&inner.pool, self.backend.as_ref()).await?;
        }
        Ok(())
    }

    /// Remove a file and all of its chunks and search rows. Always persists.
    pub async fn remove_file(&self, path: &str) -> anyhow::Result<()> {
        let inner = self.inner().await?;
        let mut tx = inner
            .pool
            .begin()
            .await
            .context("begin remove transaction")?;
        delete_file_rows(&mut tx, inner.capability, path).await?;
        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("commit remove transaction")?;
        info!(path, "removed file from index");
        persist::persist(&inner.pool, self.backend.as_ref()).await
    }

    pub async fn has_file(&self, path: &str) -> anyhow::Result<bool> {
        let inner = self.inner().await?;
        Ok(schema::get_file(&inner.pool, path).await?.is_some())
    }

    /// All indexed paths, sorted.
    pub async fn list_files(&self) -> anyhow::Result<Vec<String>> {
        let inner = self.inner().await?;
        let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM files ORDER BY path")
            .fetch_all(&inner.pool)
            .await?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }

    /// Keyword search through whichever strategy initialization selected,
    /// blended with the recency boost. An empty or untokenizable query
    /// returns no results rather than an error.
    pub async fn search_keyword(
        &self,
        query: &str,
        limit: usize,
        source_path: Option<&str>,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let inner = self.inner().await?;
        let tokens = tokenize(query);
        if tokens.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let scored = match inner.capability {
            KeywordCapability::Accelerated => {
                keyword_fts(&inner.pool, &tokens, limit, source_path).await?
            },
            KeywordCapability::SubstringFallback => {
                keyword_scan(&inner.pool, query, tokens, limit, source_path).await?
            },
        };

        let now = Utc::now().timestamp();
        let mut results: Vec<SearchResult> = scored
            .into_iter()
            .map(|(mut result, updated_at)| {
                let boost = ranking::recency_boost(updated_at, now);
                result.score = ranking::blend(f64::from(result.score), boost) as f32;
                result
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Cosine similarity over every chunk carrying an embedding; chunks
    /// without one are skipped, not zero-scored. No recency adjustment.
    pub async fn search_vector(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let inner = self.inner().await?;
        if query_embedding.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let rows: Vec<(String, String, i64, i64, String, Vec<u8>)> = sqlx::query_as(
            "SELECT id, path, start_line, end_line, text, embedding
             FROM chunks WHERE embedding IS NOT NULL",
        )
        .fetch_all(&inner.pool)
        .await?;

        let mut scored: Vec<SearchResult> = rows
            .into_iter()
            .map(|(id, path, start_line, end_line, text, blob)| {
                let embedding = schema::blob_to_vec(&blob);
                SearchResult {
                    chunk_id: id,
                    path,
                    start_line,
                    end_line,
                    score: search::cosine_similarity(query_embedding, &embedding),
                    text,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Hybrid search: keyword always runs; when a query embedding is
    /// supplied the vector leg runs too and the lists merge by weighted
    /// reciprocal rank fusion. Without an embedding this degrades to
    /// keyword-only.
    pub async fn search_hybrid(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let fetch = limit * HYBRID_FETCH_FACTOR;
        let mut keyword = self.search_keyword(query, fetch, None).await?;

        let Some(embedding) = query_embedding.filter(|e| !e.is_empty()) else {
            keyword.truncate(limit);
            return Ok(keyword);
        };

        let vector = self.search_vector(embedding, fetch).await?;
        let mut fused = search::rrf_fuse(
            &keyword,
            &vector,
            self.config.keyword_weight,
            self.config.vector_weight,
            self.config.rrf_k,
        );
        fused.truncate(limit);
        Ok(fused)
    }

    /// Cache an embedding for `text`, keyed by its content hash. Chunks
    /// indexed later with matching text pick the vector up automatically.
    pub async fn cache_embedding(
        &self,
        text: &str,
        embedding: &[f32],
        model: &str,
    ) -> anyhow::Result<()> {
        let inner = self.inner().await?;
        let row = EmbeddingCacheRow {
            hash: sha256_hex(text),
            model: model.to_string(),
            embedding_json: serde_json::to_string(embedding).context("serialize embedding")?,
            created_at: Utc::now().timestamp(),
        };
        schema::upsert_cache_row(&inner.pool, &row).await
    }

    /// Look up a cached embedding by content hash. A malformed row is
    /// skipped with a warning, never an error.
    pub async fn get_cached_embedding(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        let inner = self.inner().await?;
        cached_embedding_for_hash(&inner.pool, &sha256_hex(text)).await
    }

    /// Write the whole store to the backend. Call after a batch of
    /// `index_file(.., persist = false)` mutations.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let inner = self.inner().await?;
        persist::persist(&inner.pool, self.backend.as_ref()).await
    }

    pub async fn status(&self) -> anyhow::Result<IndexStatus> {
        let inner = self.inner().await?;
        let (files,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files")
            .fetch_one(&inner.pool)
            .await?;
        let (chunks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&inner.pool)
            .await?;
        let (embedded,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&inner.pool)
                .await?;
        let (cached,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&inner.pool)
            .await?;
        Ok(IndexStatus {
            files: files as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded as usize,
            cached_embeddings: cached as usize,
            capability: inner.capability,
        })
    }

    #[cfg(test)]
    pub(crate) async fn pool_for_tests(&self) -> SqlitePool {
        match &*self.state.lock().await {
            IndexState::Ready(inner) => inner.pool.clone(),
            _ => panic!("index not ready"),
        }
    }
}

async fn delete_file_rows(
    conn: &mut sqlx::SqliteConnection,
    capability: KeywordCapability,
    path: &str,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM chunks WHERE path = ?")
        .bind(path)
        .execute(&mut *conn)
        .await?;
    if capability == KeywordCapability::Accelerated {
        sqlx::query("DELETE FROM chunks_fts WHERE path = ?")
            .bind(path)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn cached_embedding_for_hash(
    pool: &SqlitePool,
    hash: &str,
) -> anyhow::Result<Option<Vec<f32>>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT embedding FROM embedding_cache WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;
    let Some((json,)) = row else {
        return Ok(None);
    };
    match serde_json::from_str::<Vec<f32>>(&json) {
        Ok(embedding) => Ok(Some(embedding)),
        Err(e) => {
            warn!(hash, error = %e, "malformed embedding cache row, skipping");
            Ok(None)
        },
    }
}

/// Accelerated keyword path: OR-joined prefix terms against the FTS table.
/// Returns raw relevance paired with each chunk's update time; the caller
/// applies recency blending and final ordering.
async fn keyword_fts(
    pool: &SqlitePool,
    tokens: &[String],
    limit: usize,
    source_path: Option<&str>,
) -> anyhow::Result<Vec<(SearchResult, i64)>> {
    let match_expr = tokens
        .iter()
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let fetch = (limit * FTS_FETCH_FACTOR) as i64;

    let rows: Vec<(String, String, i64, i64, String, i64, f64)> = if let Some(path) = source_path {
        sqlx::query_as(
            "SELECT c.id, c.path, c.start_line, c.end_line, c.text, c.updated_at, chunks_fts.rank
             FROM chunks_fts JOIN chunks c ON c.id = chunks_fts.id
             WHERE chunks_fts MATCH ? AND c.path = ?
             ORDER BY chunks_fts.rank LIMIT ?",
        )
        .bind(&match_expr)
        .bind(path)
        .bind(fetch)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as(
            "SELECT c.id, c.path, c.start_line, c.end_line, c.text, c.updated_at, chunks_fts.rank
             FROM chunks_fts JOIN chunks c ON c.id = chunks_fts.id
             WHERE chunks_fts MATCH ?
             ORDER BY chunks_fts.rank LIMIT ?",
        )
        .bind(&match_expr)
        .bind(fetch)
        .fetch_all(pool)
        .await?
    };

    Ok(rows
        .into_iter()
        .map(|(id, path, start_line, end_line, text, updated_at, rank)| {
            // FTS5 rank is more negative for better matches; the logistic
            // transform maps it into (0, 1).
            let relevance = 1.0 / (1.0 + rank.exp());
            (
                SearchResult {
                    chunk_id: id,
                    path,
                    start_line,
                    end_line,
                    score: relevance as f32,
                    text,
                },
                updated_at,
            )
        })
        .collect())
}

/// Substring fallback: case-insensitive LIKE over chunk text for up to
/// [`FALLBACK_MAX_TERMS`] deduplicated terms, scored by term coverage with
/// a bonus when the full query appears verbatim.
async fn keyword_scan(
    pool: &SqlitePool,
    query: &str,
    mut tokens: Vec<String>,
    limit: usize,
    source_path: Option<&str>,
) -> anyhow::Result<Vec<(SearchResult, i64)>> {
    let mut seen = HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    tokens.truncate(FALLBACK_MAX_TERMS);

    let pool_cap = (limit * 8).max(FALLBACK_MIN_POOL);

    // LIKE is only case-insensitive for ASCII, so a non-ASCII term would
    // silently become case-sensitive at the SQL layer. Any such term disables
    // the SQL pre-filter; the Unicode-aware check below then does all the
    // matching over the full candidate set.
    let prefilter = tokens.iter().all(|t| t.is_ascii());

    let mut sql =
        String::from("SELECT id, path, start_line, end_line, text, updated_at FROM chunks");
    if prefilter {
        sql.push_str(" WHERE (");
        for i in 0..tokens.len() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str("text LIKE ? ESCAPE '\\'");
        }
        sql.push(')');
        if source_path.is_some() {
            sql.push_str(" AND path = ?");
        }
        sql.push_str(" LIMIT ?");
    } else if source_path.is_some() {
        sql.push_str(" WHERE path = ?");
    }

    let mut query_builder = sqlx::query_as::<_, (String, String, i64, i64, String, i64)>(&sql);
    if prefilter {
        for token in &tokens {
            query_builder = query_builder.bind(format!("%{}%", escape_like(token)));
        }
    }
    if let Some(path) = source_path {
        query_builder = query_builder.bind(path.to_string());
    }
    if prefilter {
        query_builder = query_builder.bind(pool_cap as i64);
    }
    let rows = query_builder.fetch_all(pool).await?;

    let query_lower = query.trim().to_lowercase();
    let term_count = tokens.len() as f64;

    let mut candidates: Vec<(SearchResult, i64)> = rows
        .into_iter()
        .filter_map(|(id, path, start_line, end_line, text, updated_at)| {
            let lower = text.to_lowercase();
            let hits = tokens.iter().filter(|t| lower.contains(t.as_str())).count() as f64;
            if hits == 0.0 {
                return None;
            }
            let exact_bonus = if !query_lower.is_empty() && lower.contains(&query_lower) {
                1.0
            } else {
                0.0
            };
            let relevance = (hits + exact_bonus) / (term_count + 1.0);
            Some((
                SearchResult {
                    chunk_id: id,
                    path,
                    start_line,
                    end_line,
                    score: relevance as f32,
                    text,
                },
                updated_at,
            ))
        })
        .collect();
    candidates.truncate(pool_cap);
    Ok(candidates)
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
