//! SQLite-backed retrieval backends.
//!
//! [`SqliteChunkStore`] implements both [`VectorBackend`] (brute-force
//! cosine over `chunk_vectors`) and [`LexicalBackend`] (FTS5 BM25 over
//! content, summary, and keywords). Scope filters are applied in SQL so
//! out-of-scope chunks never leave the database.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docqa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docqa_core::models::{Chunk, ChunkMatch, SearchScope};
use docqa_core::store::{LexicalBackend, VectorBackend};

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.owner_id, c.chunk_index, c.content, c.page, \
     c.section, c.ai_summary, c.keywords_json, c.semantic_category";

pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace chunks, their FTS rows, and any attached vectors.
    ///
    /// Runs in one transaction. Chunks without an embedding keep no vector
    /// row (a stale one is removed) and are reachable only lexically.
    pub async fn upsert_chunks(&self, chunks: &[Chunk], model: &str) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let hash = format!("{:x}", Sha256::digest(chunk.content.as_bytes()));
            let keywords_json = chunk
                .keywords
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, owner_id, chunk_index, content, page,
                                    section, ai_summary, keywords_json, semantic_category,
                                    hash, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    owner_id = excluded.owner_id,
                    chunk_index = excluded.chunk_index,
                    content = excluded.content,
                    page = excluded.page,
                    section = excluded.section,
                    ai_summary = excluded.ai_summary,
                    keywords_json = excluded.keywords_json,
                    semantic_category = excluded.semantic_category,
                    hash = excluded.hash,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.owner_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.page)
            .bind(&chunk.section)
            .bind(&chunk.ai_summary)
            .bind(&keywords_json)
            .bind(&chunk.semantic_category)
            .bind(&hash)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, document_id, owner_id, content, ai_summary, keywords) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.owner_id)
            .bind(&chunk.content)
            .bind(chunk.ai_summary.as_deref().unwrap_or(""))
            .bind(chunk.keywords.as_ref().map(|k| k.join(" ")).unwrap_or_default())
            .execute(&mut *tx)
            .await?;

            match &chunk.embedding {
                Some(vector) => {
                    sqlx::query(
                        r#"
                        INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding)
                        VALUES (?, ?, ?, ?, ?)
                        ON CONFLICT(chunk_id) DO UPDATE SET
                            document_id = excluded.document_id,
                            model = excluded.model,
                            dims = excluded.dims,
                            embedding = excluded.embedding
                        "#,
                    )
                    .bind(&chunk.id)
                    .bind(&chunk.document_id)
                    .bind(model)
                    .bind(vector.len() as i64)
                    .bind(vec_to_blob(vector))
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                        .bind(&chunk.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    /// Number of stored chunks and of chunks with a vector.
    pub async fn counts(&self) -> Result<(i64, i64)> {
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok((chunks, vectors))
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let keywords_json: Option<String> = row.get("keywords_json");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        owner_id: row.get("owner_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        page: row.get("page"),
        section: row.get("section"),
        embedding: None,
        ai_summary: row.get("ai_summary"),
        keywords: keywords_json.and_then(|k| serde_json::from_str(&k).ok()),
        semantic_category: row.get("semantic_category"),
    }
}

/// Build an FTS5 MATCH expression: each term quoted, joined with OR.
///
/// Quoting neutralizes FTS5 operators inside user text. Returns `None`
/// when nothing searchable remains.
pub fn fts_query(terms: &[String]) -> Option<String> {
    let quoted: Vec<String> = terms
        .iter()
        .map(|t| t.replace('"', " ").trim().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

#[async_trait]
impl VectorBackend for SqliteChunkStore {
    async fn vector_search(
        &self,
        query_vec: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ChunkMatch>> {
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE (? IS NULL OR c.document_id = ?)
              AND (? IS NULL OR c.owner_id = ?)
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.document_id)
            .bind(&scope.document_id)
            .bind(&scope.owner_id)
            .bind(&scope.owner_id)
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                (score >= threshold).then(|| ChunkMatch {
                    chunk: row_to_chunk(row),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl LexicalBackend for SqliteChunkStore {
    async fn lexical_search(
        &self,
        terms: &[String],
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let Some(expr) = fts_query(terms) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}, chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR c.document_id = ?)
              AND (? IS NULL OR c.owner_id = ?)
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&expr)
            .bind(&scope.document_id)
            .bind(&scope.document_id)
            .bind(&scope.owner_id)
            .bind(&scope.owner_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkMatch {
                    chunk: row_to_chunk(row),
                    score: -rank,
                }
            })
            .collect())
    }
}
