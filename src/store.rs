//! Persistent local vector index backed by SQLite.
//!
//! Chunks are upserted by their deterministic id, so repeated ingestion of
//! unchanged content is a no-op at the storage layer. Similarity search
//! ranks by cosine similarity against the stored embedding BLOBs.
//!
//! The snapshot/restore pair backs the ingest pipeline's transactional
//! guarantee: a snapshot captures only the rows about to be touched (cost
//! proportional to the delta, not the index), and restore puts exactly
//! those rows back. Transactions are serialized by the store's single
//! lock — the only global lock in the system — because rollback
//! correctness depends on no concurrent mutation while one is open.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::DocumentChunk;

/// Vector store over the `chunks` table.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    tx_lock: Arc<Mutex<()>>,
}

/// Point-in-time copy of the rows a batch is about to touch.
#[derive(Debug)]
pub struct Snapshot {
    /// Rows that existed before the batch, keyed set for restore.
    prior: Vec<DocumentChunk>,
    /// Ids in the batch that did not exist before (deleted on restore).
    fresh: Vec<String>,
}

/// An open upsert transaction. Exactly one can exist at a time; commit or
/// roll back explicitly — dropping without either leaves the written rows
/// in place but releases the lock.
pub struct VectorStoreTransaction {
    store: VectorStore,
    snapshot: Snapshot,
    _guard: OwnedMutexGuard<()>,
}

impl VectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-replace a batch of chunks.
    pub async fn add(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, chunk_index, url, title, license, language,
                                    crawled_at, content_hash, score, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    chunk_index = excluded.chunk_index,
                    url = excluded.url,
                    title = excluded.title,
                    license = excluded.license,
                    language = excluded.language,
                    crawled_at = excluded.crawled_at,
                    content_hash = excluded.content_hash,
                    score = excluded.score,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.url)
            .bind(&chunk.title)
            .bind(&chunk.license)
            .bind(&chunk.language)
            .bind(chunk.crawled_at.timestamp())
            .bind(&chunk.content_hash)
            .bind(chunk.score)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Rank all stored chunks by cosine similarity to `query_embedding`.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>> {
        let rows = sqlx::query("SELECT * FROM chunks").fetch_all(&self.pool).await?;

        let mut ranked: Vec<(DocumentChunk, f32)> = rows
            .iter()
            .map(row_to_chunk)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|chunk| {
                let sim = cosine_similarity(query_embedding, &chunk.embedding);
                (chunk, sim)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_by_hash(&self, content_hash: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// True iff any chunk of this content hash is already stored.
    pub async fn has_content(&self, content_hash: &str) -> Result<bool> {
        Ok(self.count_by_hash(content_hash).await? > 0)
    }

    /// Capture the current state of the rows identified by `chunk_ids`.
    pub async fn snapshot(&self, chunk_ids: &[String]) -> Result<Snapshot> {
        let mut prior = Vec::new();
        let mut fresh = Vec::new();
        for id in chunk_ids {
            let row = sqlx::query("SELECT * FROM chunks WHERE chunk_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(row) => prior.push(row_to_chunk(&row)?),
                None => fresh.push(id.clone()),
            }
        }
        Ok(Snapshot { prior, fresh })
    }

    /// Put the rows captured by `snapshot` back exactly as they were.
    pub async fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in &snapshot.fresh {
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.add(&snapshot.prior).await?;
        Ok(())
    }

    /// Open a transaction covering `chunk_ids`. Blocks until any other
    /// open transaction finishes.
    pub async fn begin(&self, chunk_ids: &[String]) -> Result<VectorStoreTransaction> {
        let guard = self.tx_lock.clone().lock_owned().await;
        let snapshot = self.snapshot(chunk_ids).await?;
        Ok(VectorStoreTransaction {
            store: self.clone(),
            snapshot,
            _guard: guard,
        })
    }

    /// Drop the oldest rows beyond `retention_limit` (0 = unbounded) and
    /// let SQLite refresh its query planner statistics.
    pub async fn reindex(&self, retention_limit: u64) -> Result<u64> {
        let mut dropped = 0u64;
        if retention_limit > 0 {
            let result = sqlx::query(
                r#"
                DELETE FROM chunks WHERE chunk_id NOT IN (
                    SELECT chunk_id FROM chunks ORDER BY crawled_at DESC LIMIT ?
                )
                "#,
            )
            .bind(retention_limit as i64)
            .execute(&self.pool)
            .await?;
            dropped = result.rows_affected();
        }
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        Ok(dropped)
    }
}

impl VectorStoreTransaction {
    /// Upsert a batch within the transaction's scope.
    pub async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<()> {
        self.store.add(chunks).await
    }

    /// Keep the written rows.
    pub fn commit(self) {}

    /// Restore the pre-transaction rows.
    pub async fn rollback(self) -> Result<()> {
        self.store.restore(&self.snapshot).await
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentChunk> {
    let crawled_ts: i64 = row.get("crawled_at");
    let crawled_at: DateTime<Utc> = DateTime::from_timestamp(crawled_ts, 0)
        .unwrap_or_else(Utc::now);
    let blob: Vec<u8> = row.get("embedding");
    Ok(DocumentChunk {
        chunk_id: row.get("chunk_id"),
        chunk_index: row.get("chunk_index"),
        url: row.get("url"),
        title: row.get("title"),
        license: row.get("license"),
        language: row.get("language"),
        crawled_at,
        content_hash: row.get("content_hash"),
        score: row.get("score"),
        text: row.get("text"),
        embedding: blob_to_vec(&blob),
    })
}
