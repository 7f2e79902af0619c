use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk table: the vector store's only table of record. chunk_id is
    // derived from (content_hash, chunk_index), so re-ingestion upserts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            chunk_index INTEGER NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            license TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'unknown',
            crawled_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            score REAL NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Conditional-request state per URL, for If-None-Match/If-Modified-Since.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_cache (
            url TEXT PRIMARY KEY,
            etag TEXT,
            last_modified TEXT,
            content_hash TEXT,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_crawled_at ON chunks(crawled_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_url ON chunks(url)")
        .execute(pool)
        .await?;

    Ok(())
}
