use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Source-document registry: one row per uploaded document. Raw bytes are
    // retained so a temporal override can re-run the pipeline without the
    // external blob store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            kind TEXT NOT NULL,
            raw BLOB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            temporal_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The search index: one row per chunk, with an absolute expiry fixed at
    // insert time. Every search predicate includes expires_at > now.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            chunk_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB,
            locator_json TEXT NOT NULL,
            temporal_json TEXT,
            content_hash TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Content-hash keyed embedding cache, expiring on the index horizon.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            content_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (content_hash, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over record content.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE records_fts USING fts5(
                chunk_id UNINDEXED,
                owner_id UNINDEXED,
                source_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_expires ON records(expires_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_owner ON sources(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}
