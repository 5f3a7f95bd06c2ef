//! Index writes: batched inserts, supersede-by-id, deletion, and expiry.
//!
//! Every record gets an absolute `expires_at` fixed at insert time from the
//! configured TTL; readers enforce it with `expires_at > now` predicates and
//! [`purge_expired`] reclaims the rows. Chunk ids are deterministic per
//! source, so re-indexing the same document replaces its records in place.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::embedding::vec_to_blob;
use crate::error::IngestError;
use crate::models::Chunk;

/// Index chunks in batches, pairing each with its embedding when provided.
///
/// Batch failures are isolated: a failed batch is recorded and the rest
/// proceed, so one bad batch cannot void an otherwise good document. Any
/// failure surfaces as [`IngestError::IndexWrite`] after the loop since the
/// successful batches are not rolled back.
pub async fn index_chunks(
    pool: &SqlitePool,
    chunks: &[Chunk],
    embeddings: Option<&[Vec<f32>]>,
    ttl_hours: u64,
    batch_size: usize,
) -> Result<usize, IngestError> {
    if let Some(vectors) = embeddings {
        if vectors.len() != chunks.len() {
            return Err(IngestError::EmbeddingProvider(format!(
                "{} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
    }

    let batch_size = batch_size.max(1);
    let total = chunks.len().div_ceil(batch_size);
    let mut indexed = 0usize;
    let mut failed = 0usize;
    let mut detail = String::new();

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let offset = batch_no * batch_size;
        let batch_embeddings = embeddings.map(|v| &v[offset..offset + batch.len()]);
        match write_batch(pool, batch, batch_embeddings, ttl_hours).await {
            Ok(()) => indexed += batch.len(),
            Err(e) => {
                warn!(batch = batch_no, error = %e, "index batch failed");
                failed += 1;
                if detail.is_empty() {
                    detail = e.to_string();
                }
            }
        }
    }

    if failed > 0 {
        return Err(IngestError::IndexWrite {
            failed,
            total,
            detail,
        });
    }
    debug!(indexed, "index write complete");
    Ok(indexed)
}

async fn write_batch(
    pool: &SqlitePool,
    chunks: &[Chunk],
    embeddings: Option<&[Vec<f32>]>,
    ttl_hours: u64,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for (i, chunk) in chunks.iter().enumerate() {
        let expires_at = chunk.ingested_at + Duration::hours(ttl_hours as i64);
        let locator_json = serde_json::to_string(&chunk.locator)?;
        let temporal_json = chunk
            .temporal
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let embedding_blob = embeddings.map(|v| vec_to_blob(&v[i]));

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO records
            (chunk_id, owner_id, source_id, content, embedding, locator_json,
             temporal_json, content_hash, ingested_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.owner_id)
        .bind(&chunk.source_id)
        .bind(&chunk.content)
        .bind(embedding_blob)
        .bind(&locator_json)
        .bind(&temporal_json)
        .bind(&chunk.content_hash)
        .bind(chunk.ingested_at.timestamp())
        .bind(expires_at.timestamp())
        .execute(&mut *tx)
        .await?;

        // FTS5 has no primary key; supersede is delete-then-insert.
        sqlx::query("DELETE FROM records_fts WHERE chunk_id = ?")
            .bind(&chunk.chunk_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO records_fts (chunk_id, owner_id, source_id, content) VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.owner_id)
        .bind(&chunk.source_id)
        .bind(&chunk.content)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove every index record of a source, ahead of its natural expiry.
pub async fn delete_source_records(
    pool: &SqlitePool,
    owner_id: &str,
    source_id: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM records WHERE owner_id = ? AND source_id = ?")
        .bind(owner_id)
        .bind(source_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM records_fts WHERE owner_id = ? AND source_id = ?")
        .bind(owner_id)
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Reclaim expired records and cache entries. Readers already exclude them,
/// so this only frees space.
pub async fn purge_expired(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let ts = now.timestamp();
    let expired: Vec<String> =
        sqlx::query_scalar("SELECT chunk_id FROM records WHERE expires_at <= ?")
            .bind(ts)
            .fetch_all(pool)
            .await?;
    for chunk_id in &expired {
        sqlx::query("DELETE FROM records_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(pool)
            .await?;
    }
    let result = sqlx::query("DELETE FROM records WHERE expires_at <= ?")
        .bind(ts)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM embedding_cache WHERE expires_at <= ?")
        .bind(ts)
        .execute(pool)
        .await?;
    debug!(purged = result.rows_affected(), "expired records reclaimed");
    Ok(result.rows_affected())
}
