//! The ingestion pipeline: parse, enrich, embed, index.
//!
//! [`process_source`] drives one registered source through the full
//! lifecycle, writing status transitions back to the catalog as it goes.
//! Any failure marks the source `Failed` with the error message; parse
//! failures are terminal and not retried, since the same bytes fail the
//! same way.
//!
//! Chunk ids are deterministic (`{source_id}:{seq}` over parse order), so
//! re-processing a source supersedes its old records instead of duplicating
//! them.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::catalog;
use crate::config::Config;
use crate::embedding::{self, content_hash};
use crate::error::IngestError;
use crate::index;
use crate::models::{Chunk, JobStatus, Locator, Table, TemporalContext, TemporalMetadata};
use crate::parser;
use crate::temporal;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source_id: String,
    pub chunks_indexed: usize,
    pub temporal_columns: Vec<String>,
}

/// Process one source end to end, recording the outcome on its catalog row.
pub async fn process_source(
    pool: &SqlitePool,
    config: &Config,
    owner_id: &str,
    source_id: &str,
) -> Result<IngestOutcome, IngestError> {
    let now = Utc::now();
    catalog::set_status(pool, source_id, JobStatus::Processing, None, now).await?;

    match run(pool, config, owner_id, source_id, now).await {
        Ok(outcome) => {
            catalog::set_status(pool, source_id, JobStatus::Completed, None, Utc::now()).await?;
            info!(
                source = source_id,
                chunks = outcome.chunks_indexed,
                "ingestion completed"
            );
            Ok(outcome)
        }
        Err(e) => {
            let message = e.status_message();
            if let Err(status_err) = catalog::set_status(
                pool,
                source_id,
                JobStatus::Failed,
                Some(&message),
                Utc::now(),
            )
            .await
            {
                warn!(source = source_id, error = %status_err, "failed to record failure status");
            }
            Err(e)
        }
    }
}

/// Re-run the pipeline on a source, typically after a temporal override.
/// Existing records are superseded by chunk id, and any leftover chunks
/// from a previous parse are removed first.
pub async fn reprocess_source(
    pool: &SqlitePool,
    config: &Config,
    owner_id: &str,
    source_id: &str,
) -> Result<IngestOutcome, IngestError> {
    index::delete_source_records(pool, owner_id, source_id).await?;
    process_source(pool, config, owner_id, source_id).await
}

async fn run(
    pool: &SqlitePool,
    config: &Config,
    owner_id: &str,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, IngestError> {
    let source = catalog::get_source(pool, owner_id, source_id)
        .await?
        .ok_or_else(|| IngestError::Parse(format!("unknown source: {}", source_id)))?;
    let raw = catalog::fetch_raw(pool, owner_id, source_id)
        .await?
        .ok_or_else(|| IngestError::Parse(format!("missing raw bytes for {}", source_id)))?;

    let parsed = parser::parse(&raw, &source.filename, source.kind, config.chunking.max_tokens)?;
    if parsed.chunks.is_empty() {
        return Err(IngestError::Parse(
            "document produced no extractable content".to_string(),
        ));
    }

    // Temporal analysis; a prior user override is carried forward and wins.
    let meta = temporal::analyze_tables(
        &parsed.tables,
        &config.temporal,
        source.temporal.as_ref(),
        now,
    );
    if let Some(meta) = &meta {
        catalog::set_temporal_metadata(pool, source_id, meta, now).await?;
    }

    let contexts = meta
        .as_ref()
        .map(|m| row_context_lookup(&parsed.tables, m))
        .unwrap_or_default();

    let chunks: Vec<Chunk> = parsed
        .chunks
        .iter()
        .enumerate()
        .map(|(seq, draft)| Chunk {
            chunk_id: format!("{}:{}", source_id, seq),
            owner_id: owner_id.to_string(),
            source_id: source_id.to_string(),
            content: draft.content.clone(),
            locator: draft.locator.clone(),
            kind: source.kind,
            temporal: temporal_for_locator(&draft.locator, &parsed.tables, &contexts),
            content_hash: content_hash(&draft.content),
            ingested_at: now,
        })
        .collect();

    let embeddings = if config.embedding.is_enabled() {
        let provider = embedding::create_provider(&config.embedding)
            .map_err(|e| IngestError::EmbeddingProvider(e.to_string()))?;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let expires_at = now + Duration::hours(config.index.ttl_hours as i64);
        let vectors = embedding::embed_texts_cached(
            pool,
            provider.as_ref(),
            &config.embedding,
            &texts,
            now,
            expires_at,
        )
        .await
        .map_err(|e| IngestError::EmbeddingProvider(e.to_string()))?;
        Some(vectors)
    } else {
        None
    };

    let chunks_indexed = index::index_chunks(
        pool,
        &chunks,
        embeddings.as_deref(),
        config.index.ttl_hours,
        config.index.batch_size,
    )
    .await?;

    Ok(IngestOutcome {
        source_id: source_id.to_string(),
        chunks_indexed,
        temporal_columns: meta
            .map(|m| m.effective_columns().to_vec())
            .unwrap_or_default(),
    })
}

/// Per-table, per-row temporal contexts, index-aligned with each table.
fn row_context_lookup(
    tables: &[Table],
    meta: &TemporalMetadata,
) -> Vec<Vec<Option<TemporalContext>>> {
    tables
        .iter()
        .map(|t| temporal::row_contexts(t, meta))
        .collect()
}

/// Map a chunk locator back to its table row and pick up that row's context.
///
/// Cell locators match the table named after their sheet; row locators
/// match any table whose line numbering contains them (delimited files
/// produce exactly one). Header rows are absent from `line_numbers` and
/// get nothing.
fn temporal_for_locator(
    locator: &Locator,
    tables: &[Table],
    contexts: &[Vec<Option<TemporalContext>>],
) -> Option<TemporalContext> {
    let (table_idx, row_idx) = match locator {
        Locator::Cell { sheet, row, .. } => {
            let idx = tables.iter().position(|t| &t.name == sheet)?;
            let pos = tables[idx]
                .line_numbers
                .iter()
                .position(|l| *l == *row as u64)?;
            (idx, pos)
        }
        Locator::Row { row_number } => tables.iter().enumerate().find_map(|(idx, t)| {
            t.line_numbers
                .iter()
                .position(|l| l == row_number)
                .map(|pos| (idx, pos))
        })?,
        _ => return None,
    };
    contexts.get(table_idx)?.get(row_idx)?.clone()
}

/// Run the pipeline on a background task, teeing failures to the log. The
/// outcome is also recorded on the source row, so callers can poll status.
pub fn spawn(pool: SqlitePool, config: Config, owner_id: String, source_id: String) {
    tokio::spawn(async move {
        if let Err(e) = process_source(&pool, &config, &owner_id, &source_id).await {
            warn!(source = %source_id, error = %e, "background ingestion failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    async fn setup() -> (SqlitePool, Config) {
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let config: Config = toml::from_str("[db]\npath = \"/tmp/unused.sqlite\"\n").unwrap();
        (pool, config)
    }

    #[tokio::test]
    async fn csv_flows_from_registration_to_completed() {
        let (pool, config) = setup().await;
        let csv = "product,order_date,delivery_date,qty\n\
                   Widget,2025-12-01,2025-12-15,40\n\
                   Bolt,2025-12-03,2025-12-10,15\n";
        let source = catalog::register_source(&pool, "alice", "orders.csv", csv.as_bytes(), Utc::now())
            .await
            .unwrap();

        let outcome = process_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap();
        assert_eq!(outcome.chunks_indexed, 2);
        assert_eq!(
            outcome.temporal_columns,
            vec!["order_date", "delivery_date"]
        );

        let fetched = catalog::get_source(&pool, "alice", &source.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        let meta = fetched.temporal.unwrap();
        assert_eq!(meta.lead_time_stats.len(), 1);

        // Row chunks carry their row's temporal context.
        let temporal_json: Option<String> = sqlx::query_scalar(
            "SELECT temporal_json FROM records WHERE chunk_id = ?",
        )
        .bind(format!("{}:0", source.id))
        .fetch_one(&pool)
        .await
        .unwrap();
        let ctx: TemporalContext = serde_json::from_str(&temporal_json.unwrap()).unwrap();
        assert_eq!(ctx.date_column, "order_date");
        assert_eq!(ctx.lead_time_days, Some(14));
    }

    #[tokio::test]
    async fn spawned_ingestion_completes_in_the_background() {
        let (pool, config) = setup().await;
        let csv = "product,order_date,qty\nWidget,2025-12-01,40\n";
        let source = catalog::register_source(&pool, "alice", "orders.csv", csv.as_bytes(), Utc::now())
            .await
            .unwrap();

        spawn(pool.clone(), config, "alice".to_string(), source.id.clone());

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            status = catalog::get_source(&pool, "alice", &source.id)
                .await
                .unwrap()
                .unwrap()
                .status;
            if matches!(status, JobStatus::Completed | JobStatus::Failed) {
                break;
            }
        }
        assert_eq!(status, JobStatus::Completed);

        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(records, 1);
    }

    #[tokio::test]
    async fn corrupt_document_is_marked_failed() {
        let (pool, config) = setup().await;
        let source = catalog::register_source(
            &pool,
            "alice",
            "report.pdf",
            b"this is not a pdf",
            Utc::now(),
        )
        .await
        .unwrap();

        let err = process_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));

        let fetched = catalog::get_source(&pool, "alice", &source.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert!(fetched
            .error_message
            .unwrap()
            .starts_with("parse failure"));
        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(records, 0);
    }

    #[tokio::test]
    async fn reprocessing_supersedes_instead_of_duplicating() {
        let (pool, config) = setup().await;
        let csv = "product,qty\nWidget,40\n";
        let source = catalog::register_source(&pool, "alice", "items.csv", csv.as_bytes(), Utc::now())
            .await
            .unwrap();
        process_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap();
        reprocess_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap();

        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(records, 1);
        assert_eq!(source.kind, DocumentKind::Delimited);
    }

    #[tokio::test]
    async fn override_then_reprocess_changes_enrichment() {
        let (pool, config) = setup().await;
        // Detection pairs order_date with due_date and enriches from the
        // pair start; the override makes due_date the primary column.
        let csv = "item,order_date,due_date\nWidget,2025-12-01,2025-12-20\n";
        let source = catalog::register_source(&pool, "alice", "dues.csv", csv.as_bytes(), Utc::now())
            .await
            .unwrap();
        process_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap();

        catalog::set_temporal_override(
            &pool,
            "alice",
            &source.id,
            Some(vec!["due_date".to_string()]),
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        reprocess_source(&pool, &config, "alice", &source.id)
            .await
            .unwrap();

        let temporal_json: Option<String> = sqlx::query_scalar(
            "SELECT temporal_json FROM records WHERE chunk_id = ?",
        )
        .bind(format!("{}:0", source.id))
        .fetch_one(&pool)
        .await
        .unwrap();
        let ctx: TemporalContext = serde_json::from_str(&temporal_json.unwrap()).unwrap();
        assert_eq!(ctx.date_column, "due_date");
        assert_eq!(
            ctx.detected_date,
            chrono::NaiveDate::from_ymd_opt(2025, 12, 20).unwrap()
        );
    }
}
