//! Source-document registry.
//!
//! One row per uploaded document: raw bytes, processing status, and the
//! persisted temporal metadata. Raw bytes are kept so a temporal override
//! can re-run the pipeline from the original upload. All reads are scoped
//! by owner; a source id alone never crosses an owner boundary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{DocumentKind, JobStatus, TemporalMetadata};
use crate::parser;

/// A registered source as seen by callers; raw bytes are fetched separately.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub kind: DocumentKind,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub temporal: Option<TemporalMetadata>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Register an upload, returning its new source record in `Pending` status.
///
/// The document kind is fixed here from the filename; an extension we have
/// no parser for is rejected up front rather than failing mid-pipeline.
pub async fn register_source(
    pool: &SqlitePool,
    owner_id: &str,
    filename: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<SourceRecord, IngestError> {
    let kind = parser::kind_for_filename(filename)
        .ok_or_else(|| IngestError::UnsupportedKind(filename.to_string()))?;
    let id = Uuid::new_v4().to_string();
    let ts = now.timestamp();

    sqlx::query(
        r#"
        INSERT INTO sources (id, owner_id, filename, kind, raw, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(owner_id)
    .bind(filename)
    .bind(kind.as_str())
    .bind(bytes)
    .bind(ts)
    .bind(ts)
    .execute(pool)
    .await?;

    Ok(SourceRecord {
        id,
        owner_id: owner_id.to_string(),
        filename: filename.to_string(),
        kind,
        status: JobStatus::Pending,
        error_message: None,
        temporal: None,
        created_at: ts,
        updated_at: ts,
    })
}

pub async fn get_source(
    pool: &SqlitePool,
    owner_id: &str,
    source_id: &str,
) -> Result<Option<SourceRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, filename, kind, status, error_message, temporal_json,
               created_at, updated_at
        FROM sources WHERE id = ? AND owner_id = ?
        "#,
    )
    .bind(source_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    row.map(record_from_row).transpose()
}

pub async fn list_sources(pool: &SqlitePool, owner_id: &str) -> Result<Vec<SourceRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, filename, kind, status, error_message, temporal_json,
               created_at, updated_at
        FROM sources WHERE owner_id = ? ORDER BY created_at DESC, id ASC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SourceRecord> {
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    let temporal_json: Option<String> = row.get("temporal_json");
    Ok(SourceRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        filename: row.get("filename"),
        kind: DocumentKind::parse(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("unknown document kind in catalog: {}", kind_str))?,
        status: JobStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown status in catalog: {}", status_str))?,
        error_message: row.get("error_message"),
        temporal: temporal_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Raw upload bytes, for (re-)processing.
pub async fn fetch_raw(
    pool: &SqlitePool,
    owner_id: &str,
    source_id: &str,
) -> Result<Option<Vec<u8>>> {
    let raw = sqlx::query_scalar("SELECT raw FROM sources WHERE id = ? AND owner_id = ?")
        .bind(source_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;
    Ok(raw)
}

pub async fn set_status(
    pool: &SqlitePool,
    source_id: &str,
    status: JobStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sources SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error_message)
        .bind(now.timestamp())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_temporal_metadata(
    pool: &SqlitePool,
    source_id: &str,
    meta: &TemporalMetadata,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sources SET temporal_json = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(meta)?)
        .bind(now.timestamp())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a manual temporal correction on a source.
///
/// The override is stored on the metadata and wins over detection from then
/// on; the caller is expected to re-run the pipeline so enrichment and
/// statistics reflect it.
pub async fn set_temporal_override(
    pool: &SqlitePool,
    owner_id: &str,
    source_id: &str,
    columns: Option<Vec<String>>,
    pairs: Option<Vec<(String, String)>>,
    now: DateTime<Utc>,
) -> Result<Option<TemporalMetadata>> {
    let Some(source) = get_source(pool, owner_id, source_id).await? else {
        return Ok(None);
    };

    let mut meta = source.temporal.unwrap_or(TemporalMetadata {
        detected_date_columns: Vec::new(),
        detection_ratios: Default::default(),
        user_overridden_columns: None,
        user_overridden_pairs: None,
        time_range: None,
        lead_time_stats: Vec::new(),
        ambiguous_pairing: false,
        seasonality: None,
        analyzed_at: now,
    });
    if columns.is_some() {
        meta.user_overridden_columns = columns;
    }
    if pairs.is_some() {
        meta.user_overridden_pairs = pairs;
    }
    set_temporal_metadata(pool, source_id, &meta, now).await?;
    Ok(Some(meta))
}

/// Remove a source row entirely. Index records are the caller's to remove
/// via [`crate::index::delete_source_records`].
pub async fn delete_source(pool: &SqlitePool, owner_id: &str, source_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sources WHERE id = ? AND owner_id = ?")
        .bind(source_id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
