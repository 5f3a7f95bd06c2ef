//! Hybrid retrieval over the chunk index.
//!
//! Two channels feed one blended ranking: FTS5 keyword matching (bm25,
//! negated so higher is better) and cosine similarity over stored
//! embeddings. Both channels are min-max normalized to [0, 1] before
//! blending with the configured semantic weight. With embeddings disabled,
//! retrieval degrades to keyword-only instead of failing.
//!
//! Owner isolation and expiry are SQL predicates on every candidate query,
//! not post-filters: another owner's chunks and expired records can never
//! enter the candidate set.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{DocumentKind, Locator, RetrievalResult, TemporalContext};

/// A retrieval request, scoped to one owner and optionally one source.
pub struct SearchRequest<'a> {
    pub owner_id: &'a str,
    pub query: &'a str,
    pub source_id: Option<&'a str>,
}

/// Run hybrid retrieval. Returns an explicit empty list when nothing
/// matches; emptiness is an operational signal, never an error.
pub async fn hybrid_search(
    pool: &SqlitePool,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    request: &SearchRequest<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<RetrievalResult>> {
    let fts_query = sanitize_fts_query(request.query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let retrieval = &config.retrieval;
    let keyword_candidates =
        fetch_keyword_candidates(pool, &fts_query, request, retrieval, now).await?;

    let vector_candidates = match provider {
        Some(provider) if config.embedding.is_enabled() => {
            let query_vec =
                embedding::embed_query(provider, &config.embedding, request.query).await?;
            fetch_vector_candidates(pool, &query_vec, request, retrieval, now).await?
        }
        _ => Vec::new(),
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        debug!(owner = request.owner_id, "no candidates for query");
        return Ok(Vec::new());
    }

    // Keyword-only operation keeps ranks meaningful by dropping the
    // semantic term instead of multiplying everything by its weight.
    let semantic_weight = if vector_candidates.is_empty() {
        0.0
    } else {
        retrieval.semantic_weight
    };

    let norm_keyword = normalize_scores(&keyword_candidates);
    let norm_vector = normalize_scores(&vector_candidates);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut merged: HashMap<&str, &Candidate> = HashMap::new();
    for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
        merged.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut results: Vec<RetrievalResult> = Vec::with_capacity(merged.len());
    for (chunk_id, candidate) in merged {
        let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
        let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
        let score = (1.0 - semantic_weight) * k + semantic_weight * v;
        results.push(candidate.to_result(score)?);
    }

    // Deterministic: score desc, freshness desc, chunk_id asc.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.ingested_at.cmp(&a.ingested_at))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(retrieval.top_k);

    Ok(results)
}

/// Quote each alphanumeric token so user punctuation cannot become FTS5
/// syntax, OR-joined to keep recall high on short queries.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    source_id: String,
    filename: String,
    kind: String,
    raw_score: f64,
    locator_json: String,
    temporal_json: Option<String>,
    content: String,
    ingested_at: i64,
}

impl Candidate {
    fn to_result(&self, score: f64) -> Result<RetrievalResult> {
        let locator: Locator = serde_json::from_str(&self.locator_json)?;
        let temporal: Option<TemporalContext> = self
            .temporal_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let kind = DocumentKind::parse(&self.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown document kind: {}", self.kind))?;
        Ok(RetrievalResult {
            chunk_id: self.chunk_id.clone(),
            source_id: self.source_id.clone(),
            filename: self.filename.clone(),
            kind,
            score,
            locator,
            temporal,
            content: self.content.clone(),
            ingested_at: self.ingested_at,
        })
    }
}

fn candidate_from_row(row: &sqlx::sqlite::SqliteRow, raw_score: f64) -> Candidate {
    Candidate {
        chunk_id: row.get("chunk_id"),
        source_id: row.get("source_id"),
        filename: row.get("filename"),
        kind: row.get("kind"),
        raw_score,
        locator_json: row.get("locator_json"),
        temporal_json: row.get("temporal_json"),
        content: row.get("content"),
        ingested_at: row.get("ingested_at"),
    }
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    fts_query: &str,
    request: &SearchRequest<'_>,
    retrieval: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>> {
    let mut sql = String::from(
        r#"
        SELECT r.chunk_id, r.source_id, s.filename, s.kind, r.locator_json,
               r.temporal_json, r.content, r.ingested_at, f.rank AS rank
        FROM records_fts f
        JOIN records r ON r.chunk_id = f.chunk_id
        JOIN sources s ON s.id = r.source_id
        WHERE records_fts MATCH ?
          AND r.owner_id = ?
          AND r.expires_at > ?
        "#,
    );
    if request.source_id.is_some() {
        sql.push_str(" AND r.source_id = ?");
    }
    sql.push_str(" ORDER BY rank LIMIT ?");

    let mut query = sqlx::query(&sql)
        .bind(fts_query)
        .bind(request.owner_id)
        .bind(now.timestamp());
    if let Some(source_id) = request.source_id {
        query = query.bind(source_id);
    }
    let rows = query.bind(retrieval.candidate_k).fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            // bm25 rank: lower is better; negate so higher = better.
            candidate_from_row(row, -rank)
        })
        .collect())
}

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    query_vec: &[f32],
    request: &SearchRequest<'_>,
    retrieval: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>> {
    let mut sql = String::from(
        r#"
        SELECT r.chunk_id, r.source_id, s.filename, s.kind, r.locator_json,
               r.temporal_json, r.content, r.ingested_at, r.embedding
        FROM records r
        JOIN sources s ON s.id = r.source_id
        WHERE r.embedding IS NOT NULL
          AND r.owner_id = ?
          AND r.expires_at > ?
        "#,
    );
    if request.source_id.is_some() {
        sql.push_str(" AND r.source_id = ?");
    }

    let mut query = sqlx::query(&sql)
        .bind(request.owner_id)
        .bind(now.timestamp());
    if let Some(source_id) = request.source_id {
        query = query.bind(source_id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(query_vec, &vec) as f64;
            candidate_from_row(row, similarity)
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(retrieval.candidate_k as usize);
    Ok(candidates)
}

/// Min-max normalize raw scores to [0, 1]; a single candidate (or all-equal
/// scores) normalizes to 1.0.
fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::content_hash;
    use crate::index::index_chunks;
    use crate::models::Chunk;
    use chrono::Duration;

    fn candidate(chunk_id: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: chunk_id.to_string(),
            source_id: "s1".to_string(),
            filename: "f".to_string(),
            kind: "delimited".to_string(),
            raw_score: score,
            locator_json: String::new(),
            temporal_json: None,
            content: String::new(),
            ingested_at: 0,
        }
    }

    #[test]
    fn sanitizer_quotes_tokens_and_drops_punctuation() {
        assert_eq!(
            sanitize_fts_query("stock widget"),
            r#""stock" OR "widget""#
        );
        assert_eq!(sanitize_fts_query("c'est \"quoted\""), r#""c" OR "est" OR "quoted""#);
        assert_eq!(sanitize_fts_query("!!!"), "");
        assert_eq!(sanitize_fts_query(""), "");
    }

    #[test]
    fn normalization_maps_to_unit_range() {
        let candidates = vec![candidate("a", 2.0), candidate("b", 6.0), candidate("c", 4.0)];
        let normed = normalize_scores(&candidates);
        let by_id: HashMap<&str, f64> = normed
            .iter()
            .map(|(c, s)| (c.chunk_id.as_str(), *s))
            .collect();
        assert!((by_id["a"] - 0.0).abs() < 1e-9);
        assert!((by_id["b"] - 1.0).abs() < 1e-9);
        assert!((by_id["c"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn equal_scores_normalize_to_one() {
        let candidates = vec![candidate("a", 3.0), candidate("b", 3.0)];
        let normed = normalize_scores(&candidates);
        assert!(normed.iter().all(|(_, s)| (*s - 1.0).abs() < 1e-9));
    }

    fn chunk(chunk_id: &str, owner: &str, source: &str, content: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            owner_id: owner.to_string(),
            source_id: source.to_string(),
            content: content.to_string(),
            locator: Locator::Row { row_number: 2 },
            kind: DocumentKind::Delimited,
            temporal: None,
            content_hash: content_hash(content),
            ingested_at: Utc::now(),
        }
    }

    async fn setup_with_source(owner: &str, source_id: &str, filename: &str) -> SqlitePool {
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO sources (id, owner_id, filename, kind, raw, status, created_at, updated_at)
             VALUES (?, ?, ?, 'delimited', X'', 'completed', ?, ?)",
        )
        .bind(source_id)
        .bind(owner)
        .bind(filename)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn test_config() -> Config {
        let toml = "[db]\npath = \"/tmp/unused.sqlite\"\n";
        toml::from_str(toml).unwrap()
    }

    #[tokio::test]
    async fn keyword_search_finds_matching_chunks() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let chunks = vec![
            chunk("s1:0", "alice", "s1", "Stock: -50"),
            chunk("s1:1", "alice", "s1", "Price: 12.50"),
        ];
        index_chunks(&pool, &chunks, None, 24, 100).await.unwrap();

        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "alice",
                query: "stock",
                source_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "s1:0");
        assert_eq!(results[0].filename, "stocks.xlsx");
        assert_eq!(results[0].locator, Locator::Row { row_number: 2 });
    }

    #[tokio::test]
    async fn owner_isolation_holds_in_sql() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let chunks = vec![chunk("s1:0", "alice", "s1", "confidential stock data")];
        index_chunks(&pool, &chunks, None, 24, 100).await.unwrap();

        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "mallory",
                query: "confidential stock",
                source_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn expired_records_never_surface() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let mut old = chunk("s1:0", "alice", "s1", "stale stock data");
        old.ingested_at = Utc::now() - Duration::hours(48);
        index_chunks(&pool, &[old], None, 24, 100).await.unwrap();

        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "alice",
                query: "stale stock",
                source_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn source_scoping_narrows_results() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO sources (id, owner_id, filename, kind, raw, status, created_at, updated_at)
             VALUES ('s2', 'alice', 'orders.csv', 'delimited', X'', 'completed', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let chunks = vec![
            chunk("s1:0", "alice", "s1", "stock level low"),
            chunk("s2:0", "alice", "s2", "stock ordered"),
        ];
        index_chunks(&pool, &chunks, None, 24, 100).await.unwrap();

        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "alice",
                query: "stock",
                source_id: Some("s2"),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "s2:0");
    }

    #[tokio::test]
    async fn blank_query_returns_empty_not_error() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "alice",
                query: "  !!! ",
                source_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn ranking_is_deterministic_under_ties() {
        let pool = setup_with_source("alice", "s1", "stocks.xlsx").await;
        let ts = Utc::now();
        let mut a = chunk("s1:b", "alice", "s1", "widget stock");
        let mut b = chunk("s1:a", "alice", "s1", "widget stock");
        a.ingested_at = ts;
        b.ingested_at = ts;
        index_chunks(&pool, &[a, b], None, 24, 100).await.unwrap();

        let results = hybrid_search(
            &pool,
            &test_config(),
            None,
            &SearchRequest {
                owner_id: "alice",
                query: "widget",
                source_id: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
        // Equal score and freshness: chunk_id ascending breaks the tie.
        assert_eq!(results[0].chunk_id, "s1:a");
        assert_eq!(results[1].chunk_id, "s1:b");
    }
}
