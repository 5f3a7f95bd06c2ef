//! Core data models used throughout Anchorage.
//!
//! These types represent the chunks, locators, temporal annotations, and
//! search results that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported document kinds, dispatched to one parser each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Spreadsheet,
    Pdf,
    Word,
    SlideDeck,
    Delimited,
    PlainText,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Spreadsheet => "spreadsheet",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Word => "word",
            DocumentKind::SlideDeck => "slide_deck",
            DocumentKind::Delimited => "delimited",
            DocumentKind::PlainText => "plain_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spreadsheet" => Some(DocumentKind::Spreadsheet),
            "pdf" => Some(DocumentKind::Pdf),
            "word" => Some(DocumentKind::Word),
            "slide_deck" => Some(DocumentKind::SlideDeck),
            "delimited" => Some(DocumentKind::Delimited),
            "plain_text" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }
}

/// Region a paragraph chunk came from inside a word-processing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "region", rename_all = "snake_case")]
pub enum ParagraphRegion {
    Body,
    Header,
    Footer,
    Table { table: u32, row: u32 },
}

/// Part of a slide a chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlidePart {
    Title,
    Body,
    Notes,
}

impl SlidePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlidePart::Title => "title",
            SlidePart::Body => "body",
            SlidePart::Notes => "notes",
        }
    }
}

/// Format-specific source position of a chunk.
///
/// A locator must be sufficient, alone, to render a human-readable citation
/// without re-reading the source document. [`Locator::describe`] produces
/// that citation fragment; serde round-trips the locator as JSON in the
/// index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// A single spreadsheet cell, e.g. sheet "Stocks", B2.
    Cell {
        sheet: String,
        cell_ref: String,
        row: u32,
        column: u32,
    },
    /// A page (or a split part of a page) in a paged document.
    Page { page: u32, chunk_index: u32 },
    /// A paragraph in a word-processing document.
    Paragraph {
        index: u32,
        #[serde(flatten)]
        region: ParagraphRegion,
    },
    /// A part of a presentation slide.
    Slide { number: u32, part: SlidePart },
    /// A data row in a delimited-text file (physical line number, header = 1).
    Row { row_number: u64 },
    /// A paragraph (or split part) in a plain-text file.
    Line {
        paragraph_index: u32,
        chunk_index: u32,
    },
}

impl Locator {
    /// Human-readable citation fragment, e.g. `sheet 'Stocks', cell B2`.
    pub fn describe(&self) -> String {
        match self {
            Locator::Cell {
                sheet, cell_ref, ..
            } => format!("sheet '{}', cell {}", sheet, cell_ref),
            Locator::Page { page, chunk_index } => {
                if *chunk_index == 0 {
                    format!("page {}", page)
                } else {
                    format!("page {}, part {}", page, chunk_index + 1)
                }
            }
            Locator::Paragraph { index, region } => match region {
                ParagraphRegion::Body => format!("paragraph {}", index),
                ParagraphRegion::Header => format!("header, paragraph {}", index),
                ParagraphRegion::Footer => format!("footer, paragraph {}", index),
                ParagraphRegion::Table { table, row } => {
                    format!("table {}, row {}", table, row)
                }
            },
            Locator::Slide { number, part } => {
                format!("slide {} ({})", number, part.as_str())
            }
            Locator::Row { row_number } => format!("row {}", row_number),
            Locator::Line {
                paragraph_index,
                chunk_index,
            } => {
                if *chunk_index == 0 {
                    format!("paragraph {}", paragraph_index)
                } else {
                    format!("paragraph {}, part {}", paragraph_index, chunk_index + 1)
                }
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Temporal annotation attached to a chunk whose source row carries at least
/// one validated date column. Never fabricated for non-temporal documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub date_column: String,
    pub detected_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_time_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_average_7d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_average_30d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_vs_previous_period_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonal_label: Option<String>,
}

impl TemporalContext {
    /// One-line summary rendered inline with a source label.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "{} {}",
            self.date_column,
            self.detected_date.format("%Y-%m-%d")
        )];
        if let (Some(col), Some(date)) = (&self.paired_column, &self.paired_date) {
            parts.push(format!("{} {}", col, date.format("%Y-%m-%d")));
        }
        if let Some(days) = self.lead_time_days {
            parts.push(format!("lead time {} days", days));
        }
        if let Some(pct) = self.variation_vs_previous_period_pct {
            parts.push(format!("{:+.1}% vs previous period", pct));
        }
        if let Some(label) = &self.seasonal_label {
            parts.push(label.clone());
        }
        parts.join(", ")
    }
}

/// Earliest/latest dates seen across a document's temporal columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

/// Lead-time statistics for one (start, end) column pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeStats {
    pub mean_days: f64,
    pub median_days: f64,
    pub max_days: f64,
    pub min_days: f64,
    pub std_days: f64,
    /// Lead times more than two standard deviations above the mean (first 10).
    pub outliers: Vec<f64>,
    pub total_records: usize,
}

/// Lead-time stats keyed to the column pair they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimePairStats {
    pub start_column: String,
    pub end_column: String,
    pub stats: LeadTimeStats,
}

/// Outcome of seasonality analysis for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeasonalityOutcome {
    /// A period materially above the yearly baseline was found.
    Pattern {
        peak_month: u32,
        peak_month_name: String,
        peak_deviation_pct: f64,
        low_month: u32,
        low_deviation_pct: f64,
        description: String,
    },
    /// Less than the configured months of coverage; no computation attempted.
    InsufficientHistory { months_covered: f64 },
    /// Enough history, but no month deviates materially from the baseline.
    NoMaterialPattern,
}

/// Per-source temporal analysis results, persisted as JSON on the source row.
///
/// Mutated only by an explicit correction operation; automatic re-detection
/// never overwrites a user override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalMetadata {
    pub detected_date_columns: Vec<String>,
    /// Sampled validation ratio per accepted column, for detection auditing.
    #[serde(default)]
    pub detection_ratios: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_overridden_columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_overridden_pairs: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub lead_time_stats: Vec<LeadTimePairStats>,
    /// More than two detected columns with no recognizable semantic pair.
    #[serde(default)]
    pub ambiguous_pairing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonality: Option<SeasonalityOutcome>,
    pub analyzed_at: DateTime<Utc>,
}

impl TemporalMetadata {
    /// Columns to use for enrichment: a manual override wins over heuristics.
    pub fn effective_columns(&self) -> &[String] {
        match &self.user_overridden_columns {
            Some(cols) => cols,
            None => &self.detected_date_columns,
        }
    }
}

/// An atomic, independently citable unit of document content.
///
/// Created once at parse time, immutable after indexing; re-processing a
/// source produces chunks with the same deterministic ids, superseding the
/// old records.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub owner_id: String,
    pub source_id: String,
    pub content: String,
    pub locator: Locator,
    pub kind: DocumentKind,
    pub temporal: Option<TemporalContext>,
    /// SHA-256 of the content, for embedding-cache lookup and idempotence.
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl Chunk {
    /// Full human-readable citation string, e.g.
    /// `stocks.xlsx, sheet 'Stocks', cell B2`.
    pub fn citation(&self, filename: &str) -> String {
        format!("{}, {}", filename, self.locator.describe())
    }
}

/// A ranked retrieval hit. Ephemeral: scoped to the request that produced it.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub source_id: String,
    pub filename: String,
    pub kind: DocumentKind,
    pub score: f64,
    pub locator: Locator,
    pub temporal: Option<TemporalContext>,
    pub content: String,
    pub ingested_at: i64,
}

/// A validated citation parsed back out of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// The exact source label the model used, e.g. `Source 2`.
    pub label: String,
    pub filename: String,
    pub locator: Locator,
    /// First 200 characters of the cited chunk.
    pub excerpt: String,
}

/// Processing status of an ingestion job, written back to the source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A rectangular view of tabular content handed to temporal enrichment.
///
/// `rows` excludes the header row; `None` marks an empty cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Sheet name for spreadsheets, filename for delimited text.
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Physical source row/line number of each entry in `rows`, aligning
    /// rows with chunk locators even when the source has gaps (blank lines,
    /// quoted fields spanning lines).
    pub line_numbers: Vec<u64>,
}

impl Table {
    /// Cell value at (row, column) indices into the data area.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}
