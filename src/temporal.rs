//! Temporal analysis of tabular documents.
//!
//! Detection is two-gated: a column's name must suggest a date (English or
//! French supply-chain vocabulary) AND a sampled share of its non-empty
//! values must actually parse as dates. Lifecycle bookkeeping columns
//! (`created_at`, `updated_at`, ...) are denylisted outright so retrieval
//! never confuses "when the row was edited" with "when the order ships".
//!
//! On top of detection: lead-time statistics over (start, end) column
//! pairs, document time range, seasonality, and per-row [`TemporalContext`]
//! enrichment. A user override always wins over re-detection.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::TemporalConfig;
use crate::models::{
    LeadTimePairStats, LeadTimeStats, SeasonalityOutcome, Table, TemporalContext,
    TemporalMetadata, TimeRange,
};

/// Column-name fragments that suggest a business date, both languages.
const DATE_NAME_PATTERNS: &[&str] = &[
    r"(?i)date",
    r"(?i)livraison",
    r"(?i)delivery",
    r"(?i)r[eé]ception",
    r"(?i)commande",
    r"(?i)order",
    r"(?i)exp[eé]dition",
    r"(?i)ship",
    r"(?i)envoi",
    r"(?i)[eé]ch[eé]ance",
    r"(?i)due",
    r"(?i)timestamp",
    r"(?i)datetime",
    r"(?i)d[eé]but",
    r"(?i)start",
    r"(?i)\bfin\b",
    r"(?i)\bend\b",
];

/// Row-lifecycle columns excluded regardless of content.
const DENYLIST_PATTERNS: &[&str] = &[
    r"(?i)^created?_?(at|on)?$",
    r"(?i)^updated?_?(at|on)?$",
    r"(?i)^deleted?_?(at|on)?$",
    r"(?i)^last_?modified",
    r"(?i)_by$",
];

/// Start-side fragments for semantic pairing, matched against column names.
const PAIR_START_PATTERNS: &[&str] = &[
    r"(?i)commande",
    r"(?i)order",
    r"(?i)exp[eé]dition",
    r"(?i)ship",
    r"(?i)envoi",
    r"(?i)d[eé]but",
    r"(?i)start",
];

/// End-side fragments, index-aligned with nothing — any end matches any start.
const PAIR_END_PATTERNS: &[&str] = &[
    r"(?i)livraison",
    r"(?i)delivery",
    r"(?i)r[eé]ception",
    r"(?i)receive",
    r"(?i)\bfin\b",
    r"(?i)\bend\b",
    r"(?i)[eé]ch[eé]ance",
    r"(?i)due",
];

fn compiled(patterns: &[&str], cell: &'static OnceLock<Vec<Regex>>) -> &'static [Regex] {
    cell.get_or_init(|| {
        patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn name_suggests_date(name: &str) -> bool {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(DATE_NAME_PATTERNS, &CELL)
        .iter()
        .any(|re| re.is_match(name))
}

fn is_denylisted(name: &str) -> bool {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(DENYLIST_PATTERNS, &CELL)
        .iter()
        .any(|re| re.is_match(name.trim()))
}

fn matches_any(name: &str, patterns: &'static [&str], cell: &'static OnceLock<Vec<Regex>>) -> bool {
    compiled(patterns, cell).iter().any(|re| re.is_match(name))
}

fn is_pair_start(name: &str) -> bool {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    matches_any(name, PAIR_START_PATTERNS, &CELL)
}

fn is_pair_end(name: &str) -> bool {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    matches_any(name, PAIR_END_PATTERNS, &CELL)
}

/// Parse a date in any of the formats our customers' exports actually use.
///
/// Day-first formats are tried before month-first, so an ambiguous
/// `03/04/2025` resolves day-first (3 April). Datetime values contribute
/// their date part.
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%m-%Y",
        "%Y/%m/%d",
        "%d.%m.%Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    None
}

/// Full temporal analysis of a document's tables.
///
/// `previous` carries forward any user override, which both survives the
/// re-analysis and replaces the detected columns for all downstream
/// statistics.
pub fn analyze_tables(
    tables: &[Table],
    cfg: &TemporalConfig,
    previous: Option<&TemporalMetadata>,
    now: DateTime<Utc>,
) -> Option<TemporalMetadata> {
    if tables.is_empty() {
        return None;
    }

    let mut detected: Vec<String> = Vec::new();
    let mut ratios: BTreeMap<String, f64> = BTreeMap::new();
    for table in tables {
        for (column, ratio) in detect_date_columns(table, cfg) {
            let entry = ratios.entry(column.clone()).or_insert(0.0);
            if ratio > *entry {
                *entry = ratio;
            }
            if !detected.contains(&column) {
                detected.push(column);
            }
        }
    }

    let overridden_columns = previous.and_then(|m| m.user_overridden_columns.clone());
    let overridden_pairs = previous.and_then(|m| m.user_overridden_pairs.clone());

    let effective: Vec<String> = overridden_columns
        .clone()
        .unwrap_or_else(|| detected.clone());

    let mut lead_time_stats = Vec::new();
    let mut ambiguous_pairing = false;
    for table in tables {
        let present: Vec<String> = effective
            .iter()
            .filter(|c| table.column_index(c).is_some())
            .cloned()
            .collect();
        let (pairs, ambiguous) = match &overridden_pairs {
            Some(pairs) => (
                pairs
                    .iter()
                    .filter(|(a, b)| {
                        table.column_index(a).is_some() && table.column_index(b).is_some()
                    })
                    .cloned()
                    .collect(),
                false,
            ),
            None => identify_pairs(&present),
        };
        ambiguous_pairing |= ambiguous;
        for (start, end) in pairs {
            if let Some(stats) = calculate_lead_times(table, &start, &end) {
                lead_time_stats.push(LeadTimePairStats {
                    start_column: start,
                    end_column: end,
                    stats,
                });
            }
        }
    }

    let all_dates = collect_dates(tables, &effective);
    let time_range = time_range_of(&all_dates);
    let samples = collect_seasonal_samples(tables, &effective);
    let seasonality = if samples.is_empty() {
        None
    } else {
        Some(seasonality_of(&samples, cfg))
    };

    Some(TemporalMetadata {
        detected_date_columns: detected,
        detection_ratios: ratios,
        user_overridden_columns: overridden_columns,
        user_overridden_pairs: overridden_pairs,
        time_range,
        lead_time_stats,
        ambiguous_pairing,
        seasonality,
        analyzed_at: now,
    })
}

/// Date columns in one table: denylist gate, then name gate, then a sampled
/// content gate. Returns (column, validation ratio) for each acceptance.
pub fn detect_date_columns(table: &Table, cfg: &TemporalConfig) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    for (col_idx, column) in table.columns.iter().enumerate() {
        if is_denylisted(column) {
            debug!(column, "skipping denylisted lifecycle column");
            continue;
        }
        if !name_suggests_date(column) {
            continue;
        }

        let mut non_empty = 0usize;
        let mut valid = 0usize;
        for row in table.rows.iter().take(cfg.detection_sample_rows) {
            if let Some(Some(value)) = row.get(col_idx) {
                if value.trim().is_empty() {
                    continue;
                }
                non_empty += 1;
                if parse_flexible_date(value).is_some() {
                    valid += 1;
                }
            }
        }
        if non_empty == 0 {
            continue;
        }
        let ratio = valid as f64 / non_empty as f64;
        if ratio >= cfg.min_valid_ratio {
            out.push((column.clone(), ratio));
        } else {
            debug!(column, ratio, "column name suggests a date but content disagrees");
        }
    }
    out
}

/// Pair up date columns for lead-time computation.
///
/// Exactly two columns pair positionally (table order = chronology). With
/// more than two, only recognizable semantic pairs (order->delivery,
/// commande->livraison, ship->receive, start->end) are formed; if none is
/// found the pairing is flagged ambiguous rather than guessed.
pub fn identify_pairs(columns: &[String]) -> (Vec<(String, String)>, bool) {
    match columns.len() {
        0 | 1 => (Vec::new(), false),
        2 => (vec![(columns[0].clone(), columns[1].clone())], false),
        _ => {
            let mut pairs = Vec::new();
            let mut used = vec![false; columns.len()];
            for (i, start) in columns.iter().enumerate() {
                if used[i] || !is_pair_start(start) {
                    continue;
                }
                for (j, end) in columns.iter().enumerate() {
                    if i == j || used[j] || !is_pair_end(end) {
                        continue;
                    }
                    pairs.push((start.clone(), end.clone()));
                    used[i] = true;
                    used[j] = true;
                    break;
                }
            }
            let ambiguous = pairs.is_empty();
            (pairs, ambiguous)
        }
    }
}

/// Lead-time statistics for one (start, end) pair over a table.
///
/// Rows with an unparseable date are skipped; negative lead times (data
/// entry errors) are dropped. Returns `None` when no valid pair remains.
pub fn calculate_lead_times(table: &Table, start: &str, end: &str) -> Option<LeadTimeStats> {
    let start_idx = table.column_index(start)?;
    let end_idx = table.column_index(end)?;

    let mut lead_times: Vec<f64> = Vec::new();
    for (row_idx, row) in table.rows.iter().enumerate() {
        let start_date = row.get(start_idx).and_then(|c| c.as_deref()).and_then(parse_flexible_date);
        let end_date = row.get(end_idx).and_then(|c| c.as_deref()).and_then(parse_flexible_date);
        match (start_date, end_date) {
            (Some(s), Some(e)) => {
                let days = (e - s).num_days();
                if days < 0 {
                    debug!(row = row_idx, days, "dropping negative lead time");
                } else {
                    lead_times.push(days as f64);
                }
            }
            _ => {
                debug!(row = row_idx, "skipping row with unparseable date");
            }
        }
    }
    if lead_times.is_empty() {
        return None;
    }

    let n = lead_times.len() as f64;
    let mean = lead_times.iter().sum::<f64>() / n;
    let variance = lead_times.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    let mut sorted = lead_times.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted.len() % 2 == 0 {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    let threshold = mean + 2.0 * std;
    let outliers: Vec<f64> = if std > 0.0 {
        lead_times
            .iter()
            .copied()
            .filter(|v| *v > threshold)
            .take(10)
            .collect()
    } else {
        Vec::new()
    };

    Some(LeadTimeStats {
        mean_days: mean,
        median_days: median,
        max_days: sorted[sorted.len() - 1],
        min_days: sorted[0],
        std_days: std,
        outliers,
        total_records: lead_times.len(),
    })
}

fn collect_dates(tables: &[Table], columns: &[String]) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    for table in tables {
        for column in columns {
            if let Some(idx) = table.column_index(column) {
                for row in &table.rows {
                    if let Some(date) = row.get(idx).and_then(|c| c.as_deref()).and_then(parse_flexible_date) {
                        dates.push(date);
                    }
                }
            }
        }
    }
    dates
}

fn time_range_of(dates: &[NaiveDate]) -> Option<TimeRange> {
    let earliest = *dates.iter().min()?;
    let latest = *dates.iter().max()?;
    Some(TimeRange { earliest, latest })
}

/// (date, metric value) samples feeding seasonality: each table's primary
/// date column paired with its metric column, when one exists.
fn collect_seasonal_samples(
    tables: &[Table],
    columns: &[String],
) -> Vec<(NaiveDate, Option<f64>)> {
    let mut samples = Vec::new();
    for table in tables {
        let present: Vec<&String> = columns
            .iter()
            .filter(|c| table.column_index(c).is_some())
            .collect();
        let Some(date_idx) = present.first().and_then(|c| table.column_index(c)) else {
            continue;
        };
        let metric_idx = metric_column(table, &present);
        for row in &table.rows {
            let Some(date) = row
                .get(date_idx)
                .and_then(|c| c.as_deref())
                .and_then(parse_flexible_date)
            else {
                continue;
            };
            let value = metric_idx
                .and_then(|idx| row.get(idx).and_then(|c| c.as_deref()))
                .and_then(|v| v.trim().parse::<f64>().ok());
            samples.push((date, value));
        }
    }
    samples
}

/// Monthly-aggregate seasonality: the mean of the metric value per calendar
/// month, or plain monthly record counts when the table has no metric
/// column. Peak and low are measured against the mean of the monthly
/// aggregates.
///
/// Requires the configured minimum of history; with less coverage the
/// outcome says so explicitly instead of extrapolating from a partial year.
fn seasonality_of(samples: &[(NaiveDate, Option<f64>)], cfg: &TemporalConfig) -> SeasonalityOutcome {
    let earliest = match samples.iter().map(|(d, _)| *d).min() {
        Some(d) => d,
        None => return SeasonalityOutcome::InsufficientHistory { months_covered: 0.0 },
    };
    let latest = match samples.iter().map(|(d, _)| *d).max() {
        Some(d) => d,
        None => return SeasonalityOutcome::InsufficientHistory { months_covered: 0.0 },
    };
    let months_covered = (latest - earliest).num_days() as f64 / 30.44;
    if months_covered < cfg.min_months_for_seasonality as f64 {
        return SeasonalityOutcome::InsufficientHistory { months_covered };
    }

    let has_metric = samples.iter().any(|(_, v)| v.is_some());
    let mut value_sums: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    let mut row_counts: BTreeMap<u32, usize> = BTreeMap::new();
    for (date, value) in samples {
        let month = date.month();
        *row_counts.entry(month).or_insert(0) += 1;
        if let Some(v) = value {
            let entry = value_sums.entry(month).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }
    let per_month: BTreeMap<u32, f64> = if has_metric {
        value_sums
            .into_iter()
            .map(|(month, (sum, n))| (month, sum / n as f64))
            .collect()
    } else {
        row_counts
            .into_iter()
            .map(|(month, n)| (month, n as f64))
            .collect()
    };

    let baseline = per_month.values().sum::<f64>() / per_month.len() as f64;
    if baseline.abs() < f64::EPSILON {
        return SeasonalityOutcome::NoMaterialPattern;
    }

    let (&peak_month, &peak_value) = match per_month.iter().max_by(|a, b| a.1.total_cmp(b.1)) {
        Some(entry) => entry,
        None => return SeasonalityOutcome::NoMaterialPattern,
    };
    let (&low_month, &low_value) = match per_month.iter().min_by(|a, b| a.1.total_cmp(b.1)) {
        Some(entry) => entry,
        None => return SeasonalityOutcome::NoMaterialPattern,
    };

    let peak_deviation_pct = (peak_value - baseline) / baseline * 100.0;
    let low_deviation_pct = (low_value - baseline) / baseline * 100.0;

    if peak_deviation_pct >= cfg.seasonal_deviation_pct {
        let peak_month_name = month_name(peak_month).to_string();
        let description = format!(
            "activity peaks in {} ({:+.0}% vs monthly average), lowest in {}",
            peak_month_name,
            peak_deviation_pct,
            month_name(low_month)
        );
        SeasonalityOutcome::Pattern {
            peak_month,
            peak_month_name,
            peak_deviation_pct,
            low_month,
            low_deviation_pct,
            description,
        }
    } else {
        SeasonalityOutcome::NoMaterialPattern
    }
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "Unknown",
    }
}

/// Per-data-row temporal contexts for one table, index-aligned with
/// `table.rows`. A row whose primary date does not parse gets `None` —
/// a context is never fabricated.
pub fn row_contexts(table: &Table, meta: &TemporalMetadata) -> Vec<Option<TemporalContext>> {
    let effective: Vec<&String> = meta
        .effective_columns()
        .iter()
        .filter(|c| table.column_index(c).is_some())
        .collect();
    if effective.is_empty() {
        return vec![None; table.rows.len()];
    }

    // The primary date column is the start side of a known pair when one
    // applies to this table, otherwise the first effective column.
    let pair = meta
        .lead_time_stats
        .iter()
        .find(|p| {
            table.column_index(&p.start_column).is_some()
                && table.column_index(&p.end_column).is_some()
        })
        .map(|p| (p.start_column.clone(), p.end_column.clone()));
    let primary: String = match &pair {
        Some((start, _)) => start.clone(),
        None => effective[0].clone(),
    };
    let primary_idx = match table.column_index(&primary) {
        Some(idx) => idx,
        None => return vec![None; table.rows.len()],
    };
    let paired_idx = pair
        .as_ref()
        .and_then(|(_, end)| table.column_index(end));

    let primary_dates: Vec<Option<NaiveDate>> = table
        .rows
        .iter()
        .map(|row| row.get(primary_idx).and_then(|c| c.as_deref()).and_then(parse_flexible_date))
        .collect();

    // Metric for rolling statistics: the first mostly-numeric non-date
    // column, falling back to row counts when the table has none.
    let metric_idx = metric_column(table, &effective);
    let mut dated_metrics: Vec<(NaiveDate, f64)> = Vec::new();
    let mut monthly: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for (row, date) in table.rows.iter().zip(&primary_dates) {
        if let Some(date) = date {
            let value = metric_idx
                .and_then(|idx| row.get(idx).and_then(|c| c.as_deref()))
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(1.0);
            dated_metrics.push((*date, value));
            *monthly.entry((date.year(), date.month())).or_insert(0.0) += value;
        }
    }

    let seasonal_peak = match &meta.seasonality {
        Some(SeasonalityOutcome::Pattern {
            peak_month,
            peak_month_name,
            ..
        }) => Some((*peak_month, peak_month_name.clone())),
        _ => None,
    };

    table
        .rows
        .iter()
        .zip(&primary_dates)
        .map(|(row, date)| {
            let date = (*date)?;

            let paired_date = paired_idx
                .and_then(|idx| row.get(idx).and_then(|c| c.as_deref()))
                .and_then(parse_flexible_date);
            let lead_time_days = paired_date
                .map(|end| (end - date).num_days())
                .filter(|d| *d >= 0);

            let rolling_average_7d = window_average(&dated_metrics, date, 7);
            let rolling_average_30d = window_average(&dated_metrics, date, 30);

            let variation_vs_previous_period_pct = previous_month_variation(&monthly, date);

            let seasonal_label = seasonal_peak.as_ref().and_then(|(month, name)| {
                (date.month() == *month).then(|| format!("seasonal peak ({})", name))
            });

            Some(TemporalContext {
                date_column: primary.clone(),
                detected_date: date,
                paired_column: pair.as_ref().map(|(_, end)| end.clone()).filter(|_| paired_date.is_some()),
                paired_date,
                lead_time_days,
                rolling_average_7d,
                rolling_average_30d,
                variation_vs_previous_period_pct,
                seasonal_label,
            })
        })
        .collect()
}

/// Mean of the metric over the trailing window ending at `date`, inclusive.
fn window_average(dated_metrics: &[(NaiveDate, f64)], date: NaiveDate, days: i64) -> Option<f64> {
    let window_start = date - Duration::days(days);
    let window: Vec<f64> = dated_metrics
        .iter()
        .filter(|(d, _)| *d > window_start && *d <= date)
        .map(|(_, v)| *v)
        .collect();
    if window.is_empty() {
        None
    } else {
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }
}

fn metric_column(table: &Table, date_columns: &[&String]) -> Option<usize> {
    for (idx, column) in table.columns.iter().enumerate() {
        if date_columns.iter().any(|c| *c == column) {
            continue;
        }
        let mut non_empty = 0usize;
        let mut numeric = 0usize;
        for row in table.rows.iter().take(100) {
            if let Some(Some(value)) = row.get(idx) {
                if value.trim().is_empty() {
                    continue;
                }
                non_empty += 1;
                if value.trim().parse::<f64>().is_ok() {
                    numeric += 1;
                }
            }
        }
        if non_empty > 0 && numeric * 2 >= non_empty {
            return Some(idx);
        }
    }
    None
}

fn previous_month_variation(monthly: &BTreeMap<(i32, u32), f64>, date: NaiveDate) -> Option<f64> {
    let current = monthly.get(&(date.year(), date.month()))?;
    let (prev_year, prev_month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    let previous = monthly.get(&(prev_year, prev_month))?;
    if *previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            name: "test".to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|c| {
                            if c.is_empty() {
                                None
                            } else {
                                Some(c.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
            line_numbers: (2..rows.len() as u64 + 2).collect(),
        }
    }

    #[test]
    fn flexible_dates_resolve_day_first() {
        assert_eq!(
            parse_flexible_date("03/04/2025"),
            NaiveDate::from_ymd_opt(2025, 4, 3)
        );
        assert_eq!(
            parse_flexible_date("2025-12-01"),
            NaiveDate::from_ymd_opt(2025, 12, 1)
        );
        assert_eq!(
            parse_flexible_date("15.01.2026"),
            NaiveDate::from_ymd_opt(2026, 1, 15)
        );
        assert_eq!(
            parse_flexible_date("2025-12-01T08:30:00"),
            NaiveDate::from_ymd_opt(2025, 12, 1)
        );
        assert_eq!(parse_flexible_date("not a date"), None);
        assert_eq!(parse_flexible_date(""), None);
    }

    #[test]
    fn detection_requires_name_and_content() {
        let t = table(
            &["order_date", "product", "status_date"],
            &[
                &["2025-12-01", "Widget", "soon"],
                &["2025-12-02", "Bolt", "later"],
                &["2025-12-03", "Nut", "2025-12-05"],
            ],
        );
        let cfg = TemporalConfig::default();
        let detected = detect_date_columns(&t, &cfg);
        // order_date passes both gates; status_date passes the name gate but
        // only 1 of 3 values parses; product never passes the name gate.
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].0, "order_date");
        assert!((detected[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lifecycle_columns_are_denylisted() {
        let t = table(
            &["created_at", "updated_at", "delivery_date"],
            &[&["2025-01-01", "2025-01-02", "2025-01-10"]],
        );
        let detected = detect_date_columns(&t, &TemporalConfig::default());
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].0, "delivery_date");
    }

    #[test]
    fn french_columns_are_detected() {
        let t = table(
            &["produit", "date_commande", "date_livraison"],
            &[
                &["Boulon", "01/12/2025", "15/12/2025"],
                &["Vis", "02/12/2025", "10/12/2025"],
            ],
        );
        let detected = detect_date_columns(&t, &TemporalConfig::default());
        let names: Vec<&str> = detected.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["date_commande", "date_livraison"]);
    }

    #[test]
    fn two_columns_pair_positionally() {
        let cols = vec!["shipment_date".to_string(), "arrival_date".to_string()];
        let (pairs, ambiguous) = identify_pairs(&cols);
        assert!(!ambiguous);
        assert_eq!(
            pairs,
            vec![("shipment_date".to_string(), "arrival_date".to_string())]
        );
    }

    #[test]
    fn many_columns_pair_semantically_or_flag_ambiguity() {
        let cols: Vec<String> = ["order_date", "delivery_date", "due_date"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (pairs, ambiguous) = identify_pairs(&cols);
        assert!(!ambiguous);
        assert_eq!(
            pairs,
            vec![("order_date".to_string(), "delivery_date".to_string())]
        );

        let unmatched: Vec<String> = ["date_a", "date_b", "date_c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (pairs, ambiguous) = identify_pairs(&unmatched);
        assert!(pairs.is_empty());
        assert!(ambiguous);
    }

    #[test]
    fn lead_times_skip_invalid_and_negative_rows() {
        let t = table(
            &["order_date", "delivery_date"],
            &[
                &["2025-12-01", "2025-12-11"], // 10 days
                &["2025-12-01", "2025-12-21"], // 20 days
                &["garbage", "2025-12-05"],    // skipped
                &["2025-12-10", "2025-12-01"], // negative, dropped
            ],
        );
        let stats = calculate_lead_times(&t, "order_date", "delivery_date").unwrap();
        assert_eq!(stats.total_records, 2);
        assert!((stats.mean_days - 15.0).abs() < 1e-9);
        assert!((stats.median_days - 15.0).abs() < 1e-9);
        assert!((stats.min_days - 10.0).abs() < 1e-9);
        assert!((stats.max_days - 20.0).abs() < 1e-9);
    }

    #[test]
    fn short_history_reports_insufficient_for_seasonality() {
        let rows: Vec<Vec<String>> = (1..=28)
            .map(|d| vec![format!("2025-12-{:02}", d)])
            .collect();
        let owned: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(|s| s.as_str()).collect())
            .collect();
        let row_refs: Vec<&[&str]> = owned.iter().map(|r| r.as_slice()).collect();
        let t = table(&["order_date"], &row_refs);
        let meta = analyze_tables(&[t], &TemporalConfig::default(), None, Utc::now()).unwrap();
        match meta.seasonality {
            Some(SeasonalityOutcome::InsufficientHistory { months_covered }) => {
                assert!(months_covered < 6.0);
            }
            other => panic!("expected insufficient history, got {:?}", other),
        }
    }

    #[test]
    fn december_heavy_year_yields_a_peak_pattern() {
        // One order per month, except December which gets twelve.
        let mut rows: Vec<Vec<String>> = Vec::new();
        for month in 1..=12u32 {
            rows.push(vec![format!("2025-{:02}-10", month)]);
        }
        for day in 1..=11u32 {
            rows.push(vec![format!("2025-12-{:02}", day)]);
        }
        let owned: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(|s| s.as_str()).collect())
            .collect();
        let row_refs: Vec<&[&str]> = owned.iter().map(|r| r.as_slice()).collect();
        let t = table(&["order_date"], &row_refs);

        let meta = analyze_tables(&[t], &TemporalConfig::default(), None, Utc::now()).unwrap();
        match meta.seasonality {
            Some(SeasonalityOutcome::Pattern {
                peak_month,
                ref peak_month_name,
                peak_deviation_pct,
                ..
            }) => {
                assert_eq!(peak_month, 12);
                assert_eq!(peak_month_name, "December");
                assert!(peak_deviation_pct >= 15.0);
            }
            other => panic!("expected a seasonal pattern, got {:?}", other),
        }
    }

    #[test]
    fn monthly_sales_peak_is_detected_from_values_not_row_counts() {
        // One row per month, so counts are flat; only the sales figures
        // carry the December spike.
        let mut rows: Vec<Vec<String>> = Vec::new();
        for month in 1..=12u32 {
            let sales = if month == 12 { 250 } else { 100 };
            rows.push(vec![format!("2025-{:02}-10", month), sales.to_string()]);
        }
        let owned: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(|s| s.as_str()).collect())
            .collect();
        let row_refs: Vec<&[&str]> = owned.iter().map(|r| r.as_slice()).collect();
        let t = table(&["order_date", "sales"], &row_refs);

        let meta = analyze_tables(&[t], &TemporalConfig::default(), None, Utc::now()).unwrap();
        match meta.seasonality {
            Some(SeasonalityOutcome::Pattern {
                peak_month,
                ref peak_month_name,
                peak_deviation_pct,
                low_deviation_pct,
                ..
            }) => {
                assert_eq!(peak_month, 12);
                assert_eq!(peak_month_name, "December");
                // Baseline mean is 112.5, so December sits about 122% above.
                assert!((peak_deviation_pct - 122.2).abs() < 1.0);
                assert!(low_deviation_pct < 0.0);
            }
            other => panic!("expected a seasonal pattern, got {:?}", other),
        }
    }

    #[test]
    fn analysis_records_range_and_lead_time_pairs() {
        let t = table(
            &["product", "date_commande", "date_livraison", "quantite"],
            &[
                &["Boulon", "01/12/2025", "15/12/2025", "40"],
                &["Vis", "05/12/2025", "12/12/2025", "10"],
            ],
        );
        let meta = analyze_tables(&[t], &TemporalConfig::default(), None, Utc::now()).unwrap();
        assert_eq!(
            meta.detected_date_columns,
            vec!["date_commande", "date_livraison"]
        );
        let range = meta.time_range.unwrap();
        assert_eq!(range.earliest, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(range.latest, NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
        assert_eq!(meta.lead_time_stats.len(), 1);
        assert_eq!(meta.lead_time_stats[0].start_column, "date_commande");
        assert!(!meta.ambiguous_pairing);
    }

    #[test]
    fn override_survives_reanalysis_and_drives_stats() {
        let t = table(
            &["order_date", "delivery_date", "audit_date"],
            &[&["2025-12-01", "2025-12-15", "2026-01-01"]],
        );
        let first = analyze_tables(&[t.clone()], &TemporalConfig::default(), None, Utc::now())
            .unwrap();
        let mut overridden = first.clone();
        overridden.user_overridden_columns =
            Some(vec!["order_date".to_string(), "delivery_date".to_string()]);

        let second = analyze_tables(
            &[t],
            &TemporalConfig::default(),
            Some(&overridden),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            second.user_overridden_columns.as_deref(),
            Some(["order_date".to_string(), "delivery_date".to_string()].as_slice())
        );
        assert_eq!(
            second.effective_columns(),
            ["order_date".to_string(), "delivery_date".to_string()]
        );
        // Pairing happens over the overridden pair only.
        assert_eq!(second.lead_time_stats.len(), 1);
        assert_eq!(second.lead_time_stats[0].end_column, "delivery_date");
    }

    #[test]
    fn row_contexts_attach_dates_and_lead_times() {
        // Four of five order dates parse, which keeps the column at the
        // detection threshold despite the one bad value.
        let t = table(
            &["product", "order_date", "delivery_date", "qty"],
            &[
                &["Widget", "2025-12-01", "2025-12-15", "40"],
                &["Bolt", "garbage", "2025-12-10", "15"],
                &["Nut", "2025-12-04", "2025-12-12", "8"],
                &["Screw", "2025-12-05", "2025-12-16", "12"],
                &["Washer", "2025-12-06", "2025-12-18", "20"],
            ],
        );
        let meta = analyze_tables(
            std::slice::from_ref(&t),
            &TemporalConfig::default(),
            None,
            Utc::now(),
        )
        .unwrap();
        let contexts = row_contexts(&t, &meta);
        assert_eq!(contexts.len(), 5);

        let ctx = contexts[0].as_ref().unwrap();
        assert_eq!(ctx.date_column, "order_date");
        assert_eq!(ctx.detected_date, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(ctx.paired_column.as_deref(), Some("delivery_date"));
        assert_eq!(ctx.lead_time_days, Some(14));

        // Unparseable primary date: no context, never fabricated.
        assert!(contexts[1].is_none());
    }

    #[test]
    fn non_temporal_table_yields_no_contexts() {
        let t = table(&["product", "qty"], &[&["Widget", "4"]]);
        let meta = analyze_tables(
            std::slice::from_ref(&t),
            &TemporalConfig::default(),
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(meta.detected_date_columns.is_empty());
        let contexts = row_contexts(&t, &meta);
        assert_eq!(contexts, vec![None]);
    }
}
