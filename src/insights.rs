// src/insights.rs
//! Summary figures over resolved datasets (KPIs, distributions, comparison
//! series). Pure functions over payloads; no I/O.

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dataset::dates::{format_date, parse_date};
use crate::dataset::{DatasetKind, Freshness, Record, ResolvedDataset};

/// Window for the "recent rows" table, counted back from the last date.
pub const RECENT_DAYS: i64 = 30;
/// Rows per series in tables and the comparison chart.
pub const HEAD_ROWS: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum InsightError {
    #[error("dataset '{dataset}' is not a {expected} dataset")]
    WrongKind {
        dataset: String,
        expected: &'static str,
    },
    #[error("no data available for {0}")]
    Empty(String),
}

fn cell<'a>(row: &'a Record, field: &str) -> Option<&'a Value> {
    row.get(field).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)
    })
}

fn num(row: &Record, field: &str) -> Option<f64> {
    cell(row, field).and_then(Value::as_f64)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn records<'a>(
    ds: &'a ResolvedDataset,
    kind: DatasetKind,
    expected: &'static str,
) -> Result<&'a [Record], InsightError> {
    let rows = match ds.payload.records() {
        Some(rows) if ds.source.kind == kind => rows,
        _ => {
            return Err(InsightError::WrongKind {
                dataset: ds.source.id.clone(),
                expected,
            })
        }
    };
    if rows.is_empty() {
        return Err(InsightError::Empty(ds.source.label.clone()));
    }
    Ok(rows)
}

// ------------------------------------------------------------
// Stocks
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StockKpis {
    pub dataset: String,
    pub label: String,
    pub freshness: Freshness,
    pub last_close: Option<f64>,
    /// `None` with fewer than two rows.
    pub daily_change_pct: Option<f64>,
    pub last_volume: Option<Value>,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    /// Rows from the last 30 days, at most 100.
    pub recent: Vec<Record>,
}

impl StockKpis {
    /// `"+1.23%"` style, or `"N/A"`.
    pub fn daily_change_display(&self) -> String {
        match self.daily_change_pct {
            Some(c) => format!("{c:+.2}%"),
            None => "N/A".to_string(),
        }
    }
}

/// Rows are already sorted by date at resolution time.
pub fn stock_kpis(ds: &ResolvedDataset) -> Result<StockKpis, InsightError> {
    let rows = records(ds, DatasetKind::Stock, "stock")?;
    let last = &rows[rows.len() - 1];
    let last_close = num(last, "Close");

    let daily_change_pct = match rows.len() {
        0 | 1 => None,
        n => match (num(&rows[n - 2], "Close"), last_close) {
            (Some(prev), Some(cur)) if prev != 0.0 => Some(round2((cur - prev) / prev * 100.0)),
            _ => None,
        },
    };

    let first_day = cell(&rows[0], "Date").and_then(parse_date);
    let last_day = cell(last, "Date").and_then(parse_date);
    let recent = match last_day {
        Some(end) => {
            let start = end - Duration::days(RECENT_DAYS);
            rows.iter()
                .filter(|r| cell(r, "Date").and_then(parse_date).is_some_and(|d| d >= start))
                .take(HEAD_ROWS)
                .cloned()
                .collect()
        }
        None => Vec::new(),
    };

    Ok(StockKpis {
        dataset: ds.source.id.clone(),
        label: ds.source.label.clone(),
        freshness: ds.freshness,
        last_close,
        daily_change_pct,
        last_volume: cell(last, "Volume").cloned(),
        first_date: first_day.map(format_date),
        last_date: last_day.map(format_date),
        recent,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonSeries {
    pub dataset: String,
    pub label: String,
    /// `(date, close)` pairs.
    pub points: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockComparison {
    pub series: Vec<ComparisonSeries>,
    /// Stock datasets skipped for lack of data.
    pub skipped: Vec<String>,
}

/// First 100 closes of every stock dataset.
pub fn stock_comparison<'a>(
    datasets: impl IntoIterator<Item = &'a ResolvedDataset>,
) -> Result<StockComparison, InsightError> {
    let mut series = Vec::new();
    let mut skipped = Vec::new();
    for ds in datasets {
        if ds.source.kind != DatasetKind::Stock {
            continue;
        }
        let points: Vec<(String, f64)> = ds
            .payload
            .records()
            .unwrap_or_default()
            .iter()
            .filter_map(|r| {
                let date = cell(r, "Date").and_then(parse_date)?;
                Some((format_date(date), num(r, "Close")?))
            })
            .take(HEAD_ROWS)
            .collect();
        if points.is_empty() {
            skipped.push(ds.source.label.clone());
            continue;
        }
        series.push(ComparisonSeries {
            dataset: ds.source.id.clone(),
            label: ds.source.label.clone(),
            points,
        });
    }
    if series.is_empty() {
        return Err(InsightError::Empty("stock comparison".into()));
    }
    Ok(StockComparison { series, skipped })
}

// ------------------------------------------------------------
// Credit
// ------------------------------------------------------------

/// Inclusive upper bounds; the last bucket is open-ended.
const DPD_BUCKETS: &[(&str, Option<f64>)] = &[
    ("0", Some(0.0)),
    ("1-30", Some(30.0)),
    ("31-60", Some(60.0)),
    ("61-90", Some(90.0)),
    ("90+", None),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Bucket {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    pub dataset: String,
    pub rows: usize,
    /// Mean days to credit expiration.
    pub avg_credit_expiration: Option<f64>,
    pub stage_counts: BTreeMap<String, usize>,
    pub dpd_buckets: Vec<Bucket>,
}

pub fn credit_summary(ds: &ResolvedDataset) -> Result<CreditSummary, InsightError> {
    let rows = records(ds, DatasetKind::Credit, "credit")?;

    let expirations: Vec<f64> = rows
        .iter()
        .filter_map(|r| num(r, "Credit Expiration"))
        .collect();
    let avg_credit_expiration = (!expirations.is_empty())
        .then(|| round2(expirations.iter().sum::<f64>() / expirations.len() as f64));

    let mut stage_counts = BTreeMap::new();
    for r in rows {
        let stage = match cell(r, "Current Stage") {
            Some(Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => "unknown".to_string(),
        };
        *stage_counts.entry(stage).or_insert(0) += 1;
    }

    let mut counts = vec![0usize; DPD_BUCKETS.len()];
    for dpd in rows.iter().filter_map(|r| num(r, "DPD")) {
        let i = DPD_BUCKETS
            .iter()
            .position(|(_, upper)| upper.map_or(true, |u| dpd <= u))
            .unwrap_or(DPD_BUCKETS.len() - 1);
        counts[i] += 1;
    }
    let dpd_buckets = DPD_BUCKETS
        .iter()
        .zip(counts)
        .map(|((label, _), count)| Bucket {
            label: label.to_string(),
            count,
        })
        .collect();

    Ok(CreditSummary {
        dataset: ds.source.id.clone(),
        rows: rows.len(),
        avg_credit_expiration,
        stage_counts,
        dpd_buckets,
    })
}

// ------------------------------------------------------------
// Phrasebank
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SentimentSummary {
    pub dataset: String,
    pub total: usize,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    /// Every label, including ones outside positive/neutral/negative.
    pub distribution: BTreeMap<String, usize>,
}

pub fn sentiment_summary(ds: &ResolvedDataset) -> Result<SentimentSummary, InsightError> {
    let phrases = match ds.payload.phrases() {
        Some(p) => p,
        None => {
            return Err(InsightError::WrongKind {
                dataset: ds.source.id.clone(),
                expected: "phrasebank",
            })
        }
    };
    if phrases.is_empty() {
        return Err(InsightError::Empty(ds.source.label.clone()));
    }
    let mut distribution = BTreeMap::new();
    for p in phrases {
        *distribution.entry(p.sentiment.clone()).or_insert(0) += 1;
    }
    let get = |k: &str| {
        distribution
            .iter()
            .filter(|(label, _)| label.eq_ignore_ascii_case(k))
            .map(|(_, n)| n)
            .sum()
    };
    Ok(SentimentSummary {
        dataset: ds.source.id.clone(),
        total: phrases.len(),
        positive: get("positive"),
        neutral: get("neutral"),
        negative: get("negative"),
        distribution,
    })
}
