// src/dataset/resolver.rs
//! Tiered dataset resolution: remote API, then local JSON file, then the
//! built-in sample. Every tier goes through the same validation.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::dates::{format_date, parse_date};
use super::schema::Schema;
use super::{
    samples, DatasetKind, DatasetSource, Freshness, Payload, Phrase, Record, RemoteSource,
    ResolvedDataset,
};
use crate::error::{RouterError, SchemaError, SourceError};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "resolver_tier_total",
            "Dataset resolution attempts per tier and outcome."
        );
    });
}

fn record_tier(source: &DatasetSource, tier: Freshness, outcome: &'static str) {
    counter!(
        "resolver_tier_total",
        "dataset" => source.id.clone(),
        "tier" => tier.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub struct Resolver {
    remote: Arc<dyn RemoteSource>,
}

impl Resolver {
    pub fn new(remote: Arc<dyn RemoteSource>) -> Self {
        Self { remote }
    }

    /// Resolver without a remote tier.
    pub fn offline() -> Self {
        Self::new(Arc::new(super::OfflineSource))
    }

    /// Resolve one dataset. Tier failures are collected as warnings; only
    /// exhausting every tier is an error.
    pub async fn resolve(&self, source: &DatasetSource) -> Result<ResolvedDataset, RouterError> {
        ensure_metrics_described();
        let mut warnings = Vec::new();

        let remote = self
            .remote
            .fetch(&source.id)
            .await
            .and_then(|raw| Ok(parse_rows(source, raw)?));
        match remote {
            Ok(parsed) => return Ok(finish(source, parsed, Freshness::Remote, warnings)),
            Err(SourceError::RemoteDisabled) => {
                debug!(dataset = %source.id, remote = self.remote.name(), "remote tier disabled");
                record_tier(source, Freshness::Remote, "skipped");
            }
            Err(e) => tier_failed(source, Freshness::Remote, &e, &mut warnings),
        }

        if let Some(path) = &source.local_path {
            let local = read_local(path)
                .await
                .and_then(|raw| Ok(parse_rows(source, raw)?));
            match local {
                Ok(parsed) => return Ok(finish(source, parsed, Freshness::Local, warnings)),
                Err(e) => tier_failed(source, Freshness::Local, &e, &mut warnings),
            }
        } else {
            record_tier(source, Freshness::Local, "skipped");
        }

        match samples::sample_for(source) {
            Some(raw) => match parse_rows(source, raw) {
                Ok(parsed) => return Ok(finish(source, parsed, Freshness::Sample, warnings)),
                Err(e) => {
                    let err = SourceError::from(e);
                    tier_failed(source, Freshness::Sample, &err, &mut warnings)
                }
            },
            None => record_tier(source, Freshness::Sample, "skipped"),
        }

        let reason = if warnings.is_empty() {
            "no resolution tier configured".to_string()
        } else {
            warnings.join("; ")
        };
        if source.required {
            error!(dataset = %source.id, %reason, "required dataset unavailable");
        } else {
            warn!(dataset = %source.id, %reason, "dataset unavailable");
        }
        Err(RouterError::SourceUnavailable {
            dataset: source.id.clone(),
            reason,
        })
    }
}

fn finish(
    source: &DatasetSource,
    (payload, skipped): (Payload, usize),
    freshness: Freshness,
    mut warnings: Vec<String>,
) -> ResolvedDataset {
    record_tier(source, freshness, "ok");
    if skipped > 0 {
        warn!(dataset = %source.id, tier = freshness.as_str(), skipped, "invalid rows skipped");
        warnings.push(format!("{}: skipped {skipped} invalid rows", freshness.as_str()));
    }
    info!(
        dataset = %source.id,
        freshness = freshness.as_str(),
        rows = payload.len(),
        "dataset resolved"
    );
    ResolvedDataset {
        source: source.clone(),
        payload: Arc::new(payload),
        freshness,
        warnings,
    }
}

fn tier_failed(
    source: &DatasetSource,
    tier: Freshness,
    err: &SourceError,
    warnings: &mut Vec<String>,
) {
    warn!(dataset = %source.id, tier = tier.as_str(), error = %err, "tier failed");
    record_tier(source, tier, "error");
    warnings.push(format!("{}: {}", tier.as_str(), err));
}

async fn read_local(path: &Path) -> Result<Value, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound(path.display().to_string())
        } else {
            SourceError::Io(e.to_string())
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
}

// ------------------------------------------------------------
// Validation
// ------------------------------------------------------------

/// Validate a raw JSON body against the dataset's kind.
pub fn parse_payload(source: &DatasetSource, raw: Value) -> Result<Payload, SchemaError> {
    parse_rows(source, raw).map(|(payload, _)| payload)
}

/// Like [`parse_payload`], also returning how many rows were dropped.
fn parse_rows(source: &DatasetSource, raw: Value) -> Result<(Payload, usize), SchemaError> {
    let items = unwrap_rows(source, raw)?;
    if items.is_empty() {
        return Err(SchemaError::Empty);
    }
    match source.kind {
        DatasetKind::Stock => {
            parse_stock(source, items).map(|(rows, skipped)| (Payload::Records(rows), skipped))
        }
        DatasetKind::Credit => {
            parse_credit(items).map(|(rows, skipped)| (Payload::Records(rows), skipped))
        }
        DatasetKind::Phrasebank => parse_phrases(items).map(|p| (Payload::Phrases(p), 0)),
    }
}

/// Accept a bare array, or an object keyed by the dataset label or id.
fn unwrap_rows(source: &DatasetSource, raw: Value) -> Result<Vec<Value>, SchemaError> {
    match raw {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            let key = map
                .keys()
                .find(|k| {
                    k.eq_ignore_ascii_case(&source.label) || k.eq_ignore_ascii_case(&source.id)
                })
                .cloned();
            match key.and_then(|k| map.remove(&k)) {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(SchemaError::Shape {
                    expected: "array or object keyed by dataset label",
                    found: "object".to_string(),
                }),
            }
        }
        other => Err(SchemaError::Shape {
            expected: "array",
            found: json_type(&other).to_string(),
        }),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn into_records(items: Vec<Value>) -> Result<Vec<Record>, SchemaError> {
    items
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => Ok(m),
            other => Err(SchemaError::Shape {
                expected: "object rows",
                found: json_type(&other).to_string(),
            }),
        })
        .collect()
}

/// Fails only when a required column is empty in every row. Rows holding a
/// wrongly typed cell are dropped; gaps are kept.
fn check_records(schema: &Schema, rows: Vec<Record>) -> Result<(Vec<Record>, usize), SchemaError> {
    let missing = schema.missing_required(&rows);
    if !missing.is_empty() {
        return Err(SchemaError::MissingFields(missing.join(", ")));
    }
    let total = rows.len();
    let mut first_err = None;
    let kept: Vec<Record> = rows
        .into_iter()
        .filter(|r| match schema.validate_record(r) {
            Ok(()) => true,
            Err(e) => {
                first_err.get_or_insert(e);
                false
            }
        })
        .collect();
    match first_err {
        Some(e) if kept.is_empty() => Err(e),
        _ => {
            let skipped = total - kept.len();
            Ok((kept, skipped))
        }
    }
}

fn parse_stock(
    source: &DatasetSource,
    items: Vec<Value>,
) -> Result<(Vec<Record>, usize), SchemaError> {
    let records = into_records(items)?;
    let total = records.len();
    let rows: Vec<Record> = records
        .into_iter()
        .filter_map(|mut r| {
            let date = r.get("Date").and_then(parse_date)?;
            r.insert("Date".to_string(), Value::String(format_date(date)));
            Some(r)
        })
        .collect();
    if rows.is_empty() {
        return Err(SchemaError::NoValidDates(source.label.clone()));
    }
    let undated = total - rows.len();
    let (mut rows, invalid) = check_records(&Schema::stock(), rows)?;
    rows.sort_by(|a, b| date_key(a).cmp(date_key(b)));
    Ok((rows, undated + invalid))
}

fn date_key(r: &Record) -> &str {
    r.get("Date").and_then(Value::as_str).unwrap_or_default()
}

fn parse_credit(items: Vec<Value>) -> Result<(Vec<Record>, usize), SchemaError> {
    check_records(&Schema::credit(), into_records(items)?)
}

fn phrase_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(.*)@(\w+)\s*$").expect("valid phrase regex"))
}

fn field_ci<'a>(m: &'a Record, names: &[&str]) -> Option<&'a str> {
    m.iter()
        .find(|(k, _)| names.iter().any(|n| k.eq_ignore_ascii_case(n)))
        .and_then(|(_, v)| v.as_str())
}

fn parse_phrases(items: Vec<Value>) -> Result<Vec<Phrase>, SchemaError> {
    let mut out = Vec::with_capacity(items.len());
    let mut unlabelled = 0usize;
    for item in items {
        let parsed = match &item {
            Value::String(s) => phrase_re().captures(s).and_then(|c| {
                Some((c.get(1)?.as_str().trim(), c.get(2)?.as_str().to_string()))
            }),
            Value::Object(m) => match (
                field_ci(m, &["Text", "Sentence"]),
                field_ci(m, &["Sentiment", "Label"]),
            ) {
                (Some(t), Some(l)) if !l.trim().is_empty() => Some((t.trim(), l.trim().to_string())),
                _ => None,
            },
            _ => None,
        };
        match parsed {
            Some((text, label)) => out.push(Phrase {
                text: text.to_string(),
                sentiment: label,
            }),
            None => unlabelled += 1,
        }
    }
    if unlabelled > 0 {
        return Err(SchemaError::MissingLabels(unlabelled));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRemote {
        body: Option<Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for FixedRemote {
        async fn fetch(&self, _id: &str) -> Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body.clone().ok_or(SourceError::Status(500))
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn apple() -> DatasetSource {
        DatasetSource::new("apple", DatasetKind::Stock, "Apple", "Apple_Financials", "d")
    }

    fn bar(date: Value, close: f64) -> Value {
        json!({"Date": date, "Close": close, "Open": 1.0, "High": 2.0, "Low": 0.5, "Volume": 10})
    }

    #[test]
    fn stock_rows_are_normalised_sorted_and_filtered() {
        let raw = json!({"Apple": [
            bar(json!("2024-06-14T00:00:00Z"), 212.49),
            bar(json!("garbage"), 1.0),
            bar(json!("2024-06-13"), 214.24),
        ]});
        let p = parse_payload(&apple(), raw).unwrap();
        let rows = p.records().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Date"], "2024-06-13");
        assert_eq!(rows[1]["Date"], "2024-06-14");
    }

    #[test]
    fn stock_without_dates_or_columns_fails() {
        let raw = json!([bar(json!("nope"), 1.0)]);
        assert_eq!(
            parse_payload(&apple(), raw),
            Err(SchemaError::NoValidDates("Apple".into()))
        );
        let raw = json!([{"Date": "2024-01-02", "Close": 3.0}]);
        assert!(matches!(
            parse_payload(&apple(), raw),
            Err(SchemaError::MissingFields(_))
        ));
        assert_eq!(parse_payload(&apple(), json!([])), Err(SchemaError::Empty));
    }

    #[test]
    fn phrases_parse_from_strings_and_objects() {
        let src = DatasetSource::new("pb", DatasetKind::Phrasebank, "pb", "T", "d");
        let raw = json!([
            "Sales grew 5 % @positive",
            {"Text": "Costs flat", "Sentiment": "Neutral"}
        ]);
        let p = parse_payload(&src, raw).unwrap();
        let ph = p.phrases().unwrap();
        assert_eq!(ph[0].text, "Sales grew 5 %");
        assert_eq!(ph[0].sentiment, "positive");
        assert_eq!(ph[1].sentiment, "Neutral");

        let bad = json!(["no label here", "ok@negative"]);
        assert_eq!(parse_payload(&src, bad), Err(SchemaError::MissingLabels(1)));
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_sample() {
        let remote = Arc::new(FixedRemote {
            body: None,
            calls: AtomicUsize::new(0),
        });
        let r = Resolver::new(remote.clone());
        let ds = r.resolve(&apple()).await.unwrap();
        assert_eq!(ds.freshness, Freshness::Sample);
        assert_eq!(ds.warnings.len(), 1);
        assert!(ds.warnings[0].starts_with("remote:"));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_tiers_exhausted_is_unavailable() {
        let r = Resolver::offline();
        let src = apple()
            .with_local_path("/definitely/not/here.json")
            .without_sample();
        let err = r.resolve(&src).await.unwrap_err();
        match err {
            RouterError::SourceUnavailable { dataset, reason } => {
                assert_eq!(dataset, "apple");
                assert!(reason.contains("local file not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
