// src/adapter/structured.rs
//! Schema-constrained adapter for record datasets (stock series, credit stages).
//!
//! Queries are either path expressions (see [`PathQuery`]) or natural
//! language. Natural language goes through the LLM when one is configured
//! and through a deterministic keyword heuristic otherwise (or when the
//! model's answer is unusable).

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::path_query::{Literal, Op, PathQuery, Predicate};
use super::{AdapterKind, QueryAdapter, QueryResponse, MAX_ROWS};
use crate::dataset::dates::{format_date, parse_date_str};
use crate::dataset::schema::{FieldType, Schema};
use crate::dataset::{Payload, Record, ResolvedDataset};
use crate::error::QueryError;
use crate::llm::DynLlmClient;

/// Phrase → field synonyms; only entries whose field is in the schema apply.
/// Matching is whole-word and tolerates a plural `s`.
const SYNONYMS: &[(&str, &str)] = &[
    ("stage as last month", "Stage As last Month"),
    ("last month stage", "Stage As last Month"),
    ("previous stage", "Stage As last Month"),
    ("current stage", "Current Stage"),
    ("stage", "Current Stage"),
    ("days past due", "DPD"),
    ("past due", "DPD"),
    ("dpd", "DPD"),
    ("credit expiration", "Credit Expiration"),
    ("expiration", "Credit Expiration"),
    ("maturity", "Credit Expiration"),
    ("closing price", "Close"),
    ("close", "Close"),
    ("closed", "Close"),
    ("opening price", "Open"),
    ("open", "Open"),
    ("opened", "Open"),
    ("highest", "High"),
    ("high", "High"),
    ("lowest", "Low"),
    ("low", "Low"),
    ("volume", "Volume"),
    ("traded", "Volume"),
    ("price", "Close"),
];

struct Mention {
    re: Regex,
    field: String,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

pub struct StructuredAdapter {
    dataset_id: String,
    label: String,
    schema: Schema,
    payload: Arc<Payload>,
    llm: Option<DynLlmClient>,
    mentions: Vec<Mention>,
}

impl StructuredAdapter {
    pub fn new(ds: &ResolvedDataset, llm: Option<DynLlmClient>) -> Result<Self> {
        if ds.payload.records().is_none() {
            anyhow::bail!("dataset '{}' does not hold records", ds.source.id);
        }
        let schema = Schema::for_kind(ds.source.kind);
        let mentions = build_mentions(&schema)?;
        Ok(Self {
            dataset_id: ds.source.id.clone(),
            label: ds.source.label.clone(),
            schema,
            payload: ds.payload.clone(),
            llm,
            mentions,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows(&self) -> &[Record] {
        self.payload.records().unwrap_or_default()
    }

    /// Validate a query against the label and schema and canonicalise field
    /// names and literals. Never reads the payload.
    pub fn check(&self, q: &PathQuery) -> Result<PathQuery, QueryError> {
        if let Some(d) = &q.dataset {
            let d = d.trim();
            if !d.eq_ignore_ascii_case(&self.label) && !d.eq_ignore_ascii_case(&self.dataset_id) {
                return Err(QueryError::WrongDataset {
                    expected: self.label.clone(),
                    found: d.to_string(),
                });
            }
        }
        for name in q.fields() {
            if !self.schema.has_field(name) {
                return Err(QueryError::UnknownField(name.to_string()));
            }
        }

        let mut out = q.clone();
        for p in &mut out.predicates {
            let spec = self
                .schema
                .field(&p.field)
                .ok_or_else(|| QueryError::UnknownField(p.field.clone()))?;
            p.field = spec.name.clone();
            p.value = coerce(spec.ty, &p.field, &p.value)?;
        }
        if let Some(proj) = &mut out.projection {
            if let Some(spec) = self.schema.field(proj) {
                *proj = spec.name.clone();
            }
        }
        Ok(out)
    }

    /// Execute a checked query.
    pub fn run(&self, q: &PathQuery) -> QueryResponse {
        let mut matched: Vec<&Record> = self
            .rows()
            .iter()
            .filter(|r| q.predicates.iter().all(|p| self.holds(r, p)))
            .collect();
        if let Some(n) = q.tail {
            let skip = matched.len().saturating_sub(n);
            matched.drain(..skip);
        }
        let total = matched.len();
        let date_field = self.schema.date_field().map(|f| f.name.clone());

        match &q.projection {
            Some(field) => {
                let key_field = date_field.filter(|d| d != field);
                let values = matched
                    .iter()
                    .take(MAX_ROWS)
                    .map(|r| {
                        let key = key_field
                            .as_ref()
                            .and_then(|k| r.get(k))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        (key, r.get(field).cloned().unwrap_or(Value::Null))
                    })
                    .collect();
                QueryResponse::Values {
                    field: field.clone(),
                    values,
                    total,
                }
            }
            None => QueryResponse::Records {
                rows: matched.into_iter().take(MAX_ROWS).cloned().collect(),
                total,
            },
        }
    }

    fn holds(&self, row: &Record, p: &Predicate) -> bool {
        let Some(cell) = row.get(&p.field) else {
            return false;
        };
        let ty = self.schema.field(&p.field).map(|f| f.ty);
        let ord = match (&p.value, ty) {
            (Literal::Num(n), _) => cell.as_f64().and_then(|c| c.partial_cmp(n)),
            (Literal::Str(s), Some(FieldType::String)) => cell
                .as_str()
                .map(|c| c.to_lowercase().cmp(&s.to_lowercase())),
            (Literal::Str(s), _) => cell.as_str().map(|c| c.cmp(s.as_str())),
        };
        ord.is_some_and(|o| p.op.holds(o))
    }

    async fn translate(&self, text: &str) -> Option<PathQuery> {
        let llm = self.llm.as_ref()?;
        let prompt = translation_prompt(&self.label, &self.schema, text);
        let answer = match llm.complete(&prompt).await {
            Ok(a) => a,
            Err(e) => {
                debug!(error = %e, dataset = %self.dataset_id, "query translation failed");
                return None;
            }
        };
        let path = extract_path(&answer)?;
        match PathQuery::parse(&path, |n| self.schema.has_field(n))
            .and_then(|q| self.check(&q))
        {
            Ok(q) => Some(q),
            Err(e) => {
                debug!(error = %e, dataset = %self.dataset_id, "translated query rejected");
                None
            }
        }
    }

    /// Keyword heuristic: dates become `Date ==` predicates, comparator
    /// phrases become numeric predicates, remaining field mentions become
    /// the projection.
    pub fn heuristic(&self, text: &str) -> Result<PathQuery, QueryError> {
        let lower = text.to_lowercase();
        let mentions = self.find_mentions(&lower);
        let mut q = PathQuery::default();

        for caps in comparator_re().captures_iter(&lower) {
            let (Some(whole), Some(num)) = (caps.get(0), caps.get(3)) else {
                continue;
            };
            let op_word = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            let Some(op) = comparator_op(op_word) else {
                continue;
            };
            let Some((_, field)) = mentions.iter().rev().find(|(s, _)| s.end <= whole.start())
            else {
                continue;
            };
            let Ok(n) = num.as_str().parse::<f64>() else {
                continue;
            };
            q.predicates.push(Predicate {
                field: field.clone(),
                op,
                value: Literal::Num(n),
            });
        }

        for (span, field) in &mentions {
            let is_int = self.schema.field(field).map(|f| f.ty) == Some(FieldType::Integer);
            if !is_int || q.predicates.iter().any(|p| &p.field == field) {
                continue;
            }
            if let Some(n) = bare_number_after(&lower[span.end..]) {
                q.predicates.push(Predicate {
                    field: field.clone(),
                    op: Op::Eq,
                    value: Literal::Num(n),
                });
            }
        }

        let date_field = self.schema.date_field().map(|f| f.name.clone());
        if let (Some(df), Some(d)) = (&date_field, find_date(text)) {
            q.predicates.push(Predicate {
                field: df.clone(),
                op: Op::Eq,
                value: Literal::Str(format_date(d)),
            });
        }

        q.projection = mentions
            .iter()
            .map(|(_, f)| f)
            .find(|f| {
                Some(*f) != date_field.as_ref() && !q.predicates.iter().any(|p| &p.field == *f)
            })
            .cloned();

        q.tail = tail_hint(&lower)?;
        if date_field.is_some() && q.predicates.iter().any(|p| Some(&p.field) == date_field.as_ref())
        {
            q.tail = None;
        }

        if q.predicates.is_empty() && q.projection.is_none() && q.tail.is_none() {
            return Err(QueryError::Untranslatable(text.trim().to_string()));
        }
        self.check(&q)
    }

    /// Non-overlapping field mentions in text order, longest phrase first.
    fn find_mentions(&self, lower: &str) -> Vec<(Span, String)> {
        let mut found: Vec<(Span, String)> = Vec::new();
        for m in &self.mentions {
            for hit in m.re.find_iter(lower) {
                let span = Span {
                    start: hit.start(),
                    end: hit.end(),
                };
                let overlaps = found
                    .iter()
                    .any(|(s, _)| span.start < s.end && s.start < span.end);
                if !overlaps {
                    found.push((span, m.field.clone()));
                }
            }
        }
        found.sort_by_key(|(s, _)| s.start);
        found
    }
}

#[async_trait]
impl QueryAdapter for StructuredAdapter {
    async fn query(&self, text: &str) -> Result<QueryResponse> {
        let text = text.trim();
        let q = if text.starts_with('$') {
            let parsed = PathQuery::parse(text, |n| self.schema.has_field(n))?;
            self.check(&parsed)?
        } else {
            match self.translate(text).await {
                Some(q) => q,
                None => self.heuristic(text)?,
            }
        };
        debug!(dataset = %self.dataset_id, query = %q, "structured query");
        Ok(self.run(&q))
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Structured
    }

    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }
}

/// Bring a literal to the field's type.
fn coerce(ty: FieldType, field: &str, v: &Literal) -> Result<Literal, QueryError> {
    let mismatch = || QueryError::TypeMismatch {
        field: field.to_string(),
        value: v.to_string(),
    };
    match (ty, v) {
        (FieldType::Integer | FieldType::Number, Literal::Num(_)) => Ok(v.clone()),
        (FieldType::Integer | FieldType::Number, Literal::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Literal::Num)
            .map_err(|_| mismatch()),
        (FieldType::Date, Literal::Str(s)) => parse_date_str(s)
            .map(|d| Literal::Str(format_date(d)))
            .ok_or_else(mismatch),
        (FieldType::Date, Literal::Num(_)) => Err(mismatch()),
        (FieldType::String, Literal::Str(_)) => Ok(v.clone()),
        (FieldType::String, Literal::Num(n)) => Ok(Literal::Str(n.to_string())),
    }
}

fn build_mentions(schema: &Schema) -> Result<Vec<Mention>> {
    let mut phrases: Vec<(String, String)> = SYNONYMS
        .iter()
        .filter(|(_, f)| schema.has_field(f))
        .map(|(p, f)| (p.to_string(), f.to_string()))
        .collect();
    for f in schema.fields() {
        let lower = f.name.to_lowercase();
        if !phrases.iter().any(|(p, _)| *p == lower) {
            phrases.push((lower, f.name.clone()));
        }
    }
    phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    phrases
        .into_iter()
        .map(|(p, field)| {
            let re = Regex::new(&format!(r"\b{}s?\b", regex::escape(&p)))?;
            Ok(Mention { re, field })
        })
        .collect()
}

fn comparator_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:\b(greater than|more than|higher than|less than|fewer than|lower than|at least|at most|equal to|equals|exactly|exceeding|above|over|below|under)\b|(>=|<=|>|<|=))\s*(-?\d+(?:\.\d+)?)\b",
        )
        .expect("valid comparator regex")
    })
}

fn comparator_op(word: &str) -> Option<Op> {
    Some(match word {
        "greater than" | "more than" | "higher than" | "exceeding" | "above" | "over" | ">" => {
            Op::Gt
        }
        "less than" | "fewer than" | "lower than" | "below" | "under" | "<" => Op::Lt,
        "at least" | ">=" => Op::Ge,
        "at most" | "<=" => Op::Le,
        "equal to" | "equals" | "exactly" | "=" => Op::Eq,
        _ => return None,
    })
}

/// `"stage 2"`, `"dpd of 0"`, `"stage is 1"`; not a date like `2024-06-14`.
fn bare_number_after(rest: &str) -> Option<f64> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^\s+(?:of\s+|is\s+|was\s+)?(-?\d+)(?:[^\d\-/.]|$)").expect("valid regex")
    });
    re.captures(rest)?.get(1)?.as_str().parse().ok()
}

fn find_date(text: &str) -> Option<NaiveDate> {
    static ISO: OnceCell<Regex> = OnceCell::new();
    static LONG: OnceCell<Regex> = OnceCell::new();
    let iso = ISO.get_or_init(|| {
        Regex::new(r"\b(\d{4}-\d{1,2}-\d{1,2}|\d{4}/\d{1,2}/\d{1,2}|\d{1,2}/\d{1,2}/\d{4})\b")
            .expect("valid regex")
    });
    if let Some(d) = iso.find_iter(text).find_map(|m| parse_date_str(m.as_str())) {
        return Some(d);
    }
    let long = LONG.get_or_init(|| {
        Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
            .expect("valid regex")
    });
    long.captures_iter(text).find_map(|c| {
        let s = format!("{} {} {}", c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str());
        NaiveDate::parse_from_str(&s, "%B %d %Y")
            .or_else(|_| NaiveDate::parse_from_str(&s, "%b %d %Y"))
            .ok()
    })
}

/// Row count from "last N days" style phrases; "latest" alone means one.
fn tail_hint(lower: &str) -> Result<Option<usize>, QueryError> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\b(?:last|past|latest|recent)\s+(\d{1,4})\s+(?:days|rows|records|sessions|entries|trading days)\b")
            .expect("valid regex")
    });
    if let Some(n) = re
        .captures(lower)
        .and_then(|c| c.get(1)?.as_str().parse::<usize>().ok())
    {
        if n == 0 {
            return Err(QueryError::Parse(format!("no rows in '{lower}'")));
        }
        return Ok(Some(n));
    }
    let latest = lower.contains("latest")
        || lower.contains("most recent")
        || (lower.contains("last") && !lower.contains("last month"));
    Ok(latest.then_some(1))
}

fn translation_prompt(label: &str, schema: &Schema, question: &str) -> String {
    format!(
        "You translate questions about the dataset \"{label}\" into one query.\n\
         Rows follow this JSON schema: {schema}\n\
         Query grammar: $.{label}[?(@.Field op value && ...)].Field with op one of == != > >= < <=, \
         string and date values in single quotes (dates as 'YYYY-MM-DD'), optional [-N:] for the last N rows.\n\
         Reply with the query alone on its first line.\n\
         Question: {question}",
        schema = schema.to_json_schema()
    )
}

/// First line of a model answer that looks like a path (backticks allowed).
fn extract_path(answer: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\s*`*(\$[^`\n]*)`*\s*$").expect("valid regex"));
    re.captures(answer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetKind, DatasetSource, Freshness};
    use crate::llm::MockProvider;
    use serde_json::json;

    fn resolved(kind: DatasetKind, label: &str, rows: Value) -> ResolvedDataset {
        let recs = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        ResolvedDataset {
            source: DatasetSource::new(&label.to_lowercase(), kind, label, "T", "d"),
            payload: Arc::new(Payload::Records(recs)),
            freshness: Freshness::Local,
            warnings: vec![],
        }
    }

    fn apple() -> StructuredAdapter {
        let rows = json!([
            {"Date": "2024-06-12", "Close": 213.07, "Open": 207.37, "High": 220.2, "Low": 206.9, "Volume": 198134300},
            {"Date": "2024-06-13", "Close": 214.24, "Open": 214.74, "High": 216.75, "Low": 211.6, "Volume": 97862700},
            {"Date": "2024-06-14", "Close": 212.49, "Open": 213.85, "High": 215.17, "Low": 211.3, "Volume": 70122700},
        ]);
        StructuredAdapter::new(&resolved(DatasetKind::Stock, "Apple", rows), None).unwrap()
    }

    fn credit() -> StructuredAdapter {
        let rows = json!([
            {"Credit Expiration": 92, "DPD": 0, "Current Stage": 1, "FS": "Yes"},
            {"Credit Expiration": 245, "DPD": 45, "Current Stage": 2, "FS": "No"},
            {"Credit Expiration": 0, "DPD": 120, "Current Stage": 2, "FS": "no"},
        ]);
        StructuredAdapter::new(&resolved(DatasetKind::Credit, "cleaned", rows), None).unwrap()
    }

    #[tokio::test]
    async fn path_query_projects_value() {
        let r = apple()
            .query("$.Apple[?(@.Date == '2024-06-14')].Close")
            .await
            .unwrap();
        assert_eq!(
            r,
            QueryResponse::Values {
                field: "Close".into(),
                values: vec![(Some("2024-06-14".into()), json!(212.49))],
                total: 1
            }
        );
    }

    #[tokio::test]
    async fn natural_language_closing_price() {
        let r = apple()
            .query("What was Apple's closing price on 2024-06-14?")
            .await
            .unwrap();
        match r {
            QueryResponse::Values { field, values, .. } => {
                assert_eq!(field, "Close");
                assert_eq!(values[0].1, json!(212.49));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_field_and_wrong_dataset_rejected() {
        let a = apple();
        let q = PathQuery::parse("$.Apple[?(@.Ticker == 'AAPL')]", |_| false).unwrap();
        assert_eq!(a.check(&q), Err(QueryError::UnknownField("Ticker".into())));

        let q = PathQuery::parse("$.Meta.Close", |_| true).unwrap();
        assert!(matches!(a.check(&q), Err(QueryError::WrongDataset { .. })));

        let q = PathQuery::parse("$[?(@.Close > 'abc')]", |_| true).unwrap();
        assert!(matches!(a.check(&q), Err(QueryError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn unknown_field_surfaces_as_query_error() {
        let err = apple().query("$.Apple.Dividend").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::UnknownField("Dividend".into()))
        );
    }

    #[test]
    fn heuristic_credit_filters() {
        let c = credit();
        let q = c.heuristic("Which loans are in stage 2 with dpd above 60?").unwrap();
        assert_eq!(q.predicates.len(), 2);
        assert!(q.projection.is_none());
        match c.run(&q) {
            QueryResponse::Records { rows, total } => {
                assert_eq!(total, 1);
                assert_eq!(rows[0]["DPD"], 120);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_fields_compare_case_insensitively() {
        let c = credit();
        let q = c
            .check(&PathQuery::parse("$[?(@.FS == 'NO')]", |_| true).unwrap())
            .unwrap();
        match c.run(&q) {
            QueryResponse::Records { total, .. } => assert_eq!(total, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn heuristic_latest_and_tail() {
        let a = apple();
        let q = a.heuristic("latest volume").unwrap();
        assert_eq!(q.tail, Some(1));
        assert_eq!(q.projection.as_deref(), Some("Volume"));

        let q = a.heuristic("closing prices over the last 2 days").unwrap();
        assert_eq!(q.tail, Some(2));
        match a.run(&q) {
            QueryResponse::Values { values, total, .. } => {
                assert_eq!(total, 2);
                assert_eq!(values[0].0.as_deref(), Some("2024-06-13"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            a.heuristic("closing prices over the last 0 days"),
            Err(QueryError::Parse(_))
        ));
    }

    #[test]
    fn heuristic_long_date_form() {
        let q = apple().heuristic("open on June 13, 2024").unwrap();
        assert_eq!(q.predicates[0].value, Literal::Str("2024-06-13".into()));
        assert_eq!(q.projection.as_deref(), Some("Open"));
    }

    #[test]
    fn untranslatable_text() {
        assert!(matches!(
            apple().heuristic("tell me a joke"),
            Err(QueryError::Untranslatable(_))
        ));
    }

    #[tokio::test]
    async fn llm_translation_is_used_when_valid() {
        let rows = json!([
            {"Credit Expiration": 92, "DPD": 0, "Current Stage": 1},
            {"Credit Expiration": 0, "DPD": 0, "Current Stage": 2},
        ]);
        let llm: DynLlmClient = Arc::new(MockProvider::fixed(
            "`$.cleaned[?(@['Current Stage'] == 2)].Credit Expiration`",
        ));
        let a = StructuredAdapter::new(&resolved(DatasetKind::Credit, "cleaned", rows), Some(llm))
            .unwrap();
        let r = a.query("expiry for stage two credits?").await.unwrap();
        match r {
            QueryResponse::Values { field, values, .. } => {
                assert_eq!(field, "Credit Expiration");
                assert_eq!(values, vec![(None, json!(0))]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unusable_llm_answer_falls_back_to_heuristic() {
        let rows = json!([{"Date": "2024-06-14", "Close": 1.5, "Open": 1.0, "High": 2.0, "Low": 0.5, "Volume": 3}]);
        let llm: DynLlmClient = Arc::new(MockProvider::fixed("$.Apple.Dividend"));
        let a = StructuredAdapter::new(&resolved(DatasetKind::Stock, "Apple", rows), Some(llm))
            .unwrap();
        let r = a.query("closing price on 2024-06-14").await.unwrap();
        assert!(matches!(r, QueryResponse::Values { total: 1, .. }));
    }
}
