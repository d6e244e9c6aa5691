// src/dataset/samples.rs
//! Built-in synthetic payloads, used as the last resolution tier.
//!
//! Samples are produced as raw JSON and go through the same validation as
//! remote or local payloads.

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use super::{DatasetKind, DatasetSource};
use crate::dataset::dates::format_date;

const SAMPLE_DAYS: i64 = 193;

/// Trend parameters for one synthetic price series.
#[derive(Debug, Clone, Copy)]
struct Trend {
    base: f64,
    step: f64,
    cycle: u32,
    volume_base: i64,
    volume_step: i64,
}

const APPLE: Trend = Trend {
    base: 150.0,
    step: 0.3,
    cycle: 8,
    volume_base: 2_000_000,
    volume_step: 2_000,
};
const META: Trend = Trend {
    base: 300.0,
    step: 0.5,
    cycle: 10,
    volume_base: 1_000_000,
    volume_step: 1_000,
};
const MICROSOFT: Trend = Trend {
    base: 250.0,
    step: 0.4,
    cycle: 7,
    volume_base: 1_500_000,
    volume_step: 1_500,
};
const GENERIC: Trend = Trend {
    base: 100.0,
    step: 0.2,
    cycle: 5,
    volume_base: 500_000,
    volume_step: 500,
};

fn trend_for(label: &str) -> Trend {
    match label.trim().to_ascii_lowercase().as_str() {
        "apple" | "aapl" => APPLE,
        "meta" | "facebook" => META,
        "microsoft" | "msft" => MICROSOFT,
        _ => GENERIC,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn stock_rows(t: Trend) -> Value {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN);
    let rows: Vec<Value> = (0..SAMPLE_DAYS)
        .map(|i| {
            let drift = i as f64 * t.step;
            let wobble = (i as u32 % t.cycle) as f64;
            json!({
                "Date": format_date(start + Duration::days(i)),
                "Close": round2(t.base + drift + wobble),
                "Open": round2(t.base - 2.0 + drift + wobble),
                "High": round2(t.base + 2.0 + drift + wobble),
                "Low": round2(t.base - 4.0 + drift + wobble),
                "Volume": t.volume_base + i * t.volume_step,
            })
        })
        .collect();
    Value::Array(rows)
}

fn credit_rows() -> Value {
    json!([
        {"Credit Expiration": 92, "DPD": 0, "Current Stage": 1},
        {"Credit Expiration": 245, "DPD": 0, "Current Stage": 1},
        {"Credit Expiration": 0, "DPD": 0, "Current Stage": 2},
    ])
}

fn phrase_rows() -> Value {
    json!([
        "Apple stock rises after strong earnings@positive",
        "Meta faces regulatory challenges@negative",
    ])
}

/// Raw sample for `source`, or `None` when samples are disabled for it.
pub fn sample_for(source: &DatasetSource) -> Option<Value> {
    if !source.use_sample {
        return None;
    }
    Some(match source.kind {
        DatasetKind::Stock => stock_rows(trend_for(&source.label)),
        DatasetKind::Credit => credit_rows(),
        DatasetKind::Phrasebank => phrase_rows(),
    })
}
