// src/dataset/mod.rs
//! Datasets: kinds, payloads, freshness and the default source table.

pub mod dates;
pub mod resolver;
pub mod samples;
pub mod schema;
pub mod source;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub use resolver::Resolver;
pub use schema::Schema;
pub use source::{HttpSource, OfflineSource, RemoteSource};

/// One JSON object row (stock bar or credit record).
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Per-company daily OHLCV series.
    Stock,
    /// `text@label` sentiment phrases.
    Phrasebank,
    /// Credit-stage records.
    Credit,
}

/// Which resolution tier produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Remote,
    Local,
    Sample,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Sample => "sample",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub text: String,
    pub sentiment: String,
}

/// Validated dataset content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Records(Vec<Record>),
    Phrases(Vec<Phrase>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Records(r) => r.len(),
            Self::Phrases(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Option<&[Record]> {
        match self {
            Self::Records(r) => Some(r),
            Self::Phrases(_) => None,
        }
    }

    pub fn phrases(&self) -> Option<&[Phrase]> {
        match self {
            Self::Phrases(p) => Some(p),
            Self::Records(_) => None,
        }
    }
}

fn yes() -> bool {
    true
}

/// Where a dataset lives and how it is presented to the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSource {
    /// Remote endpoint id: `GET {api_url}/data/{id}`.
    pub id: String,
    pub kind: DatasetKind,
    /// Human label, also the key for `{"<label>": [...]}` stock payloads.
    pub label: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    pub tool_name: String,
    pub description: String,
    /// Exhausting every tier is logged as an error instead of a warning.
    #[serde(default)]
    pub required: bool,
    #[serde(default = "yes")]
    pub use_sample: bool,
}

impl DatasetSource {
    pub fn new(
        id: &str,
        kind: DatasetKind,
        label: &str,
        tool_name: &str,
        description: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind,
            label: label.to_string(),
            local_path: None,
            tool_name: tool_name.to_string(),
            description: description.to_string(),
            required: false,
            use_sample: true,
        }
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn without_sample(mut self) -> Self {
        self.use_sample = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn endpoint_path(&self) -> String {
        format!("data/{}", self.id)
    }
}

/// Datasets served by the original deployment.
pub fn default_sources() -> Vec<DatasetSource> {
    vec![
        DatasetSource::new(
            "apple",
            DatasetKind::Stock,
            "Apple",
            "Apple_Financials",
            "Use this for questions about Apple's financial data.",
        )
        .with_local_path("data/stock_AAPL-1.json"),
        DatasetSource::new(
            "meta",
            DatasetKind::Stock,
            "Meta",
            "Meta_Financials",
            "Use this for questions about Meta's financial data.",
        )
        .with_local_path("data/stock_META-1.json"),
        DatasetSource::new(
            "microsoft",
            DatasetKind::Stock,
            "Microsoft",
            "Microsoft_Financials",
            "Use this for questions about Microsoft's financial data.",
        )
        .with_local_path("data/stock_MSFT-1.json"),
        DatasetSource::new(
            "financial_phrasebank",
            DatasetKind::Phrasebank,
            "Financial Phrasebank",
            "Phrasebank_Tool",
            "Use this to search phrases and sentiments in the financial phrasebank.",
        )
        .with_local_path("data/financial_phrasebank.json"),
        DatasetSource::new(
            "cleaned",
            DatasetKind::Credit,
            "cleaned",
            "Stage_Tool",
            "Use this for questions about company credit and maturity stages.",
        )
        .with_local_path("data/cleaned.json"),
    ]
}

/// A dataset after tiered resolution.
#[derive(Debug, Clone)]
pub struct ResolvedDataset {
    pub source: DatasetSource,
    pub payload: Arc<Payload>,
    pub freshness: Freshness,
    /// Tier failures encountered before `freshness` succeeded.
    pub warnings: Vec<String>,
}
