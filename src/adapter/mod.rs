// src/adapter/mod.rs
//! Dataset adapters: one resolved dataset behind a uniform `query(text)`.

pub mod embedding;
pub mod path_query;
pub mod semantic;
pub mod structured;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::dataset::{DatasetKind, Record, ResolvedDataset};
use crate::llm::DynLlmClient;

pub use embedding::{build_embedder, DynEmbedder, Embedder, HashingEmbedder, VectorIndex};
pub use path_query::PathQuery;
pub use semantic::SemanticAdapter;
pub use structured::StructuredAdapter;

/// Rows kept in a structured response; the rest are only counted.
pub const MAX_ROWS: usize = 20;

/// What an adapter returns; the executor turns it into text.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Text(String),
    /// Projected values, each optionally keyed by the row's date.
    Values {
        field: String,
        values: Vec<(Option<String>, Value)>,
        total: usize,
    },
    Records { rows: Vec<Record>, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Structured,
    Semantic,
}

#[async_trait]
pub trait QueryAdapter: Send + Sync {
    async fn query(&self, text: &str) -> Result<QueryResponse>;
    fn kind(&self) -> AdapterKind;
    fn dataset_id(&self) -> &str;
}

/// Shared collaborators for adapter construction.
#[derive(Clone)]
pub struct AdapterDeps {
    /// `None` disables LLM translation and synthesis.
    pub llm: Option<DynLlmClient>,
    pub embedder: DynEmbedder,
}

impl AdapterDeps {
    /// Hashing embeddings, no LLM.
    pub fn offline(dimension: usize) -> Self {
        Self {
            llm: None,
            embedder: Arc::new(HashingEmbedder::new(dimension)),
        }
    }

    pub fn with_llm(mut self, llm: DynLlmClient) -> Self {
        self.llm = llm.is_enabled().then_some(llm);
        self
    }
}

/// Build the adapter matching the dataset's kind.
pub async fn build_adapter(
    ds: &ResolvedDataset,
    deps: &AdapterDeps,
) -> Result<Arc<dyn QueryAdapter>> {
    if ds.payload.is_empty() {
        bail!("dataset '{}' has no rows", ds.source.id);
    }
    let adapter: Arc<dyn QueryAdapter> = match ds.source.kind {
        DatasetKind::Stock | DatasetKind::Credit => {
            Arc::new(StructuredAdapter::new(ds, deps.llm.clone())?)
        }
        DatasetKind::Phrasebank => Arc::new(
            SemanticAdapter::build(ds, deps.embedder.clone(), deps.llm.clone()).await?,
        ),
    };
    Ok(adapter)
}
