// src/adapter/semantic.rs
//! Nearest-neighbour adapter over the phrasebank.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::embedding::{DynEmbedder, Hit, VectorIndex};
use super::{AdapterKind, QueryAdapter, QueryResponse};
use crate::dataset::ResolvedDataset;
use crate::llm::DynLlmClient;

pub const TOP_K: usize = 3;

/// How retrieved passages become an answer.
pub enum Synthesis {
    Llm(DynLlmClient),
    /// Lists the hits with their similarity.
    Extractive,
}

pub struct SemanticAdapter {
    dataset_id: String,
    label: String,
    docs: Vec<String>,
    index: VectorIndex,
    embedder: DynEmbedder,
    synthesis: Synthesis,
    top_k: usize,
}

impl SemanticAdapter {
    /// Embed every phrase once, as `"<text> (Sentiment: <label>)"`.
    pub async fn build(
        ds: &ResolvedDataset,
        embedder: DynEmbedder,
        llm: Option<DynLlmClient>,
    ) -> Result<Self> {
        let phrases = ds
            .payload
            .phrases()
            .with_context(|| format!("dataset '{}' does not hold phrases", ds.source.id))?;

        let mut docs = Vec::with_capacity(phrases.len());
        let mut index = VectorIndex::default();
        for p in phrases {
            let doc = format!("{} (Sentiment: {})", p.text, p.sentiment);
            let v = embedder.embed(&doc).await.with_context(|| {
                format!("embedding '{}' with {}", ds.source.id, embedder.name())
            })?;
            index.push(v);
            docs.push(doc);
        }

        Ok(Self {
            dataset_id: ds.source.id.clone(),
            label: ds.source.label.clone(),
            docs,
            index,
            embedder,
            synthesis: llm.map_or(Synthesis::Extractive, Synthesis::Llm),
            top_k: TOP_K,
        })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Top-k documents for `text`, most similar first.
    pub async fn retrieve(&self, text: &str) -> Result<Vec<(&str, f32)>> {
        let q = self
            .embedder
            .embed(text)
            .await
            .context("embedding query")?;
        Ok(self
            .index
            .search(&q, self.top_k)
            .into_iter()
            .filter_map(|Hit { index, similarity }| {
                self.docs.get(index).map(|d| (d.as_str(), similarity))
            })
            .collect())
    }

    fn extractive(&self, hits: &[(&str, f32)]) -> String {
        if hits.is_empty() {
            return format!("No matching phrases in {}.", self.label);
        }
        let mut out = format!("Closest phrases in {}:", self.label);
        for (i, (doc, sim)) in hits.iter().enumerate() {
            out.push_str(&format!("\n{}. {} [similarity {:.2}]", i + 1, doc, sim));
        }
        out
    }
}

fn synthesis_prompt(context: &[(&str, f32)], question: &str) -> String {
    let ctx = context
        .iter()
        .map(|(d, _)| *d)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {ctx}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}

#[async_trait]
impl QueryAdapter for SemanticAdapter {
    async fn query(&self, text: &str) -> Result<QueryResponse> {
        let hits = self.retrieve(text).await?;
        let answer = match &self.synthesis {
            Synthesis::Llm(llm) if !hits.is_empty() => {
                match llm.complete(&synthesis_prompt(&hits, text)).await {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(
                            error = %e,
                            dataset = %self.dataset_id,
                            "synthesis failed; extractive answer"
                        );
                        self.extractive(&hits)
                    }
                }
            }
            _ => self.extractive(&hits),
        };
        Ok(QueryResponse::Text(answer))
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Semantic
    }

    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }
}
