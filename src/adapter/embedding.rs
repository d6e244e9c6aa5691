// src/adapter/embedding.rs
//! Text embeddings and the in-memory vector index used by the semantic adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::LlmError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
    fn name(&self) -> &'static str;
}

pub type DynEmbedder = Arc<dyn Embedder>;

/// Deterministic bag-of-words embedder: each lowercase token is hashed into
/// a signed bucket, then the vector is L2-normalised. No network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for tok in tokens(text) {
            let digest = Sha256::digest(tok.as_bytes());
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_sync(text))
    }
    fn name(&self) -> &'static str {
        "hashing"
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// OpenAI-compatible `POST {base}/embeddings`.
pub struct RemoteEmbedder {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(cfg: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self, LlmError> {
        if llm.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(llm.connect_timeout_ms))
            .timeout(Duration::from_millis(llm.timeout_ms))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let base = cfg.base_url.as_deref().unwrap_or(&llm.base_url);
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key: llm.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            embedding: Vec<f32>,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LlmError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|i| i.embedding)
            .filter(|e| !e.is_empty())
            .ok_or(LlmError::Empty)
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Pick the embedder for the configured provider. Unknown providers and a
/// remote provider without credentials fall back to hashing.
pub fn build_embedder(cfg: &EmbeddingConfig, llm: &LlmConfig) -> DynEmbedder {
    match cfg.provider.as_str() {
        "openai" | "remote" => match RemoteEmbedder::new(cfg, llm) {
            Ok(e) => Arc::new(e),
            Err(e) => {
                tracing::warn!(error = %e, "remote embedder unavailable; using hashing");
                Arc::new(HashingEmbedder::new(cfg.dimension))
            }
        },
        _ => Arc::new(HashingEmbedder::new(cfg.dimension)),
    }
}

/// Cosine similarity; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Position in insertion order.
    pub index: usize,
    pub similarity: f32,
}

/// Flat in-memory index; insertion order breaks similarity ties.
#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn push(&mut self, v: Vec<f32>) -> usize {
        self.vectors.push(v);
        self.vectors.len() - 1
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<Hit> {
        let mut hits: Vec<Hit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, v)| Hit {
                index,
                similarity: cosine_similarity(query, v),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_normalised() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_sync("Apple stock rises");
        let b = e.embed_sync("apple STOCK rises!");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed_sync("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn index_ranks_overlap_higher() {
        let e = HashingEmbedder::new(256);
        let mut idx = VectorIndex::default();
        idx.push(e.embed_sync("Meta faces regulatory challenges (Sentiment: negative)"));
        idx.push(e.embed_sync("Apple stock rises after strong earnings (Sentiment: positive)"));
        let hits = idx.search(&e.embed_sync("strong earnings apple"), 3);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 1);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
