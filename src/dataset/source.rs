// src/dataset/source.rs
//! Remote data API access (`GET {api_url}/data/{id}`).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DataConfig;
use crate::error::SourceError;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the raw JSON body for one dataset endpoint.
    async fn fetch(&self, dataset_id: &str) -> Result<Value, SourceError>;
    fn name(&self) -> &'static str;
}

/// HTTP client for the data API. Proxies are ignored: the API is expected on
/// a local or private address.
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fin-insights-router/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url_for(&self, dataset_id: &str) -> String {
        format!("{}/data/{}", self.base_url, dataset_id)
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, dataset_id: &str) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(self.url_for(dataset_id))
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Used when no API URL is configured; every fetch fails over to the next tier.
pub struct OfflineSource;

#[async_trait]
impl RemoteSource for OfflineSource {
    async fn fetch(&self, _dataset_id: &str) -> Result<Value, SourceError> {
        Err(SourceError::RemoteDisabled)
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Pick the remote source for a data config.
pub fn from_config(cfg: &DataConfig) -> Result<Arc<dyn RemoteSource>, SourceError> {
    match cfg.api_url.as_deref() {
        Some(url) => Ok(Arc::new(HttpSource::new(
            url,
            cfg.timeout(),
            cfg.connect_timeout(),
        )?)),
        None => Ok(Arc::new(OfflineSource)),
    }
}
