//! LLM client layer: provider abstraction + file cache + daily limit.
//!
//! Real providers speak the OpenAI-compatible chat-completions protocol
//! (OpenRouter by default). `LLM_TEST_MODE=mock` swaps in a deterministic
//! mock so nothing leaves the process.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;

pub const ENV_LLM_TEST_MODE: &str = "LLM_TEST_MODE";

pub type LlmFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Trait object used by selectors and adapters.
pub trait LlmClient: Send + Sync {
    /// Single-turn completion; returns trimmed, non-empty text.
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// `false` only for [`DisabledClient`].
    fn is_enabled(&self) -> bool {
        true
    }
}

pub type DynLlmClient = Arc<dyn LlmClient>;

/// Factory: build a client according to config and environment variables.
///
/// * `LLM_TEST_MODE=mock` returns an echoing mock client.
/// * `enabled == false` returns a disabled client.
/// * Otherwise the chat-completions provider wrapped with caching + daily limit.
pub fn build_client_from_config(cfg: &LlmConfig) -> DynLlmClient {
    if std::env::var(ENV_LLM_TEST_MODE)
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
    {
        return Arc::new(MockProvider::echo());
    }
    if !cfg.enabled {
        return Arc::new(DisabledClient);
    }
    if cfg.provider == "mock" {
        return Arc::new(MockProvider::echo());
    }
    if cfg.api_key.is_empty() {
        warn!(provider = %cfg.provider, "LLM enabled without API key; disabling");
        return Arc::new(DisabledClient);
    }
    match ChatCompletionsProvider::from_config(cfg) {
        Ok(provider) => Arc::new(CachingClient::new(
            provider,
            cfg.cache_dir.clone(),
            cfg.daily_limit,
        )),
        Err(e) => {
            warn!(error = %e, "LLM provider init failed; disabling");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider doing the real remote call, wrapped by [`CachingClient`].
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a>;
    fn name(&self) -> &'static str;
    /// Part of the cache key, so switching models never serves stale answers.
    fn model(&self) -> &str;
}

/// OpenAI-compatible `/chat/completions` client (OpenRouter, OpenAI).
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    name: &'static str,
}

impl ChatCompletionsProvider {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fin-insights-router/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let name = match cfg.provider.as_str() {
            "openai" => "openai",
            _ => "openrouter",
        };
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            name,
        })
    }
}

impl Provider for ChatCompletionsProvider {
    fn fetch<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(LlmError::MissingApiKey);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                #[serde(default)]
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![Msg {
                    role: "user",
                    content: prompt,
                }],
                temperature: 0.0,
                max_tokens: self.max_tokens,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&req)
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
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            non_empty(&content)
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Always fails with [`LlmError::Disabled`]; used when the LLM is off.
pub struct DisabledClient;

impl LlmClient for DisabledClient {
    fn complete<'a>(&'a self, _prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(async { Err(LlmError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Fixed(String),
    Echo,
}

/// Deterministic provider for tests and offline runs. Counts calls.
pub struct MockProvider {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Fixed(reply.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self {
            reply: MockReply::Echo,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            MockReply::Fixed(s) => non_empty(s),
            MockReply::Echo => non_empty(prompt),
        }
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        let out = self.reply_for(prompt);
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
    fn model(&self) -> &str {
        "mock"
    }
}

impl LlmClient for MockProvider {
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        self.fetch(prompt)
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

fn non_empty(s: &str) -> Result<String, LlmError> {
    let t = s.trim();
    if t.is_empty() {
        Err(LlmError::Empty)
    } else {
        Ok(t.to_string())
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

pub struct CachingClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> CachingClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(error = %e, dir = %cache_dir.display(), "LLM cache dir unavailable");
        }
        let counter = Mutex::new(load_daily_counter(&cache_dir).unwrap_or_default());
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Real provider calls made today.
    pub fn calls_today(&self) -> u32 {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.roll_over();
        g.count
    }

    async fn complete_impl(&self, prompt: &str) -> Result<String, LlmError> {
        // Cache hits never count against the limit.
        let key = cache_key(self.inner.model(), prompt);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            debug!(key = &key[..12], "LLM cache hit");
            return Ok(hit.text);
        }

        {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            if g.roll_over() {
                let _ = save_daily_counter(&self.cache_dir, &g);
            }
            if g.count >= self.daily_limit {
                return Err(LlmError::DailyLimit(self.daily_limit));
            }
        }

        let fresh = self.inner.fetch(prompt).await?;
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &CacheEntry { text: fresh.clone() })
        {
            debug!(error = %e, "LLM cache write failed");
        }
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.count = g.count.saturating_add(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
        Ok(fresh)
    }
}

impl<P: Provider> LlmClient for CachingClient<P> {
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(self.complete_impl(prompt))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
}

fn cache_key(model: &str, prompt: &str) -> String {
    let mut h = Sha256::new();
    h.update(model.as_bytes());
    h.update(b"\n");
    h.update(prompt.as_bytes());
    format!("{:x}", h.finalize())
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CacheEntry> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

/// Write via a temp file + rename so readers never see a partial entry.
fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(body)?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, value: &CacheEntry) -> io::Result<()> {
    let json = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_atomic(&cache_path(dir, key), &json)
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    /// Reset on date change; returns whether a reset happened.
    fn roll_over(&mut self) -> bool {
        let now = today();
        if self.date != now {
            self.date = now;
            self.count = 0;
            true
        } else {
            false
        }
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let json = serde_json::to_vec(dc).map_err(io::Error::other)?;
    write_atomic(&counter_path(dir), &json)
}
