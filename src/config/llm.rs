// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const ENV_LLM_API_KEY: &str = "LLM_API_KEY";

fn default_provider() -> String {
    "openrouter".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "mistralai/mixtral-8x7b-instruct".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_daily_limit() -> u32 {
    200
}
fn default_timeout_ms() -> u64 {
    20_000
}
fn default_connect_timeout_ms() -> u64 {
    4_000
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/llm")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openrouter" | "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from LLM_API_KEY, then the provider's own variable.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Real provider calls per day; cache hits do not count.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: default_api_key(),
            max_tokens: default_max_tokens(),
            daily_limit: default_daily_limit(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl LlmConfig {
    /// Lowercase the provider, clamp limits and resolve an `"ENV"` key.
    /// Only an enabled, non-mock provider requires a key.
    pub fn normalize(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            match self.key_from_env() {
                Some(k) => self.api_key = k,
                None if self.enabled && self.provider != "mock" => {
                    anyhow::bail!(
                        "Missing {ENV_LLM_API_KEY} (or provider key) env var for provider '{}'",
                        self.provider
                    )
                }
                None => self.api_key.clear(),
            }
        }
        Ok(())
    }

    fn key_from_env(&self) -> Option<String> {
        let provider_var = match self.provider.as_str() {
            "openrouter" => Some("OPENROUTER_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        };
        std::iter::once(ENV_LLM_API_KEY)
            .chain(provider_var)
            .filter_map(|k| env::var(k).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_resolved_by_provider() {
        env::remove_var(ENV_LLM_API_KEY);
        env::set_var("OPENAI_API_KEY", "sk-test");
        let mut cfg = LlmConfig {
            enabled: true,
            provider: "OpenAI".into(),
            ..LlmConfig::default()
        };
        cfg.normalize().unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        env::remove_var("OPENAI_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_key_only_fails_when_enabled() {
        env::remove_var(ENV_LLM_API_KEY);
        env::remove_var("OPENROUTER_API_KEY");
        let mut off = LlmConfig::default();
        assert!(off.normalize().is_ok());
        assert!(off.api_key.is_empty());

        let mut on = LlmConfig {
            enabled: true,
            ..LlmConfig::default()
        };
        assert!(on.normalize().is_err());

        let mut mock = LlmConfig {
            enabled: true,
            provider: "mock".into(),
            ..LlmConfig::default()
        };
        assert!(mock.normalize().is_ok());
    }
}
