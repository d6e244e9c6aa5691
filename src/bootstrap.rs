// src/bootstrap.rs
use crate::adapter::{build_embedder, AdapterDeps};
use crate::config::AppConfig;
use crate::dataset::{source, Resolver};
use crate::llm::{build_client_from_config, DynLlmClient};
use crate::router::QueryRouter;
use crate::selector::build_selector;
use tracing::{info, warn};

/// Config, LLM client and an initialised router, wired together.
pub struct RouterRuntime {
    pub cfg: AppConfig,
    pub llm: DynLlmClient,
    pub router: QueryRouter,
}

impl RouterRuntime {
    /// Build from config. A router left `Unavailable` is still returned;
    /// its queries fail with `NotInitialized`.
    pub async fn from_config(cfg: AppConfig) -> anyhow::Result<Self> {
        // Safe diagnostics: provider + enabled + whether a key is present
        info!(
            provider = %cfg.llm.provider,
            enabled = cfg.llm.enabled,
            has_key = !cfg.llm.api_key.is_empty(),
            api_url = cfg.data.api_url.as_deref().unwrap_or("-"),
            "router config loaded"
        );
        let llm = build_client_from_config(&cfg.llm);
        let remote = source::from_config(&cfg.data)?;
        let resolver = Resolver::new(remote);

        let deps = AdapterDeps {
            llm: None,
            embedder: build_embedder(&cfg.embedding, &cfg.llm),
        }
        .with_llm(llm.clone());
        let mut router = QueryRouter::new(build_selector(deps.llm.clone(), &cfg.selector));

        if let Err(e) = router.initialize(&cfg.datasets, &resolver, &deps).await {
            warn!(error = %e, "router initialisation failed");
        }
        Ok(Self { cfg, llm, router })
    }

    pub async fn load() -> anyhow::Result<Self> {
        Self::from_config(AppConfig::load()?).await
    }

    /// One throwaway completion to surface credential problems at startup.
    pub async fn quick_probe(&self) {
        if !self.llm.is_enabled() {
            info!("LLM probe skipped: LLM disabled");
            return;
        }
        match self.llm.complete("Reply with OK.").await {
            Ok(_) => info!(provider = self.llm.provider_name(), "LLM probe ok"),
            Err(e) => warn!(error = %e, provider = self.llm.provider_name(), "LLM probe failed"),
        }
    }
}
