// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod adapter;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod insights;
pub mod llm;
pub mod metrics;
pub mod router;
pub mod selector;
pub mod session;
pub mod tasks;

// ---- Re-exports for stable public API ----
pub use crate::error::RouterError;
pub use crate::router::{QueryRouter, RouterState, ToolDescriptor};

use axum::Router;
use tracing::info;

/// Build the full HTTP app from `config/router.toml` (or defaults):
/// resolve datasets, initialise the router and mount `/metrics`.
pub async fn app() -> anyhow::Result<Router> {
    let metrics = metrics::Metrics::init()?;
    let runtime = bootstrap::RouterRuntime::load().await?;
    runtime.quick_probe().await;
    info!(
        state = ?runtime.router.state(),
        tools = runtime.router.tools().len(),
        "app built"
    );
    let state = api::AppState::new(runtime.router);
    Ok(api::create_router(state).merge(metrics.router()))
}
