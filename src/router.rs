// src/router.rs
//! Query router: resolves datasets into tools once, then answers queries by
//! selecting one tool per query and running it.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{build_adapter, AdapterDeps, AdapterKind, QueryAdapter};
use crate::dataset::{DatasetKind, DatasetSource, Freshness, ResolvedDataset, Resolver};
use crate::error::RouterError;
use crate::executor;
use crate::selector::Selector;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("router_queries_total", "Answered queries by outcome.");
        describe_counter!("router_selected_total", "Tool selections by tool name.");
        describe_histogram!("router_answer_ms", "End-to-end answer latency in ms.");
    });
}

/// Short, stable id for a query so raw text stays out of info logs.
pub fn query_id(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// What the selector sees for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub dataset_id: String,
}

impl ToolDescriptor {
    pub fn from_source(source: &DatasetSource) -> Self {
        Self {
            name: source.tool_name.clone(),
            description: source.description.clone(),
            dataset_id: source.id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Tool {
    pub descriptor: ToolDescriptor,
    pub adapter: Arc<dyn QueryAdapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Uninitialized,
    Ready,
    /// Initialisation produced no tools. Terminal.
    Unavailable,
}

/// Per-dataset outcome of initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    pub id: String,
    pub kind: DatasetKind,
    pub label: String,
    pub freshness: Option<Freshness>,
    pub rows: usize,
    pub warnings: Vec<String>,
    pub tool: Option<String>,
    pub adapter: Option<AdapterKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedAnswer {
    pub text: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct QueryRouter {
    state: RouterState,
    selector: Box<dyn Selector>,
    tools: Vec<Tool>,
    descriptors: Vec<ToolDescriptor>,
    resolved: Vec<ResolvedDataset>,
    status: Vec<DatasetStatus>,
}

impl QueryRouter {
    pub fn new(selector: Box<dyn Selector>) -> Self {
        ensure_metrics_described();
        Self {
            state: RouterState::Uninitialized,
            selector,
            tools: Vec::new(),
            descriptors: Vec::new(),
            resolved: Vec::new(),
            status: Vec::new(),
        }
    }

    /// Resolve every source and build one tool per usable dataset.
    ///
    /// Datasets that fail resolution or adapter construction are omitted.
    /// With zero tools the router becomes `Unavailable`.
    pub async fn initialize(
        &mut self,
        sources: &[DatasetSource],
        resolver: &Resolver,
        deps: &AdapterDeps,
    ) -> Result<usize, RouterError> {
        if self.state != RouterState::Uninitialized {
            return Err(RouterError::AlreadyInitialized);
        }

        for source in sources {
            let mut status = DatasetStatus {
                id: source.id.clone(),
                kind: source.kind,
                label: source.label.clone(),
                freshness: None,
                rows: 0,
                warnings: Vec::new(),
                tool: None,
                adapter: None,
            };

            let ds = match resolver.resolve(source).await {
                Ok(ds) => ds,
                Err(e) => {
                    status.warnings.push(e.to_string());
                    self.status.push(status);
                    continue;
                }
            };
            status.freshness = Some(ds.freshness);
            status.rows = ds.payload.len();
            status.warnings = ds.warnings.clone();

            match build_adapter(&ds, deps).await {
                Ok(adapter) => {
                    let descriptor = ToolDescriptor::from_source(source);
                    status.tool = Some(descriptor.name.clone());
                    status.adapter = Some(adapter.kind());
                    self.descriptors.push(descriptor.clone());
                    self.tools.push(Tool {
                        descriptor,
                        adapter,
                    });
                }
                Err(e) => {
                    warn!(error = ?e, dataset = %source.id, "adapter build failed; dataset omitted");
                    status.warnings.push(format!("adapter: {e:#}"));
                }
            }
            self.resolved.push(ds);
            self.status.push(status);
        }

        if self.tools.is_empty() {
            self.state = RouterState::Unavailable;
            warn!(datasets = sources.len(), "router unavailable: no tools");
            return Err(RouterError::NoAdaptersAvailable);
        }
        self.state = RouterState::Ready;
        info!(
            tools = self.tools.len(),
            datasets = sources.len(),
            selector = self.selector.name(),
            "router ready"
        );
        Ok(self.tools.len())
    }

    pub async fn answer(&self, query: &str) -> Result<String, RouterError> {
        self.route(query, None).await.map(|a| a.text)
    }

    pub async fn answer_with_criteria(
        &self,
        query: &str,
        criteria: &str,
    ) -> Result<String, RouterError> {
        self.route(query, Some(criteria)).await.map(|a| a.text)
    }

    /// Select a tool and run the query against it.
    pub async fn route(
        &self,
        query: &str,
        criteria: Option<&str>,
    ) -> Result<RoutedAnswer, RouterError> {
        let started = Instant::now();
        let result = self.route_inner(query, criteria).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!("router_queries_total", "outcome" => outcome).increment(1);
        histogram!("router_answer_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn route_inner(
        &self,
        query: &str,
        criteria: Option<&str>,
    ) -> Result<RoutedAnswer, RouterError> {
        if self.state != RouterState::Ready {
            return Err(RouterError::NotInitialized);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(RouterError::EmptyQuery);
        }
        let qid = query_id(query);
        debug!(query_id = %qid, query, "routing query");

        let selection = self
            .selector
            .select(query, &self.descriptors)
            .await
            .map_err(|e| {
                warn!(query_id = %qid, error = %e, "selection failed");
                RouterError::SelectionFailure(e.to_string())
            })?;
        let tool = self.tools.get(selection.index).ok_or_else(|| {
            RouterError::SelectionFailure(format!("selected index {} has no tool", selection.index))
        })?;
        counter!("router_selected_total", "tool" => tool.descriptor.name.clone()).increment(1);
        info!(
            query_id = %qid,
            tool = %tool.descriptor.name,
            selector = self.selector.name(),
            "tool selected"
        );

        let text = executor::execute(tool, query, criteria).await.map_err(|e| {
            warn!(query_id = %qid, error = %e, "execution failed");
            e
        })?;
        Ok(RoutedAnswer {
            text,
            tool: tool.descriptor.name.clone(),
            reason: selection.reason,
        })
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Every configured dataset, including the ones that failed.
    pub fn datasets(&self) -> &[DatasetStatus] {
        &self.status
    }

    /// Resolved payload for `id`, if resolution succeeded.
    pub fn dataset(&self, id: &str) -> Option<&ResolvedDataset> {
        self.resolved.iter().find(|d| d.source.id == id)
    }

    /// Match on id or label, ignoring case.
    pub fn find_dataset(&self, name: &str) -> Option<&ResolvedDataset> {
        let name = name.trim();
        self.resolved.iter().find(|d| {
            d.source.id.eq_ignore_ascii_case(name) || d.source.label.eq_ignore_ascii_case(name)
        })
    }

    /// First resolved dataset of `kind`, in configuration order.
    pub fn dataset_of_kind(&self, kind: DatasetKind) -> Option<&ResolvedDataset> {
        self.resolved.iter().find(|d| d.source.kind == kind)
    }

    pub fn resolved(&self) -> &[ResolvedDataset] {
        &self.resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::default_sources;
    use crate::error::SelectionError;
    use crate::selector::{KeywordSelector, Selection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations and always picks the first tool.
    #[derive(Default)]
    struct CountingSelector(Arc<AtomicUsize>);

    #[async_trait]
    impl Selector for CountingSelector {
        async fn select(
            &self,
            _query: &str,
            candidates: &[ToolDescriptor],
        ) -> Result<Selection, SelectionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if candidates.is_empty() {
                return Err(SelectionError::NoCandidates);
            }
            Ok(Selection {
                index: 0,
                reason: None,
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    async fn ready_router() -> QueryRouter {
        let mut r = QueryRouter::new(Box::new(KeywordSelector));
        let sources: Vec<DatasetSource> = default_sources()
            .into_iter()
            .map(|mut s| {
                s.local_path = None;
                s
            })
            .collect();
        r.initialize(&sources, &Resolver::offline(), &AdapterDeps::offline(64))
            .await
            .unwrap();
        r
    }

    #[test]
    fn query_id_is_short_and_stable() {
        assert_eq!(query_id("abc"), query_id("abc"));
        assert_eq!(query_id("abc").len(), 12);
        assert_ne!(query_id("abc"), query_id("abd"));
    }

    #[tokio::test]
    async fn samples_make_every_tool_available() {
        let r = ready_router().await;
        assert_eq!(r.state(), RouterState::Ready);
        assert_eq!(r.tools().len(), 5);
        assert!(r
            .datasets()
            .iter()
            .all(|d| d.freshness == Some(Freshness::Sample)));
        assert!(r.dataset("cleaned").is_some());
    }

    #[tokio::test]
    async fn blank_query_never_reaches_selector() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut r = QueryRouter::new(Box::new(CountingSelector(calls.clone())));
        let src = vec![default_sources().remove(4)];
        r.initialize(&src, &Resolver::offline(), &AdapterDeps::offline(16))
            .await
            .unwrap();
        for q in ["", "   \n\t"] {
            assert!(matches!(r.answer(q).await, Err(RouterError::EmptyQuery)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_datasets_leave_router_unavailable() {
        let mut r = QueryRouter::new(Box::new(KeywordSelector));
        let src: Vec<DatasetSource> = default_sources()
            .into_iter()
            .map(|s| s.without_sample())
            .map(|mut s| {
                s.local_path = None;
                s
            })
            .collect();
        let err = r
            .initialize(&src, &Resolver::offline(), &AdapterDeps::offline(16))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoAdaptersAvailable));
        assert_eq!(r.state(), RouterState::Unavailable);
        assert!(matches!(
            r.answer("apple close").await,
            Err(RouterError::NotInitialized)
        ));
        assert_eq!(r.datasets().len(), 5);
        assert!(r.datasets().iter().all(|d| d.tool.is_none()));
    }

    #[tokio::test]
    async fn reinitialising_is_rejected() {
        let mut r = ready_router().await;
        let err = r
            .initialize(&[], &Resolver::offline(), &AdapterDeps::offline(16))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::AlreadyInitialized));
        assert_eq!(r.state(), RouterState::Ready);
    }

    #[tokio::test]
    async fn uninitialized_router_refuses_queries() {
        let r = QueryRouter::new(Box::new(KeywordSelector));
        assert!(matches!(
            r.answer("anything").await,
            Err(RouterError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn apple_close_is_routed_to_apple() {
        let r = ready_router().await;
        let a = r
            .route("What was Apple's closing price on 2025-01-02?", None)
            .await
            .unwrap();
        assert_eq!(a.tool, "Apple_Financials");
        assert_eq!(a.text, "Close on 2025-01-02: 151.3");
    }

    #[tokio::test]
    async fn unmatched_query_is_a_selection_failure() {
        let r = ready_router().await;
        assert!(matches!(
            r.answer("zzz qqq").await,
            Err(RouterError::SelectionFailure(_))
        ));
    }

    #[tokio::test]
    async fn criteria_are_appended() {
        let r = ready_router().await;
        let text = r
            .answer_with_criteria("Apple close on 2025-01-02", "Expert")
            .await
            .unwrap();
        assert!(text.ends_with(" (Filtered by: Expert)"));
    }
}
