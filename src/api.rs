use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::dataset::DatasetKind;
use crate::error::RouterError;
use crate::insights::{self, InsightError};
use crate::router::QueryRouter;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<QueryRouter>,
    /// One query in flight at a time.
    query_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(router: QueryRouter) -> Self {
        Self {
            router: Arc::new(router),
            query_gate: Arc::new(Mutex::new(())),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/query", post(query))
        .route("/datasets", get(datasets))
        .route("/tools", get(tools))
        .route("/insights/stocks/{id}", get(stock_insights))
        .route("/insights/comparison", get(comparison_insights))
        .route("/insights/credit", get(credit_insights))
        .route("/insights/phrasebank", get(phrasebank_insights))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `{error, kind}` body with a status derived from the failure.
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        let status = match e {
            RouterError::EmptyQuery => StatusCode::UNPROCESSABLE_ENTITY,
            RouterError::NotInitialized | RouterError::NoAdaptersAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RouterError::SelectionFailure(_) | RouterError::ExecutionFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            RouterError::SourceUnavailable { .. } | RouterError::AlreadyInitialized => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<InsightError> for ApiError {
    fn from(e: InsightError) -> Self {
        let (status, kind) = match e {
            InsightError::WrongKind { .. } => (StatusCode::BAD_REQUEST, "wrong_kind"),
            InsightError::Empty(_) => (StatusCode::NOT_FOUND, "no_data"),
        };
        Self {
            status,
            kind,
            message: e.to_string(),
        }
    }
}

fn unknown_dataset(name: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        kind: "unknown_dataset",
        message: format!("no data available for {name}"),
    }
}

#[derive(Deserialize)]
struct QueryReq {
    query: String,
    #[serde(default)]
    criteria: Option<String>,
}

async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryReq>,
) -> Result<Json<Value>, ApiError> {
    let _gate = state.query_gate.lock().await;
    let answer = state
        .router
        .route(&body.query, body.criteria.as_deref())
        .await?;
    Ok(Json(json!({
        "answer": answer.text,
        "tool": answer.tool,
        "reason": answer.reason,
    })))
}

async fn datasets(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "state": state.router.state(),
        "datasets": state.router.datasets(),
    }))
}

async fn tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.router.tools() }))
}

async fn stock_insights(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ds = state
        .router
        .find_dataset(&id)
        .ok_or_else(|| unknown_dataset(&id))?;
    let kpis = insights::stock_kpis(ds)?;
    Ok(Json(json!({
        "kpis": kpis,
        "daily_change": kpis.daily_change_display(),
    })))
}

async fn comparison_insights(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let c = insights::stock_comparison(state.router.resolved())?;
    Ok(Json(json!(c)))
}

async fn credit_insights(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ds = state
        .router
        .dataset_of_kind(DatasetKind::Credit)
        .ok_or_else(|| unknown_dataset("Cleaned Data"))?;
    Ok(Json(json!(insights::credit_summary(ds)?)))
}

async fn phrasebank_insights(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ds = state
        .router
        .dataset_of_kind(DatasetKind::Phrasebank)
        .ok_or_else(|| unknown_dataset("Financial Phrasebank"))?;
    Ok(Json(json!(insights::sentiment_summary(ds)?)))
}
