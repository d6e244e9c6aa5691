// src/tasks.rs
//! Role-gated dashboard tasks.
//!
//! Each role sees a fixed menu of [`TaskKind`]s. [`dispatch`] checks the
//! session's role, runs the task against the router and returns a typed
//! outcome. Account operations are not performed here: they come back as
//! [`BackendRequest`] values for the caller to send.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::dataset::DatasetKind;
use crate::error::RouterError;
use crate::insights::{
    credit_summary, sentiment_summary, stock_comparison, stock_kpis, CreditSummary, InsightError,
    SentimentSummary, StockComparison, StockKpis,
};
use crate::router::{query_id, QueryRouter};
use crate::session::{Role, SessionContext};

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    FinancialQuery,
    ViewResults,
    SuggestImprovement,
    VerifyPermissions,
    EvaluateReportQuality,
    EditReport,
    UserManagement,
    StockAnalysis,
    CleanedData,
    FinancialPhrasebank,
    StockComparison,
    QueryInterface,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::FinancialQuery => "Financial Query",
            Self::ViewResults => "View Results",
            Self::SuggestImprovement => "Suggest Improvement",
            Self::VerifyPermissions => "Verify Permissions",
            Self::EvaluateReportQuality => "Evaluate Report Quality",
            Self::EditReport => "Edit Report",
            Self::UserManagement => "User Management",
            Self::StockAnalysis => "Stock Analysis",
            Self::CleanedData => "Cleaned Data",
            Self::FinancialPhrasebank => "Financial Phrasebank",
            Self::StockComparison => "Stock Comparison",
            Self::QueryInterface => "Query Interface",
        }
    }
}

const REGULAR_MENU: &[TaskKind] = &[
    TaskKind::FinancialQuery,
    TaskKind::ViewResults,
    TaskKind::SuggestImprovement,
    TaskKind::VerifyPermissions,
    TaskKind::StockAnalysis,
    TaskKind::StockComparison,
];

const EXPERT_MENU: &[TaskKind] = &[
    TaskKind::FinancialQuery,
    TaskKind::ViewResults,
    TaskKind::SuggestImprovement,
    TaskKind::VerifyPermissions,
    TaskKind::EvaluateReportQuality,
    TaskKind::EditReport,
    TaskKind::StockAnalysis,
    TaskKind::CleanedData,
    TaskKind::FinancialPhrasebank,
    TaskKind::StockComparison,
    TaskKind::QueryInterface,
];

const ADMIN_MENU: &[TaskKind] = &[
    TaskKind::FinancialQuery,
    TaskKind::ViewResults,
    TaskKind::SuggestImprovement,
    TaskKind::VerifyPermissions,
    TaskKind::EvaluateReportQuality,
    TaskKind::EditReport,
    TaskKind::UserManagement,
    TaskKind::StockAnalysis,
    TaskKind::CleanedData,
    TaskKind::FinancialPhrasebank,
    TaskKind::StockComparison,
    TaskKind::QueryInterface,
];

/// Menu order as shown to the user.
pub fn menu_for(role: Role) -> &'static [TaskKind] {
    match role {
        Role::RegularUser => REGULAR_MENU,
        Role::Expert => EXPERT_MENU,
        Role::Administrator => ADMIN_MENU,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    List,
    SetRole { username: String, role: Role },
    Delete { username: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    FinancialQuery {
        query: String,
        criteria: Option<String>,
    },
    ViewResults,
    SuggestImprovement {
        suggestion: String,
    },
    VerifyPermissions,
    EvaluateReportQuality {
        quality: u8,
    },
    EditReport {
        text: String,
    },
    UserManagement(UserAction),
    /// Dataset id or label, e.g. `"apple"` or `"Apple"`.
    StockAnalysis {
        company: String,
    },
    CleanedData,
    FinancialPhrasebank,
    StockComparison,
    /// Ad-hoc query; the answer is not kept in the session.
    QueryInterface {
        query: String,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::FinancialQuery { .. } => TaskKind::FinancialQuery,
            Self::ViewResults => TaskKind::ViewResults,
            Self::SuggestImprovement { .. } => TaskKind::SuggestImprovement,
            Self::VerifyPermissions => TaskKind::VerifyPermissions,
            Self::EvaluateReportQuality { .. } => TaskKind::EvaluateReportQuality,
            Self::EditReport { .. } => TaskKind::EditReport,
            Self::UserManagement(_) => TaskKind::UserManagement,
            Self::StockAnalysis { .. } => TaskKind::StockAnalysis,
            Self::CleanedData => TaskKind::CleanedData,
            Self::FinancialPhrasebank => TaskKind::FinancialPhrasebank,
            Self::StockComparison => TaskKind::StockComparison,
            Self::QueryInterface { .. } => TaskKind::QueryInterface,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// A call against the account backend, relative to its base URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRequest {
    pub method: Method,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl BackendRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOutcome {
    Answer { text: String },
    Report { text: String },
    Request(BackendRequest),
    Permissions { role: Role, tasks: Vec<TaskKind> },
    Stock(StockKpis),
    Comparison(StockComparison),
    Credit(CreditSummary),
    Sentiment(SentimentSummary),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("'{}' is not available to the {role} role", .task.label())]
    Forbidden { task: TaskKind, role: Role },

    #[error("please enter {0}")]
    BlankInput(&'static str),

    #[error("no report available; run a query first")]
    NoResult,

    #[error("quality must be between 1 and 10, got {0}")]
    QualityOutOfRange(u8),

    #[error("no data available for {0}")]
    UnknownDataset(String),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Insight(#[from] InsightError),
}

fn non_blank(s: &str, what: &'static str) -> Result<String, TaskError> {
    let t = s.trim();
    if t.is_empty() {
        return Err(TaskError::BlankInput(what));
    }
    Ok(t.to_string())
}

fn last_result(session: &SessionContext) -> Result<&str, TaskError> {
    session.last_result.as_deref().ok_or(TaskError::NoResult)
}

/// Run `task` for the session's role.
pub async fn dispatch(
    task: Task,
    session: &mut SessionContext,
    router: &QueryRouter,
) -> Result<TaskOutcome, TaskError> {
    let kind = task.kind();
    if !menu_for(session.role).contains(&kind) {
        return Err(TaskError::Forbidden {
            task: kind,
            role: session.role,
        });
    }

    match task {
        Task::FinancialQuery { query, criteria } => {
            let query = non_blank(&query, "a query")?;
            let text = match criteria.as_deref() {
                Some(c) => router.answer_with_criteria(&query, c).await?,
                None => router.answer(&query).await?,
            };
            info!(user = %session.username, query_id = %query_id(&query), "financial query answered");
            session.last_result = Some(text.clone());
            Ok(TaskOutcome::Answer { text })
        }
        Task::QueryInterface { query } => {
            let query = non_blank(&query, "a query")?;
            let text = router.answer(&query).await?;
            Ok(TaskOutcome::Answer { text })
        }
        Task::ViewResults => Ok(TaskOutcome::Report {
            text: last_result(session)?.to_string(),
        }),
        Task::EditReport { text } => {
            last_result(session)?;
            session.last_result = Some(text.clone());
            Ok(TaskOutcome::Report { text })
        }
        Task::SuggestImprovement { suggestion } => {
            let suggestion = non_blank(&suggestion, "a suggestion")?;
            Ok(TaskOutcome::Request(BackendRequest::new(
                Method::Post,
                "/suggestions",
                Some(json!({"username": session.username, "suggestion": suggestion})),
            )))
        }
        Task::EvaluateReportQuality { quality } => {
            let report = last_result(session)?;
            if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
                return Err(TaskError::QualityOutOfRange(quality));
            }
            Ok(TaskOutcome::Request(BackendRequest::new(
                Method::Post,
                "/evaluations",
                Some(json!({"username": session.username, "report": report, "quality": quality})),
            )))
        }
        Task::VerifyPermissions => Ok(TaskOutcome::Permissions {
            role: session.role,
            tasks: menu_for(session.role).to_vec(),
        }),
        Task::UserManagement(action) => {
            let req = match action {
                UserAction::List => BackendRequest::new(Method::Get, "/users", None),
                UserAction::SetRole { username, role } => {
                    let username = non_blank(&username, "a username")?;
                    BackendRequest::new(
                        Method::Put,
                        format!("/users/{username}"),
                        Some(json!({ "role": role })),
                    )
                }
                UserAction::Delete { username } => {
                    let username = non_blank(&username, "a username")?;
                    BackendRequest::new(Method::Delete, format!("/users/{username}"), None)
                }
            };
            Ok(TaskOutcome::Request(req))
        }
        Task::StockAnalysis { company } => {
            let company = non_blank(&company, "a company")?;
            let ds = router
                .find_dataset(&company)
                .filter(|d| d.source.kind == DatasetKind::Stock)
                .ok_or(TaskError::UnknownDataset(company))?;
            Ok(TaskOutcome::Stock(stock_kpis(ds)?))
        }
        Task::CleanedData => {
            let ds = router
                .dataset_of_kind(DatasetKind::Credit)
                .ok_or_else(|| TaskError::UnknownDataset("Cleaned Data".into()))?;
            Ok(TaskOutcome::Credit(credit_summary(ds)?))
        }
        Task::FinancialPhrasebank => {
            let ds = router
                .dataset_of_kind(DatasetKind::Phrasebank)
                .ok_or_else(|| TaskError::UnknownDataset("Financial Phrasebank".into()))?;
            Ok(TaskOutcome::Sentiment(sentiment_summary(ds)?))
        }
        Task::StockComparison => Ok(TaskOutcome::Comparison(stock_comparison(router.resolved())?)),
    }
}
