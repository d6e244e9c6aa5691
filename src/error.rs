//! Error taxonomy for the routing core.
//!
//! Source-level failures are absorbed by the tiered resolver; everything the
//! router reports to callers is a [`RouterError`].

use thiserror::Error;

/// Failures surfaced at the router boundary.
#[derive(Debug, Error)]
pub enum RouterError {
    /// All resolution tiers failed for a dataset. Non-fatal: the adapter is omitted.
    #[error("dataset '{dataset}' unavailable: {reason}")]
    SourceUnavailable { dataset: String, reason: String },

    /// Initialization finished with zero adapters; the router is unusable.
    #[error("no valid query engines available; check data sources")]
    NoAdaptersAvailable,

    #[error("query engine is not initialized")]
    NotInitialized,

    #[error("router already initialized")]
    AlreadyInitialized,

    #[error("query is empty")]
    EmptyQuery,

    #[error("could not select a dataset for the query: {0}")]
    SelectionFailure(String),

    #[error("error processing query with {tool}: {reason}")]
    ExecutionFailure { tool: String, reason: String },
}

impl RouterError {
    /// Stable, machine-readable kind used by the HTTP layer and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::NoAdaptersAvailable => "no_adapters_available",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::EmptyQuery => "empty_query",
            Self::SelectionFailure(_) => "selection_failure",
            Self::ExecutionFailure { .. } => "execution_failure",
        }
    }
}

/// A single tier failure while resolving a dataset.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("remote source disabled")]
    RemoteDisabled,

    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("local file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Shape validation failures for resolved payloads and records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("payload is empty")]
    Empty,

    #[error("expected {expected}, found {found}")]
    Shape { expected: &'static str, found: String },

    #[error("missing required columns: {0}")]
    MissingFields(String),

    #[error("field '{field}' expected {expected}")]
    WrongType { field: String, expected: &'static str },

    #[error("no parsable dates in '{0}'")]
    NoValidDates(String),

    #[error("{0} entries are missing sentiment labels")]
    MissingLabels(usize),
}

/// Structured query failures (parse + schema checks).
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown field '{0}' (not in dataset schema)")]
    UnknownField(String),

    #[error("query targets '{found}', but this tool serves '{expected}'")]
    WrongDataset { expected: String, found: String },

    #[error("cannot parse query: {0}")]
    Parse(String),

    #[error("could not derive a structured query from: {0}")]
    Untranslatable(String),

    #[error("field '{field}' cannot be compared with {value}")]
    TypeMismatch { field: String, value: String },
}

/// LLM client failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM disabled")]
    Disabled,

    #[error("missing API key")]
    MissingApiKey,

    #[error("daily LLM call limit reached ({0})")]
    DailyLimit(u32),

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM HTTP status {0}")]
    Status(u16),

    #[error("LLM returned an empty response")]
    Empty,
}

/// Selector failures, wrapped into [`RouterError::SelectionFailure`] by the router.
#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no candidates to choose from")]
    NoCandidates,

    #[error("selector model error: {0}")]
    Model(#[from] LlmError),

    #[error("unparsable selector answer: {0}")]
    Unparsable(String),

    #[error("choice {choice} out of range 1..={count}")]
    OutOfRange { choice: usize, count: usize },

    #[error("no tool description matches the query")]
    NoMatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(RouterError::EmptyQuery.kind(), "empty_query");
        assert_eq!(RouterError::NotInitialized.kind(), "not_initialized");
        assert_eq!(
            RouterError::SelectionFailure("x".into()).kind(),
            "selection_failure"
        );
    }

    #[test]
    fn messages_are_descriptive() {
        let e = RouterError::ExecutionFailure {
            tool: "Stage_Tool".into(),
            reason: "boom".into(),
        };
        assert_eq!(e.to_string(), "error processing query with Stage_Tool: boom");
        let s: SourceError = SchemaError::MissingFields("Date, Close".into()).into();
        assert!(s.to_string().contains("Date, Close"));
    }
}
