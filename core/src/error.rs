use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Tenant mismatch: expected '{expected}', got '{actual}'")]
    TenantMismatch { expected: String, actual: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ReconError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True when SQLite aborted the statement through the progress handler.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            ReconError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }
}

pub type ReconResult<T> = Result<T, ReconError>;

/// Why a guarded query did not produce rows.
///
/// Every variant except `TranslationFailure` is raised by the executor;
/// the orchestrator adds `TranslationFailure` and reuses `Timeout` for its own
/// per-call bounds.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum QueryFailureKind {
    #[error("Only SELECT queries and read-only CTEs are allowed")]
    ForbiddenStatement,

    #[error("Query contains forbidden keyword: {keyword}")]
    ForbiddenKeyword { keyword: String },

    #[error("Query timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Translation failed: {0}")]
    TranslationFailure(String),

    #[error("Store error: {0}")]
    StoreFailure(String),
}

/// A rejected or failed guarded query, carrying the text that was attempted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct QueryFailure {
    pub kind: QueryFailureKind,
    pub query: String,
}

impl QueryFailure {
    pub fn new(kind: QueryFailureKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Translation endpoint returned no content")]
    EmptyResponse,

    #[error("Translation unavailable: {0}")]
    Unavailable(String),
}
