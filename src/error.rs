//! Closed error taxonomy shared by every component of the registry and routing core.

use std::path::PathBuf;

/// The eight error kinds every public operation surfaces.
///
/// `NotFound` is the one variant callers are expected to catch and downgrade to an
/// empty result rather than propagate — see [`CoreError::is_not_found`].
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("index conflict: {0}")]
    IndexConflict(String),

    #[error("sync aborted: {0}")]
    SyncAborted(String),

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for the one variant the router is expected to swallow into an empty list.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn input_validation(why: impl Into<String>) -> Self {
        CoreError::InputValidation(why.into())
    }

    pub fn internal(why: impl Into<String>) -> Self {
        CoreError::Internal(why.into())
    }

    /// CLI-facing exit code: 0 success (never constructed for this), 1 core failure,
    /// 2 user-input validation failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::InputValidation(_) => 2,
            _ => 1,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound(e.to_string()),
            other => CoreError::IndexConflict(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::NotFound(e.to_string())
        } else {
            CoreError::Internal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InputValidation(format!("malformed JSON: {e}"))
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::InputValidation(format!("malformed YAML: {e}"))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::EmbeddingUnavailable(e.to_string())
    }
}

impl From<notify::Error> for CoreError {
    fn from(e: notify::Error) -> Self {
        CoreError::Internal(format!("watcher error: {e}"))
    }
}

/// Helper for surfacing a missing path as `NotFound` rather than a bare `io::Error`.
pub fn missing_path(path: &PathBuf) -> CoreError {
    CoreError::NotFound(format!("path does not exist: {}", path.display()))
}

pub type CoreResult<T> = Result<T, CoreError>;
