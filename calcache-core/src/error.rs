//! Error types for calcache.
//!
//! Contract violations (an occurrence outside its window, a timeline that
//! does not add up) are not represented here; they abort with a panic.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in calcache operations.
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote request timed out after {}", format_limit(.0))]
    Timeout(Duration),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid window: end {end} is before start {start}")]
    InvalidWindow { start: String, end: String },

    #[error("Failed to decode cached object '{path}': {message}")]
    Decode { path: String, message: String },

    #[error("{} item(s) failed:\n{}", .0.len(), join_errors(.0))]
    Multiple(Vec<CalError>),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CalError {
    /// Whether retrying the whole operation from its last committed state may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CalError::Remote(_) | CalError::Timeout(_) | CalError::Store(_) | CalError::Io(_) => {
                true
            }
            CalError::Multiple(errors) => errors.iter().all(CalError::is_transient),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CalError::Cancelled)
    }

    /// Collapse a list of per-item failures into one error, if there were any.
    pub fn combine(mut errors: Vec<CalError>) -> Option<CalError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CalError::Multiple(errors)),
        }
    }
}

fn format_limit(limit: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*limit)
}

fn join_errors(errors: &[CalError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<tokio::task::JoinError> for CalError {
    fn from(err: tokio::task::JoinError) -> Self {
        CalError::Internal(format!("background task failed: {err}"))
    }
}

impl From<serde_json::Error> for CalError {
    fn from(err: serde_json::Error) -> Self {
        CalError::Serialization(err.to_string())
    }
}

/// Result type alias for calcache operations.
pub type CalResult<T> = Result<T, CalError>;
