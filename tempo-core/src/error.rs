//! Error classes surfaced by scheduler operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Rejected before any mutation; message is surfaced to the caller verbatim.
    #[error("validation error: {0}")]
    Validation(String),

    /// Task or block absent, or outside the caller's owner scope.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Persistence gateway failure.
    #[error("store error: {0}")]
    Store(String),
}

impl SchedulerError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.into(),
        }
    }

    pub fn block_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "block",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<String> for SchedulerError {
    fn from(msg: String) -> Self {
        Self::Validation(msg)
    }
}
