use crate::grading::Phase;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    PreconditionNotMet(String),

    #[error("marks entry window for {phase} is closed")]
    WindowClosed { phase: Phase },

    #[error("marks are locked")]
    AlreadyLocked,

    #[error("grade is frozen")]
    AlreadyFrozen,

    #[error("grades for this offering are already published")]
    AlreadyPublished,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error("write failed: {0}")]
    Write(rusqlite::Error),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::PreconditionNotMet(_) => "precondition_not_met",
            Self::WindowClosed { .. } => "window_closed",
            Self::AlreadyLocked => "already_locked",
            Self::AlreadyFrozen => "already_frozen",
            Self::AlreadyPublished => "already_published",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "bad_params",
            Self::Corrupt(_) => "db_corrupt",
            Self::Storage(_) => "db_query_failed",
            Self::Write(_) => "db_update_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::WindowClosed { phase } => Some(json!({ "phase": phase.as_str() })),
            _ => None,
        }
    }

    /// Domain rejections are expected traffic; storage faults are not.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Write(_) | Self::Corrupt(_))
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
