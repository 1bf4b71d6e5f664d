//! Error type shared by the project, task and team services.

use thiserror::Error;

use crate::plan::{GenerationError, PlanFormatError};

/// Failure of a service operation, classified so the HTTP layer can pick a
/// status code.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Missing or malformed input. Reported before any external call.
    #[error("{0}")]
    Validation(String),

    /// The completion service was unreachable or answered with an error.
    #[error("plan generation failed: {0}")]
    GenerationRequest(#[from] GenerationError),

    /// The completion service answered, but not with a usable plan.
    #[error("generated plan is unusable: {0}")]
    PlanFormat(#[from] PlanFormatError),

    /// The caller is authenticated but may not perform this action.
    #[error("{0}")]
    Authorization(String),

    /// No record matches the identifier, or the identifier is malformed.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProjectError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }
}

pub type ProjectResult<T> = Result<T, ProjectError>;
