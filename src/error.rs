//! Error taxonomy shared by the registry, service and web layers.

use thiserror::Error;

use crate::db::DbError;

/// Prefix carried by every rejected query parameter message.
pub const INPUT_ERROR_PREFIX: &str = "Invalid query parameters: ";

#[derive(Error, Debug)]
pub enum ScorecardError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{INPUT_ERROR_PREFIX}{0}")]
    Input(String),
    #[error("{0}")]
    NotAllowed(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("upstream service error: {0}")]
    Collaborator(String),
}

impl ScorecardError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

pub type ScorecardResult<T> = Result<T, ScorecardError>;
