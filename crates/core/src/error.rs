// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Version-conditioned write lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Conflict retries exhausted (transient, caller may try again)
    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("Execution failure: {0}")]
    Execution(String),

    /// Window output was not written; checkpoint left untouched
    #[error("Partial progress: {0}")]
    PartialProgress(String),

    #[error("Write error: {0}")]
    Write(#[from] crate::port::WriteError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors caused by the caller's input rather than by the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::BadRequest(_) | AppError::NotFound(_) | AppError::Domain(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
