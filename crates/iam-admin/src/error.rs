//! Error types of the admin CLI.

use iam_service::error::ServiceError;
use thiserror::Error;

/// Startup and runtime errors for the admin binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A command or query failed inside the service layer.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The result could not be written as JSON.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<iam_core::error::DomainError> for AppError {
    fn from(err: iam_core::error::DomainError) -> Self {
        Self::Service(ServiceError::Domain(err))
    }
}
