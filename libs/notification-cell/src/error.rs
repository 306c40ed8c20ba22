use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notification storage failed: {0}")]
    Storage(String),
}

impl From<DatabaseError> for NotificationError {
    fn from(err: DatabaseError) -> Self {
        NotificationError::Storage(err.to_string())
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound(_) => AppError::NotFound(err.to_string()),
            NotificationError::Validation(msg) => AppError::ValidationError(msg),
            NotificationError::Storage(msg) => AppError::Database(msg),
        }
    }
}

/// The durable write of a dispatch failed; nothing was published.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to persist notifications: {0}")]
    Persistence(#[from] NotificationError),
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
