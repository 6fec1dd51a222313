use thiserror::Error;
use warp::http::StatusCode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Data not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage task failed: {0}")]
    TaskJoin(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::TaskJoin(err.to_string())
    }
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
