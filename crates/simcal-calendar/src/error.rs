//! Calendar-specific error types.

use simcal_core::{AppError, CacheError, DatabaseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Calendar not found: {0}")]
    CalendarNotFound(u64),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl CalendarError {
    /// Short message for admin notices.
    pub fn user_message(&self) -> String {
        match self {
            Self::CalendarNotFound(id) => format!("Calendar {} could not be found", id),
            Self::InvalidEventData(msg) => format!("Invalid event: {}", msg),
            Self::Cache(e) => e.user_message().to_string(),
            Self::Database(e) => e.user_message().to_string(),
        }
    }

    /// Whether the failed operation may succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(DatabaseError::QueryFailed(_) | DatabaseError::ConnectionFailed(_))
        )
    }
}

impl From<CalendarError> for AppError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::Cache(e) => AppError::Cache(e),
            CalendarError::Database(e) => AppError::Database(e),
            other => AppError::Service(other.to_string()),
        }
    }
}
