use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schedule for provider {0} not found")]
    ScheduleNotFound(Uuid),

    #[error("Schedule storage error: {0}")]
    Storage(String),

    #[error("Booking lookup failed: {0}")]
    Bookings(String),

    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SchedulingError> for AppError {
    fn from(error: SchedulingError) -> Self {
        match error {
            SchedulingError::Validation(msg) => AppError::ValidationError(msg),
            SchedulingError::ScheduleNotFound(id) => {
                AppError::NotFound(format!("Schedule for provider {} not found", id))
            }
            SchedulingError::Bookings(msg) => AppError::ServiceUnavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}
