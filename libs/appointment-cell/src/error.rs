use thiserror::Error;
use uuid::Uuid;

use messaging_cell::HandlerError;
use shared_models::error::AppError;

use crate::models::AppointmentStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Provider {provider_id} already has an active appointment overlapping the requested time")]
    Overlap { provider_id: Uuid },

    /// The conditional update lost a race or the record moved on.
    #[error("Appointment {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: Uuid,
        expected: AppointmentStatus,
        actual: AppointmentStatus,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{entity} {id} not found in {service}")]
    NotFound {
        service: String,
        entity: &'static str,
        id: Uuid,
    },

    #[error("{service} refused the lookup with HTTP {status}")]
    Refused { service: String, status: u16 },

    #[error("{service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },
}

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("{entity} {id} not found")]
    ParticipantNotFound { entity: &'static str, id: Uuid },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Dependency refused: {0}")]
    DependencyRefused(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for AppointmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => AppointmentError::NotFound(id),
            StoreError::Overlap { .. } | StoreError::StatusMismatch { .. } => {
                AppointmentError::Conflict(error.to_string())
            }
            StoreError::Backend(msg) => AppointmentError::Storage(msg),
        }
    }
}

impl From<DirectoryError> for AppointmentError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::NotFound { entity, id, .. } => {
                AppointmentError::ParticipantNotFound { entity, id }
            }
            DirectoryError::Refused { .. } => AppointmentError::DependencyRefused(error.to_string()),
            DirectoryError::Unavailable { .. } => {
                AppointmentError::DependencyUnavailable(error.to_string())
            }
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        let message = error.to_string();
        match error {
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::NotFound(_) | AppointmentError::ParticipantNotFound { .. } => {
                AppError::NotFound(message)
            }
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::DependencyRefused(_) => AppError::Forbidden(message),
            AppointmentError::Conflict(_) | AppointmentError::InvalidTransition { .. } => {
                AppError::Conflict(message)
            }
            AppointmentError::DependencyUnavailable(_) => AppError::ServiceUnavailable(message),
            AppointmentError::Storage(_) => AppError::Database(message),
        }
    }
}

/// Consumer-side classification: only outages are worth a retry.
impl From<AppointmentError> for HandlerError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::Validation(msg) => HandlerError::Malformed(msg),
            // Retrying with the same credentials cannot succeed.
            AppointmentError::DependencyRefused(msg) => HandlerError::Malformed(msg),
            AppointmentError::DependencyUnavailable(_) | AppointmentError::Storage(_) => {
                HandlerError::Transient(error.to_string())
            }
            other => HandlerError::Skipped(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn maps_to_http_statuses() {
        let id = Uuid::new_v4();
        let cases = vec![
            (AppointmentError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppointmentError::NotFound(id), StatusCode::NOT_FOUND),
            (AppointmentError::ParticipantNotFound { entity: "Patient", id }, StatusCode::NOT_FOUND),
            (AppointmentError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (StoreError::Overlap { provider_id: id }.into(), StatusCode::CONFLICT),
            (
                AppointmentError::InvalidTransition {
                    from: AppointmentStatus::Cancelled,
                    to: AppointmentStatus::Confirmed,
                },
                StatusCode::CONFLICT,
            ),
            (
                DirectoryError::Unavailable { service: "patients-service".into(), reason: "open".into() }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DirectoryError::Refused { service: "medecins-service".into(), status: 401 }.into(),
                StatusCode::FORBIDDEN,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(AppError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn only_outages_are_retried_by_consumers() {
        assert!(matches!(
            HandlerError::from(AppointmentError::Storage("timeout".into())),
            HandlerError::Transient(_)
        ));
        assert!(matches!(
            HandlerError::from(AppointmentError::NotFound(Uuid::new_v4())),
            HandlerError::Skipped(_)
        ));
        assert!(matches!(
            HandlerError::from(AppointmentError::Validation("x".into())),
            HandlerError::Malformed(_)
        ));
        assert!(matches!(
            HandlerError::from(AppointmentError::DependencyRefused("401".into())),
            HandlerError::Malformed(_)
        ));
    }
}
