use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentListQuery, AppointmentStatus, CancelRequest, CreateAppointmentRequest, RespondRequest,
    UpdateAppointmentRequest,
};
use crate::router::AppointmentState;
use crate::services::lifecycle::Transition;

const PROVIDER_ROLES: [&str; 2] = ["doctor", "radiologist"];

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Token subject is not a valid id".to_string()))
}

fn is_provider(user: &User) -> bool {
    PROVIDER_ROLES.iter().any(|role| user.has_role(role))
}

/// Participants and admins may see and act on an appointment.
fn authorize_participant(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() {
        return Ok(());
    }
    let caller = caller_id(user)?;
    if caller == appointment.patient_id || caller == appointment.provider_id {
        return Ok(());
    }
    Err(AppError::Forbidden("Not authorized to access this appointment".to_string()))
}

/// Patients may only cancel; every other move belongs to the assigned
/// provider or an admin.
fn authorize_status_change(
    user: &User,
    appointment: &Appointment,
    target: AppointmentStatus,
) -> Result<(), AppError> {
    if target == AppointmentStatus::Cancelled || user.is_admin() {
        return Ok(());
    }
    if caller_id(user)? == appointment.provider_id {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Only the assigned provider can mark an appointment {}",
        target
    )))
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppointmentState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if user.has_role("patient") {
        if caller_id(&user)? != request.patient_id {
            return Err(AppError::Forbidden(
                "Patients can only create appointments for themselves".to_string(),
            ));
        }
    } else if !is_provider(&user) && !user.is_admin() {
        return Err(AppError::Forbidden(
            "You do not have permission to create appointments".to_string(),
        ));
    }

    info!("Creating appointment for patient {} by user {}", request.patient_id, user.id);
    let appointment = state.orchestrator.create(request, Some(auth.token())).await?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.orchestrator.get(appointment_id).await?;
    authorize_participant(&user, &appointment)?;
    Ok(Json(json!(appointment)))
}

/// Patients only ever see their own appointments, providers theirs.
#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        let caller = caller_id(&user)?;
        if user.has_role("patient") {
            if query.patient_id.is_some_and(|id| id != caller) {
                return Err(AppError::Forbidden("Patients can only list their own appointments".to_string()));
            }
            query.patient_id = Some(caller);
        } else if is_provider(&user) {
            if query.provider_id.is_some_and(|id| id != caller) {
                return Err(AppError::Forbidden("Providers can only list their own appointments".to_string()));
            }
            query.provider_id = Some(caller);
        } else {
            return Err(AppError::Forbidden("Not authorized to list appointments".to_string()));
        }
    }

    let filter = query.into_filter(Utc::now())?;
    let page = state.orchestrator.list(&filter).await?;
    Ok(Json(json!(page)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let current = state.orchestrator.get(appointment_id).await?;
    authorize_participant(&user, &current)?;
    if let Some(target) = request.status {
        authorize_status_change(&user, &current, target)?;
    }

    let updated = state.orchestrator.update(appointment_id, request).await?;
    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn respond_to_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<Value>, AppError> {
    let responder = caller_id(&user)?;
    let applied = state
        .orchestrator
        .respond(appointment_id, responder, request.status, request.message)
        .await?;

    Ok(Json(json!({
        "success": true,
        "already_applied": applied.transition == Transition::AlreadyApplied,
        "appointment": applied.appointment,
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<Value>, AppError> {
    let current = state.orchestrator.get(appointment_id).await?;
    authorize_participant(&user, &current)?;

    let reason = request.and_then(|Json(body)| body.reason);
    let applied = state.orchestrator.cancel(appointment_id, reason).await?;

    Ok(Json(json!({
        "success": true,
        "already_applied": applied.transition == Transition::AlreadyApplied,
        "appointment": applied.appointment,
    })))
}

/// `DELETE /{id}`: cancellation without a reason, empty response.
#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let current = state.orchestrator.get(appointment_id).await?;
    authorize_participant(&user, &current)?;

    state.orchestrator.cancel(appointment_id, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn send_reminder(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let current = state.orchestrator.get(appointment_id).await?;
    authorize_participant(&user, &current)?;

    let sent = state.orchestrator.reminder(appointment_id).await?;
    Ok(Json(json!({
        "success": true,
        "reminders_sent": sent,
    })))
}
