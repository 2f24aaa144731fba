use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use messaging_cell::{routing, APPOINTMENTS_EXCHANGE};
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{AvailabilityRequest, ProviderSchedule};
use crate::router::SchedulingState;

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<SchedulingState>>,
    Extension(_user): Extension<User>,
    Query(request): Query<AvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let slots = state.availability.available_slots(&request).await?;
    let query = request.to_query();

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len(),
        "start_date": query.start_date,
        "end_date": query.end_date,
        "duration_minutes": query.duration_minutes,
    })))
}

#[axum::debug_handler]
pub async fn get_provider_schedule(
    State(state): State<Arc<SchedulingState>>,
    Extension(_user): Extension<User>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let schedule = state.availability.get_schedule(provider_id).await?;
    Ok(Json(json!(schedule)))
}

/// Providers may replace their own schedule; admins may replace any.
#[axum::debug_handler]
pub async fn update_provider_schedule(
    State(state): State<Arc<SchedulingState>>,
    Extension(user): Extension<User>,
    Path(provider_id): Path<Uuid>,
    Json(schedule): Json<ProviderSchedule>,
) -> Result<Json<Value>, AppError> {
    if schedule.provider_id != provider_id {
        return Err(AppError::BadRequest(
            "provider_id in body does not match path".to_string(),
        ));
    }
    if user.id != provider_id.to_string() && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to modify this provider's schedule".to_string(),
        ));
    }

    let saved = state.availability.update_schedule(schedule).await?;

    let published = state
        .publisher
        .publish_best_effort(
            APPOINTMENTS_EXCHANGE,
            routing::PROVIDER_SCHEDULE_UPDATED,
            &json!({
                "provider_id": saved.provider_id,
                "provider_type": saved.provider_type,
                "timestamp": Utc::now(),
            }),
        )
        .await;
    if !published {
        warn!("Schedule change for {} was not announced", saved.provider_id);
    }

    Ok(Json(json!({
        "success": true,
        "schedule": saved,
    })))
}
