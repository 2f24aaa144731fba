use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use messaging_cell::{routing, EventDispatcher, EventHandler, HandlerError};

use crate::models::{
    AppointmentStatus, CreateAppointmentRequest, ProviderType, ResponseDecision,
    DEFAULT_APPOINTMENT_TYPE, DEFAULT_DURATION_MINUTES,
};
use crate::services::lifecycle::Transition;
use crate::services::orchestrator::AppointmentOrchestrator;

fn parse<T: DeserializeOwned>(routing_key: &str, payload: Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::Malformed(format!("{}: {}", routing_key, e)))
}

fn log_outcome(what: &str, appointment_id: Uuid, transition: Transition) {
    match transition {
        Transition::Apply => info!("{} applied to appointment {}", what, appointment_id),
        Transition::AlreadyApplied => debug!("{} already applied to appointment {}", what, appointment_id),
    }
}

#[derive(Debug, Deserialize)]
struct RequestedAppointment {
    requested_time: DateTime<Utc>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    appointment_type: Option<String>,
    #[serde(default)]
    duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AppointmentRequested {
    patient_id: Uuid,
    #[serde(alias = "provider_id")]
    doctor_id: Uuid,
    #[serde(default)]
    provider_type: Option<ProviderType>,
    appointment_data: RequestedAppointment,
}

/// `appointment.request.created`: books a pending appointment on the
/// requester's behalf.
pub struct AppointmentRequestHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for AppointmentRequestHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: AppointmentRequested = parse(routing_key, payload)?;
        let data = event.appointment_data;
        let request = CreateAppointmentRequest {
            patient_id: event.patient_id,
            provider_id: event.doctor_id,
            provider_type: event.provider_type.unwrap_or(ProviderType::Doctor),
            appointment_type: data
                .appointment_type
                .unwrap_or_else(|| DEFAULT_APPOINTMENT_TYPE.to_string()),
            appointment_date: data.requested_time,
            duration_minutes: data.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            reason: data.reason,
            notes: None,
            is_virtual: false,
            meeting_link: None,
            medical_file_ids: Vec::new(),
        };

        let appointment = self.orchestrator.create(request, None).await?;
        info!("Created appointment {} from request event", appointment.id);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AppointmentResponded {
    appointment_id: Uuid,
    #[serde(alias = "provider_id")]
    doctor_id: Uuid,
    status: ResponseDecision,
    #[serde(default)]
    message: Option<String>,
}

/// `appointment.response.accepted|rejected`.
pub struct AppointmentResponseHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for AppointmentResponseHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: AppointmentResponded = parse(routing_key, payload)?;
        let applied = self
            .orchestrator
            .respond(event.appointment_id, event.doctor_id, event.status, event.message)
            .await?;
        log_outcome(event.status.as_str(), event.appointment_id, applied.transition);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StatusUpdated {
    appointment_id: Uuid,
    status: AppointmentStatus,
}

/// `appointment.status.updated`. Statuses are normalized while parsing.
pub struct StatusUpdateHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for StatusUpdateHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: StatusUpdated = parse(routing_key, payload)?;
        let applied = self
            .orchestrator
            .update_status(event.appointment_id, event.status)
            .await?;
        log_outcome(event.status.as_str(), event.appointment_id, applied.transition);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AppointmentCancelled {
    appointment_id: Uuid,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

pub struct CancellationHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for CancellationHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: AppointmentCancelled = parse(routing_key, payload)?;
        let applied = self
            .orchestrator
            .cancel(event.appointment_id, event.cancellation_reason)
            .await?;
        log_outcome("cancellation", event.appointment_id, applied.transition);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ReminderNeeded {
    appointment_id: Uuid,
}

pub struct ReminderHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for ReminderHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: ReminderNeeded = parse(routing_key, payload)?;
        self.orchestrator.reminder(event.appointment_id).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleUpdated {
    provider_id: Uuid,
}

pub struct ScheduleUpdateHandler {
    orchestrator: Arc<AppointmentOrchestrator>,
}

#[async_trait]
impl EventHandler for ScheduleUpdateHandler {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError> {
        let event: ScheduleUpdated = parse(routing_key, payload)?;
        self.orchestrator.provider_schedule_updated(event.provider_id).await;
        Ok(())
    }
}

/// Routing table for the appointment service queues, in match order.
pub fn appointment_dispatcher(orchestrator: Arc<AppointmentOrchestrator>) -> EventDispatcher {
    let responses: Arc<dyn EventHandler> = Arc::new(AppointmentResponseHandler {
        orchestrator: Arc::clone(&orchestrator),
    });

    EventDispatcher::new()
        .route(
            routing::APPOINTMENT_REQUEST_CREATED,
            Arc::new(AppointmentRequestHandler { orchestrator: Arc::clone(&orchestrator) }),
        )
        .route(routing::APPOINTMENT_RESPONSE_ACCEPTED, Arc::clone(&responses))
        .route(routing::APPOINTMENT_RESPONSE_REJECTED, responses)
        .route(
            routing::APPOINTMENT_STATUS_UPDATED,
            Arc::new(StatusUpdateHandler { orchestrator: Arc::clone(&orchestrator) }),
        )
        .route(
            routing::APPOINTMENT_CANCELLED,
            Arc::new(CancellationHandler { orchestrator: Arc::clone(&orchestrator) }),
        )
        .route(
            routing::APPOINTMENT_REMINDER_NEEDED,
            Arc::new(ReminderHandler { orchestrator: Arc::clone(&orchestrator) }),
        )
        .route(
            routing::PROVIDER_SCHEDULE_UPDATED,
            Arc::new(ScheduleUpdateHandler { orchestrator }),
        )
}
