use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use messaging_cell::{routing, EventPublisher, APPOINTMENTS_EXCHANGE, NOTIFICATIONS_EXCHANGE};
use scheduling_cell::AvailabilityCache;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentNotification, AppointmentPage, AppointmentStatus,
    CreateAppointmentRequest, NotificationKind, RecipientRole, ResponseDecision,
    UpdateAppointmentRequest,
};
use crate::services::directory::DirectoryLookup;
use crate::services::lifecycle::{check_transition, Transition};
use crate::services::store::{AppointmentStore, NotificationStore};

/// Outcome of a state-changing call: the record as it now stands and
/// whether this call was the one that changed it.
#[derive(Debug, Clone)]
pub struct Applied {
    pub appointment: Appointment,
    pub transition: Transition,
}

impl Applied {
    fn new(appointment: Appointment, transition: Transition) -> Self {
        Self { appointment, transition }
    }
}

/// Drives appointments through their lifecycle. The only component that
/// writes `status`. Events go out after the write and never undo it.
pub struct AppointmentOrchestrator {
    store: Arc<dyn AppointmentStore>,
    notifications: Arc<dyn NotificationStore>,
    providers: Arc<dyn DirectoryLookup>,
    patients: Arc<dyn DirectoryLookup>,
    publisher: EventPublisher,
    availability_cache: Arc<dyn AvailabilityCache>,
}

impl AppointmentOrchestrator {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        notifications: Arc<dyn NotificationStore>,
        providers: Arc<dyn DirectoryLookup>,
        patients: Arc<dyn DirectoryLookup>,
        publisher: EventPublisher,
        availability_cache: Arc<dyn AvailabilityCache>,
    ) -> Self {
        Self { store, notifications, providers, patients, publisher, availability_cache }
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.get(id).await?.ok_or(AppointmentError::NotFound(id))
    }

    pub async fn list(&self, filter: &AppointmentFilter) -> Result<AppointmentPage, AppointmentError> {
        let (items, total) = self.store.list(filter).await?;
        Ok(AppointmentPage::new(items, total, filter))
    }

    /// Both participants must resolve in their directories before anything
    /// is written. An unreachable directory fails the call.
    #[instrument(skip(self, request, auth_token), fields(patient_id = %request.patient_id, provider_id = %request.provider_id))]
    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        request.validate()?;

        self.providers.get_by_id(request.provider_id, auth_token).await?;
        self.patients.get_by_id(request.patient_id, auth_token).await?;

        let appointment = self.store.insert(request.into_appointment(Utc::now())).await?;
        self.availability_cache.invalidate_provider(appointment.provider_id).await;
        info!("Created appointment {} for patient {}", appointment.id, appointment.patient_id);

        self.publisher
            .publish_best_effort(
                APPOINTMENTS_EXCHANGE,
                routing::APPOINTMENT_CREATED,
                &json!({
                    "appointment_id": appointment.id,
                    "patient_id": appointment.patient_id,
                    "provider_id": appointment.provider_id,
                    "provider_type": appointment.provider_type,
                    "appointment_date": appointment.appointment_date,
                    "duration_minutes": appointment.duration_minutes,
                    "status": appointment.status,
                }),
            )
            .await;

        let when = appointment.appointment_date.format("%Y-%m-%d %H:%M");
        self.announce(
            &appointment,
            appointment.provider_id,
            appointment.provider_type.into(),
            NotificationKind::Request,
            format!("New appointment request for {}", when),
        )
        .await;
        self.announce(
            &appointment,
            appointment.patient_id,
            RecipientRole::Patient,
            NotificationKind::Request,
            format!("Your appointment request for {} was received", when),
        )
        .await;

        Ok(appointment)
    }

    /// The assigned provider accepts or rejects a pending request.
    #[instrument(skip(self, message))]
    pub async fn respond(
        &self,
        id: Uuid,
        responder_id: Uuid,
        decision: ResponseDecision,
        message: Option<String>,
    ) -> Result<Applied, AppointmentError> {
        let current = self.get(id).await?;
        if current.provider_id != responder_id {
            warn!("{} tried to respond to appointment {} of provider {}", responder_id, id, current.provider_id);
            return Err(AppointmentError::Forbidden(
                "Only the assigned provider may respond to this appointment".to_string(),
            ));
        }

        let target = decision.target_status();
        if check_transition(current.status, target)? == Transition::AlreadyApplied {
            return Ok(Applied::new(current, Transition::AlreadyApplied));
        }
        if current.status != AppointmentStatus::Pending {
            return Err(AppointmentError::InvalidTransition { from: current.status, to: target });
        }

        let reason = match decision {
            ResponseDecision::Rejected => message.clone(),
            ResponseDecision::Accepted => None,
        };
        let updated = self
            .store
            .update_status(id, AppointmentStatus::Pending, target, reason)
            .await?;
        if !target.blocks_slot() {
            self.availability_cache.invalidate_provider(updated.provider_id).await;
        }
        info!("Provider {} {} appointment {}", responder_id, decision.as_str(), id);

        self.publisher
            .publish_best_effort(
                APPOINTMENTS_EXCHANGE,
                &routing::response(decision.as_str()),
                &json!({
                    "appointment_id": updated.id,
                    "doctor_id": updated.provider_id,
                    "patient_id": updated.patient_id,
                    "status": decision.as_str(),
                    "message": message,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        let (kind, text) = match decision {
            ResponseDecision::Accepted => (NotificationKind::Confirmation, "Your appointment request has been accepted"),
            ResponseDecision::Rejected => (NotificationKind::Rejection, "Your appointment request has been rejected"),
        };
        let text = match &message {
            Some(note) => format!("{}: {}", text, note),
            None => text.to_string(),
        };
        self.announce(&updated, updated.patient_id, RecipientRole::Patient, kind, text).await;

        Ok(Applied::new(updated, Transition::Apply))
    }

    /// Generic lattice move. Illegal moves change nothing.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        target: AppointmentStatus,
    ) -> Result<Applied, AppointmentError> {
        let current = self.get(id).await?;
        if check_transition(current.status, target)? == Transition::AlreadyApplied {
            return Ok(Applied::new(current, Transition::AlreadyApplied));
        }

        let updated = self.store.update_status(id, current.status, target, None).await?;
        if !target.blocks_slot() {
            self.availability_cache.invalidate_provider(updated.provider_id).await;
        }
        info!("Appointment {} moved {} -> {}", id, current.status, target);

        self.publisher
            .publish_best_effort(
                APPOINTMENTS_EXCHANGE,
                &routing::status_changed(target.as_str()),
                &json!({
                    "appointment_id": updated.id,
                    "status": target,
                    "provider_id": updated.provider_id,
                    "patient_id": updated.patient_id,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        Ok(Applied::new(updated, Transition::Apply))
    }

    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Applied, AppointmentError> {
        let current = self.get(id).await?;
        let target = AppointmentStatus::Cancelled;
        if check_transition(current.status, target)? == Transition::AlreadyApplied {
            return Ok(Applied::new(current, Transition::AlreadyApplied));
        }

        let updated = self
            .store
            .update_status(id, current.status, target, reason.clone())
            .await?;
        self.availability_cache.invalidate_provider(updated.provider_id).await;
        info!("Cancelled appointment {}", id);

        self.publisher
            .publish_best_effort(
                APPOINTMENTS_EXCHANGE,
                routing::APPOINTMENT_CANCELLED,
                &json!({
                    "appointment_id": updated.id,
                    "patient_id": updated.patient_id,
                    "provider_id": updated.provider_id,
                    "provider_type": updated.provider_type,
                    "appointment_date": updated.appointment_date,
                    "status": updated.status,
                    "cancellation_reason": reason,
                }),
            )
            .await;

        let text = match &reason {
            Some(reason) => format!("Your appointment has been cancelled: {}", reason),
            None => "Your appointment has been cancelled".to_string(),
        };
        self.announce(&updated, updated.patient_id, RecipientRole::Patient, NotificationKind::Cancellation, text.clone())
            .await;
        self.announce(
            &updated,
            updated.provider_id,
            updated.provider_type.into(),
            NotificationKind::Cancellation,
            text,
        )
        .await;

        Ok(Applied::new(updated, Transition::Apply))
    }

    /// Sends each participant at most one reminder per appointment.
    /// Returns how many were sent by this call.
    #[instrument(skip(self))]
    pub async fn reminder(&self, id: Uuid) -> Result<usize, AppointmentError> {
        let appointment = self.get(id).await?;
        if appointment.status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::Conflict(format!(
                "Reminders are only sent for confirmed appointments; {} is {}",
                id, appointment.status
            )));
        }

        let text = format!(
            "Reminder: You have an appointment scheduled for {}",
            appointment.appointment_date.format("%Y-%m-%d %H:%M")
        );
        let recipients = [
            (appointment.patient_id, RecipientRole::Patient),
            (appointment.provider_id, RecipientRole::from(appointment.provider_type)),
        ];

        let mut sent = 0;
        for (recipient_id, role) in recipients {
            if self
                .notify(&appointment, recipient_id, role, NotificationKind::Reminder, text.clone())
                .await?
            {
                sent += 1;
            }
        }

        info!("Sent {} reminders for appointment {}", sent, id);
        Ok(sent)
    }

    /// Schedule changes alter availability; drop what was cached for it.
    pub async fn provider_schedule_updated(&self, provider_id: Uuid) -> usize {
        let removed = self.availability_cache.invalidate_provider(provider_id).await;
        info!("Schedule update for provider {} invalidated {} cache entries", provider_id, removed);
        removed
    }

    /// Field edits, plus an optional status move through the lattice.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        request.validate()?;

        let details = request.details();
        if details.moves_slot() {
            let current = self.get(id).await?;
            if current.status.is_terminal() {
                return Err(AppointmentError::Conflict(format!(
                    "Cannot reschedule a {} appointment",
                    current.status
                )));
            }
        }

        let mut appointment = match request.status {
            Some(status) => self.update_status(id, status).await?.appointment,
            None => self.get(id).await?,
        };

        if !details.is_empty() {
            appointment = self.store.update_details(id, &details).await?;
            if details.moves_slot() {
                self.availability_cache.invalidate_provider(appointment.provider_id).await;
            }
        }

        Ok(appointment)
    }

    /// Records the notification and, if it is new, publishes it on
    /// `notification.<role>.<kind>`.
    async fn notify(
        &self,
        appointment: &Appointment,
        recipient_id: Uuid,
        role: RecipientRole,
        kind: NotificationKind,
        message: String,
    ) -> Result<bool, AppointmentError> {
        let notification = AppointmentNotification::new(appointment.id, recipient_id, role, kind, message);
        let payload = json!({
            "notification_id": notification.id,
            "appointment_id": appointment.id,
            "recipient_id": recipient_id,
            "recipient_type": role.as_str(),
            "notification_type": kind.event_name(),
            "message": notification.message,
            "appointment_time": appointment.appointment_date.format("%Y-%m-%d %H:%M").to_string(),
            "timestamp": Utc::now(),
        });

        if !self.notifications.record(notification).await? {
            return Ok(false);
        }

        self.publisher
            .publish_best_effort(
                NOTIFICATIONS_EXCHANGE,
                &routing::notification(role.as_str(), kind.event_name()),
                &payload,
            )
            .await;
        Ok(true)
    }

    /// `notify` for follow-ups of an already committed change.
    async fn announce(
        &self,
        appointment: &Appointment,
        recipient_id: Uuid,
        role: RecipientRole,
        kind: NotificationKind,
        message: String,
    ) {
        if let Err(e) = self.notify(appointment, recipient_id, role, kind, message).await {
            error!("Could not record {:?} notification for appointment {}: {}", kind, appointment.id, e);
        }
    }
}
