use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentNotification, AppointmentStatus,
};

/// Persistence for appointment records. Implementations own the
/// no-overlap rule and the conditional status write.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fails with `StoreError::Overlap` when the provider already holds an
    /// active appointment intersecting the new one.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// One page ordered by `appointment_date`, plus the total match count.
    async fn list(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), StoreError>;

    /// Writes `target` only if the record is still in `expected`.
    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
        cancellation_reason: Option<String>,
    ) -> Result<Appointment, StoreError>;

    async fn update_details(
        &self,
        id: Uuid,
        details: &AppointmentDetails,
    ) -> Result<Appointment, StoreError>;

    /// Active appointments of the given providers starting in `[from, to)`.
    async fn active_for_providers(
        &self,
        provider_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Stores the notification unless one with the same appointment,
    /// recipient and kind exists. Returns whether it was stored.
    async fn record(&self, notification: AppointmentNotification) -> Result<bool, StoreError>;

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentNotification>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_overlap<'a>(
        appointments: impl Iterator<Item = &'a Appointment>,
        candidate: &Appointment,
    ) -> bool {
        let (start, end) = (candidate.appointment_date, candidate.end());
        appointments
            .filter(|existing| existing.id != candidate.id)
            .any(|existing| existing.conflicts_with(candidate.provider_id, start, end))
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().await;
        if appointment.status.blocks_slot() && Self::find_overlap(appointments.values(), &appointment) {
            return Err(StoreError::Overlap { provider_id: appointment.provider_id });
        }
        appointments.insert(appointment.id, appointment.clone());
        debug!("Stored appointment {}", appointment.id);
        Ok(appointment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), StoreError> {
        let appointments = self.appointments.read().await;
        let mut matching: Vec<&Appointment> = appointments.values().filter(|a| filter.matches(a)).collect();
        matching.sort_by(|a, b| a.appointment_date.cmp(&b.appointment_date).then(a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
        cancellation_reason: Option<String>,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if appointment.status != expected {
            return Err(StoreError::StatusMismatch { id, expected, actual: appointment.status });
        }

        appointment.status = target;
        if cancellation_reason.is_some() {
            appointment.cancellation_reason = cancellation_reason;
        }
        appointment.updated_at = Utc::now().max(appointment.created_at);
        Ok(appointment.clone())
    }

    async fn update_details(
        &self,
        id: Uuid,
        details: &AppointmentDetails,
    ) -> Result<Appointment, StoreError> {
        let mut appointments = self.appointments.write().await;
        let mut updated = appointments.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        details.apply(&mut updated);

        if details.moves_slot()
            && updated.status.blocks_slot()
            && Self::find_overlap(appointments.values(), &updated)
        {
            return Err(StoreError::Overlap { provider_id: updated.provider_id });
        }

        updated.updated_at = Utc::now().max(updated.created_at);
        appointments.insert(id, updated.clone());
        Ok(updated)
    }

    async fn active_for_providers(
        &self,
        provider_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self.appointments.read().await;
        let mut active: Vec<Appointment> = appointments
            .values()
            .filter(|a| provider_ids.contains(&a.provider_id))
            .filter(|a| a.status.blocks_slot())
            .filter(|a| a.appointment_date >= from && a.appointment_date < to)
            .cloned()
            .collect();
        active.sort_by_key(|a| a.appointment_date);
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    notifications: RwLock<Vec<AppointmentNotification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn record(&self, notification: AppointmentNotification) -> Result<bool, StoreError> {
        let mut notifications = self.notifications.write().await;
        let exists = notifications.iter().any(|n| {
            n.appointment_id == notification.appointment_id
                && n.recipient_id == notification.recipient_id
                && n.kind == notification.kind
        });
        if exists {
            return Ok(false);
        }
        notifications.push(notification);
        Ok(true)
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentNotification>, StoreError> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}
