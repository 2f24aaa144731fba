use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scheduling_cell::{BookedInterval, BookingSource, SchedulingError};

use crate::services::store::AppointmentStore;

/// Feeds active appointments into slot generation.
pub struct StoreBookingSource {
    store: Arc<dyn AppointmentStore>,
}

impl StoreBookingSource {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BookingSource for StoreBookingSource {
    async fn booked_intervals(
        &self,
        provider_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, SchedulingError> {
        let active = self
            .store
            .active_for_providers(provider_ids, from, to)
            .await
            .map_err(|e| SchedulingError::Bookings(e.to_string()))?;

        Ok(active
            .into_iter()
            .map(|appointment| BookedInterval {
                provider_id: appointment.provider_id,
                start: appointment.appointment_date,
                duration_minutes: appointment.duration_minutes,
            })
            .collect())
    }
}
