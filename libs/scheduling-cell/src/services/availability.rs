use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{AvailabilityRequest, BookedInterval, ProviderSchedule, TimeSlot};
use crate::services::cache::AvailabilityCache;
use crate::services::generator::generate_slots;
use crate::services::schedule_store::ScheduleStore;

/// Source of time already committed to active appointments.
#[async_trait]
pub trait BookingSource: Send + Sync {
    async fn booked_intervals(
        &self,
        provider_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, SchedulingError>;
}

pub struct AvailabilityService {
    schedules: Arc<dyn ScheduleStore>,
    bookings: Arc<dyn BookingSource>,
    cache: Arc<dyn AvailabilityCache>,
    cache_ttl: Duration,
}

impl AvailabilityService {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        bookings: Arc<dyn BookingSource>,
        cache: Arc<dyn AvailabilityCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self { schedules, bookings, cache, cache_ttl }
    }

    #[instrument(skip(self), fields(provider_id = ?request.provider_id))]
    pub async fn available_slots(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<Vec<TimeSlot>, SchedulingError> {
        let query = request.to_query();
        query.validate()?;

        let key = request.cache_key();
        if let Some(slots) = self.cache.get(&key).await {
            debug!("Availability cache hit for {}", key);
            return Ok(slots);
        }

        let schedules = self
            .schedules
            .find(request.provider_id, request.provider_type)
            .await?;
        if schedules.is_empty() {
            return Ok(Vec::new());
        }

        // A booking that started the day before can still run into the window.
        let (window_start, window_end) = query.window();
        let provider_ids: Vec<Uuid> = schedules.iter().map(|s| s.provider_id).collect();
        let booked = self
            .bookings
            .booked_intervals(&provider_ids, window_start - ChronoDuration::days(1), window_end)
            .await?;

        let slots = generate_slots(&schedules, &booked, &query)?;
        self.cache.put(&key, &slots, self.cache_ttl).await;

        debug!(
            "Computed {} slots across {} schedules for {}",
            slots.len(),
            schedules.len(),
            key
        );
        Ok(slots)
    }

    pub async fn get_schedule(&self, provider_id: Uuid) -> Result<ProviderSchedule, SchedulingError> {
        self.schedules
            .get(provider_id)
            .await?
            .ok_or(SchedulingError::ScheduleNotFound(provider_id))
    }

    /// Replaces a provider's schedule and drops every cached answer it may
    /// have contributed to.
    #[instrument(skip(self, schedule), fields(provider_id = %schedule.provider_id))]
    pub async fn update_schedule(
        &self,
        mut schedule: ProviderSchedule,
    ) -> Result<ProviderSchedule, SchedulingError> {
        schedule.validate()?;

        let now = Utc::now();
        schedule.created_at = match self.schedules.get(schedule.provider_id).await? {
            Some(existing) => existing.created_at,
            None => now,
        };
        schedule.updated_at = now;

        let saved = self.schedules.upsert(schedule).await?;
        let removed = self.cache.invalidate_provider(saved.provider_id).await;
        info!(
            "Schedule for provider {} updated, {} cached entries invalidated",
            saved.provider_id, removed
        );
        Ok(saved)
    }

    pub async fn invalidate_provider(&self, provider_id: Uuid) -> usize {
        self.cache.invalidate_provider(provider_id).await
    }
}
