use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::SchedulingError;
use crate::models::{BookedInterval, ProviderSchedule, SlotQuery, TimeSlot};

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_end > b_start && a_start < b_end
}

/// Partitions each working day into back-to-back slots of the requested
/// length, dropping the trailing partial slot, slots touching the break and
/// slots overlapping a booking of the same provider.
///
/// Output is grouped by schedule in input order and chronological within each
/// provider.
pub fn generate_slots(
    schedules: &[ProviderSchedule],
    booked: &[BookedInterval],
    query: &SlotQuery,
) -> Result<Vec<TimeSlot>, SchedulingError> {
    query.validate()?;
    let slot_length = Duration::minutes(query.duration_minutes);
    let mut slots = Vec::new();

    for schedule in schedules {
        let taken: Vec<(DateTime<Utc>, DateTime<Utc>)> = booked
            .iter()
            .filter(|b| b.provider_id == schedule.provider_id)
            .map(|b| (b.start, b.end()))
            .collect();

        let before = slots.len();
        for day in query.days() {
            let Some(hours) = schedule.hours_for(day) else {
                continue;
            };

            let (open, close) = hours.window_on(day);
            let pause = hours.break_on(day);
            let mut cursor = open;

            while let Some(slot_end) = cursor.checked_add_signed(slot_length) {
                if slot_end > close {
                    break;
                }

                let in_break = pause
                    .map(|(start, end)| overlaps(cursor, slot_end, start, end))
                    .unwrap_or(false);
                let is_taken = taken
                    .iter()
                    .any(|&(start, end)| overlaps(cursor, slot_end, start, end));

                if !in_break && !is_taken {
                    slots.push(TimeSlot {
                        start: cursor,
                        end: slot_end,
                        provider_id: schedule.provider_id,
                        provider_type: schedule.provider_type,
                        is_available: true,
                    });
                }

                cursor = slot_end;
            }
        }

        debug!(
            "Provider {}: {} free slots between {} and {}",
            schedule.provider_id,
            slots.len() - before,
            query.start_date,
            query.end_date
        );
    }

    Ok(slots)
}
