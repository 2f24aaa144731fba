use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;

/// Longest range a single availability query may span.
pub const MAX_QUERY_DAYS: i64 = 92;
pub const DEFAULT_SLOT_MINUTES: i64 = 30;
pub const MAX_SLOT_MINUTES: i64 = 24 * 60;
pub const DEFAULT_QUERY_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Doctor,
    Radiologist,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Doctor => write!(f, "doctor"),
            ProviderType::Radiologist => write!(f, "radiologist"),
        }
    }
}

/// Whole hours from midnight UTC. `end` may be 24.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkHours {
    pub start: u8,
    pub end: u8,
    #[serde(default)]
    pub break_start: Option<u8>,
    #[serde(default)]
    pub break_end: Option<u8>,
}

fn hour_on(date: NaiveDate, hour: u8) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc() + Duration::hours(hour as i64)
}

impl WorkHours {
    pub fn new(start: u8, end: u8) -> Self {
        Self { start, end, break_start: None, break_end: None }
    }

    pub fn with_break(mut self, start: u8, end: u8) -> Self {
        self.break_start = Some(start);
        self.break_end = Some(end);
        self
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.end > 24 || self.start >= self.end {
            return Err(SchedulingError::Validation(format!(
                "work hours {}-{} must satisfy start < end <= 24",
                self.start, self.end
            )));
        }
        match (self.break_start, self.break_end) {
            (None, None) => Ok(()),
            (Some(bs), Some(be)) if bs < be && bs >= self.start && be <= self.end => Ok(()),
            (Some(_), Some(_)) => Err(SchedulingError::Validation(
                "break must lie within work hours and start before it ends".to_string(),
            )),
            _ => Err(SchedulingError::Validation(
                "break_start and break_end must be given together".to_string(),
            )),
        }
    }

    pub fn window_on(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        (hour_on(date, self.start), hour_on(date, self.end))
    }

    pub fn break_on(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.break_start, self.break_end) {
            (Some(start), Some(end)) => Some((hour_on(date, start), hour_on(date, end))),
            _ => None,
        }
    }
}

/// Date-scoped override of the weekly pattern. No work hours means a day off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleException {
    pub date: NaiveDate,
    #[serde(default)]
    pub work_hours: Option<WorkHours>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSchedule {
    pub provider_id: Uuid,
    #[serde(default)]
    pub provider_name: Option<String>,
    pub provider_type: ProviderType,
    /// Keyed by day of week, 0 = Monday .. 6 = Sunday.
    #[serde(default)]
    pub work_hours: BTreeMap<u8, WorkHours>,
    #[serde(default)]
    pub exceptions: Vec<ScheduleException>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProviderSchedule {
    pub fn new(provider_id: Uuid, provider_type: ProviderType) -> Self {
        let now = Utc::now();
        Self {
            provider_id,
            provider_name: None,
            provider_type,
            work_hours: BTreeMap::new(),
            exceptions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_day(mut self, weekday: u8, hours: WorkHours) -> Self {
        self.work_hours.insert(weekday, hours);
        self
    }

    pub fn with_exception(mut self, exception: ScheduleException) -> Self {
        self.exceptions.push(exception);
        self
    }

    /// Hours in force on `date`; an exception for that date takes precedence.
    pub fn hours_for(&self, date: NaiveDate) -> Option<&WorkHours> {
        if let Some(exception) = self.exceptions.iter().find(|e| e.date == date) {
            return exception.work_hours.as_ref();
        }
        self.work_hours.get(&(date.weekday().num_days_from_monday() as u8))
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        for (day, hours) in &self.work_hours {
            if *day > 6 {
                return Err(SchedulingError::Validation(format!(
                    "day of week {} out of range 0..=6",
                    day
                )));
            }
            hours.validate()?;
        }

        let mut seen = HashSet::new();
        for exception in &self.exceptions {
            if !seen.insert(exception.date) {
                return Err(SchedulingError::Validation(format!(
                    "duplicate exception for {}",
                    exception.date
                )));
            }
            if let Some(hours) = &exception.work_hours {
                hours.validate()?;
            }
        }
        Ok(())
    }
}

/// A bookable interval. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub provider_id: Uuid,
    pub provider_type: ProviderType,
    pub is_available: bool,
}

/// Time already taken by an active (not cancelled, not no-show) appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookedInterval {
    pub provider_id: Uuid,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
}

impl BookedInterval {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_minutes: i64,
}

impl SlotQuery {
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.duration_minutes <= 0 || self.duration_minutes > MAX_SLOT_MINUTES {
            return Err(SchedulingError::Validation(format!(
                "duration_minutes must be between 1 and {}",
                MAX_SLOT_MINUTES
            )));
        }
        if self.start_date > self.end_date {
            return Err(SchedulingError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }
        if self.end_date.succ_opt().is_none() {
            return Err(SchedulingError::Validation("end_date is out of range".to_string()));
        }
        if (self.end_date - self.start_date).num_days() >= MAX_QUERY_DAYS {
            return Err(SchedulingError::Validation(format!(
                "date range may span at most {} days",
                MAX_QUERY_DAYS
            )));
        }
        Ok(())
    }

    /// Each calendar day in the inclusive range.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end_date;
        self.start_date.iter_days().take_while(move |day| *day <= end)
    }

    /// UTC instants covering the whole range, end exclusive.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (hour_on(self.start_date, 0), hour_on(self.end_date, 24))
    }
}

/// Query parameters of the available-slots endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityRequest {
    pub provider_id: Option<Uuid>,
    pub provider_type: Option<ProviderType>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub duration_minutes: Option<i64>,
}

impl AvailabilityRequest {
    pub fn to_query(&self) -> SlotQuery {
        SlotQuery {
            start_date: self.start_date,
            end_date: self.end_date.unwrap_or_else(|| {
                self.start_date
                    .checked_add_signed(Duration::days(DEFAULT_QUERY_DAYS))
                    .unwrap_or(NaiveDate::MAX)
            }),
            duration_minutes: self.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
        }
    }

    /// Cache key; provider scope first so invalidation can match by prefix.
    pub fn cache_key(&self) -> String {
        let query = self.to_query();
        let scope = match (self.provider_id, self.provider_type) {
            (Some(id), _) => format!("provider:{}", id),
            (None, Some(kind)) => format!("type:{}", kind),
            (None, None) => "all".to_string(),
        };
        format!(
            "availability:{}:{}:{}:{}",
            scope, query.start_date, query.end_date, query.duration_minutes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_weekday_keys_from_strings() {
        let schedule: ProviderSchedule = serde_json::from_value(json!({
            "provider_id": Uuid::nil(),
            "provider_type": "radiologist",
            "work_hours": {
                "0": {"start": 9, "end": 17, "break_start": 12, "break_end": 13},
                "5": {"start": 8, "end": 12}
            }
        }))
        .unwrap();

        assert_eq!(schedule.work_hours.len(), 2);
        assert_eq!(schedule.work_hours[&0].break_start, Some(12));
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn exception_overrides_weekly_hours() {
        // 2025-01-06 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let schedule = ProviderSchedule::new(Uuid::new_v4(), ProviderType::Doctor)
            .with_day(0, WorkHours::new(9, 17))
            .with_exception(ScheduleException { date: monday, work_hours: None, reason: Some("holiday".into()) });

        assert!(schedule.hours_for(monday).is_none());
        assert_eq!(schedule.hours_for(monday + Duration::days(7)), Some(&WorkHours::new(9, 17)));
    }

    #[test]
    fn rejects_inconsistent_hours() {
        assert!(WorkHours::new(17, 9).validate().is_err());
        assert!(WorkHours::new(9, 25).validate().is_err());
        assert!(WorkHours::new(9, 17).with_break(8, 10).validate().is_err());
        assert!(WorkHours { break_start: Some(12), ..WorkHours::new(9, 17) }.validate().is_err());
        assert!(WorkHours::new(0, 24).validate().is_ok());
    }

    #[test]
    fn request_defaults() {
        let request = AvailabilityRequest {
            provider_id: None,
            provider_type: Some(ProviderType::Doctor),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            end_date: None,
            duration_minutes: None,
        };
        let query = request.to_query();
        assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(query.duration_minutes, 30);
        assert_eq!(request.cache_key(), "availability:type:doctor:2025-01-06:2025-01-13:30");
    }
}
