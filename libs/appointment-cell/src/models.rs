use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub use scheduling_cell::ProviderType;

use crate::error::AppointmentError;

pub const DEFAULT_APPOINTMENT_TYPE: &str = "consultation";
pub const DEFAULT_DURATION_MINUTES: i64 = 30;
/// Upper bound on a single appointment; overlap lookups reach back this far.
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_LIST_WINDOW_DAYS: i64 = 30;

// ==============================================================================
// STATUS
// ==============================================================================

/// Canonical lifecycle states. Legacy spellings are folded in on
/// deserialization so they never reach the store or the wire.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Accepts canonical names and the aliases `scheduled`, `accepted`,
    /// `rejected` and `in_progress`.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "scheduled" => Some(AppointmentStatus::Pending),
            "confirmed" | "accepted" | "in_progress" => Some(AppointmentStatus::Confirmed),
            "cancelled" | "rejected" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed | AppointmentStatus::NoShow
        )
    }

    /// Active appointments hold their time slot.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
            .ok_or_else(|| AppointmentError::Validation(format!("unknown appointment status '{}'", s)))
    }
}

impl<'de> Deserialize<'de> for AppointmentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::normalize(&raw)
            .ok_or_else(|| de::Error::custom(format!("unknown appointment status '{}'", raw)))
    }
}

/// A provider's answer to a pending request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseDecision {
    Accepted,
    Rejected,
}

impl ResponseDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseDecision::Accepted => "accepted",
            ResponseDecision::Rejected => "rejected",
        }
    }

    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            ResponseDecision::Accepted => AppointmentStatus::Confirmed,
            ResponseDecision::Rejected => AppointmentStatus::Cancelled,
        }
    }
}

// ==============================================================================
// APPOINTMENT
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub provider_type: ProviderType,
    pub appointment_type: String,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub medical_file_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn end(&self) -> DateTime<Utc> {
        self.appointment_date + Duration::minutes(self.duration_minutes)
    }

    /// Half-open overlap with `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.end() > start && self.appointment_date < end
    }

    /// True if this appointment holds provider time in `[start, end)`.
    pub fn conflicts_with(&self, provider_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.provider_id == provider_id && self.status.blocks_slot() && self.overlaps(start, end)
    }
}

fn default_appointment_type() -> String {
    DEFAULT_APPOINTMENT_TYPE.to_string()
}

fn default_duration() -> i64 {
    DEFAULT_DURATION_MINUTES
}

fn default_provider_type() -> ProviderType {
    ProviderType::Doctor
}

fn validate_duration(duration_minutes: i64) -> Result<(), AppointmentError> {
    if duration_minutes <= 0 || duration_minutes > MAX_DURATION_MINUTES {
        return Err(AppointmentError::Validation(format!(
            "duration_minutes must be between 1 and {}",
            MAX_DURATION_MINUTES
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    #[serde(default = "default_provider_type")]
    pub provider_type: ProviderType,
    #[serde(default = "default_appointment_type")]
    pub appointment_type: String,
    pub appointment_date: DateTime<Utc>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub medical_file_ids: Vec<String>,
}

impl CreateAppointmentRequest {
    pub fn validate(&self) -> Result<(), AppointmentError> {
        validate_duration(self.duration_minutes)?;
        if self.appointment_type.trim().is_empty() {
            return Err(AppointmentError::Validation(
                "appointment_type must not be empty".to_string(),
            ));
        }
        if self.patient_id == self.provider_id {
            return Err(AppointmentError::Validation(
                "patient and provider must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_appointment(self, now: DateTime<Utc>) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            provider_id: self.provider_id,
            provider_type: self.provider_type,
            appointment_type: self.appointment_type,
            appointment_date: self.appointment_date,
            duration_minutes: self.duration_minutes,
            status: AppointmentStatus::Pending,
            is_virtual: self.is_virtual,
            meeting_link: self.meeting_link,
            reason: self.reason,
            notes: self.notes,
            cancellation_reason: None,
            medical_file_ids: self.medical_file_ids,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `status` goes through the lifecycle lattice; the rest
/// are plain field replacements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(default)]
    pub appointment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(rename = "virtual", default)]
    pub is_virtual: Option<bool>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub medical_file_ids: Option<Vec<String>>,
}

impl UpdateAppointmentRequest {
    pub fn validate(&self) -> Result<(), AppointmentError> {
        if let Some(duration) = self.duration_minutes {
            validate_duration(duration)?;
        }
        Ok(())
    }

    pub fn details(&self) -> AppointmentDetails {
        AppointmentDetails {
            appointment_date: self.appointment_date,
            duration_minutes: self.duration_minutes,
            reason: self.reason.clone(),
            notes: self.notes.clone(),
            is_virtual: self.is_virtual,
            meeting_link: self.meeting_link.clone(),
            medical_file_ids: self.medical_file_ids.clone(),
        }
    }
}

/// Non-status fields a store may rewrite in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentDetails {
    pub appointment_date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub is_virtual: Option<bool>,
    pub meeting_link: Option<String>,
    pub medical_file_ids: Option<Vec<String>>,
}

impl AppointmentDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn moves_slot(&self) -> bool {
        self.appointment_date.is_some() || self.duration_minutes.is_some()
    }

    pub fn apply(&self, appointment: &mut Appointment) {
        if let Some(date) = self.appointment_date {
            appointment.appointment_date = date;
        }
        if let Some(duration) = self.duration_minutes {
            appointment.duration_minutes = duration;
        }
        if let Some(reason) = &self.reason {
            appointment.reason = Some(reason.clone());
        }
        if let Some(notes) = &self.notes {
            appointment.notes = Some(notes.clone());
        }
        if let Some(is_virtual) = self.is_virtual {
            appointment.is_virtual = is_virtual;
        }
        if let Some(link) = &self.meeting_link {
            appointment.meeting_link = Some(link.clone());
        }
        if let Some(files) = &self.medical_file_ids {
            appointment.medical_file_ids = files.clone();
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondRequest {
    #[serde(alias = "decision")]
    pub status: ResponseDecision,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default, alias = "cancellation_reason")]
    pub reason: Option<String>,
}

// ==============================================================================
// LISTING
// ==============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub patient_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl AppointmentListQuery {
    /// Applies defaults: page 1, limit 10, a 30 day window from `now`.
    pub fn into_filter(self, now: DateTime<Utc>) -> Result<AppointmentFilter, AppointmentError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page < 1 {
            return Err(AppointmentError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(AppointmentError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        let from = self.start_date.unwrap_or(now);
        let to = self
            .end_date
            .unwrap_or(from + Duration::days(DEFAULT_LIST_WINDOW_DAYS));
        if from > to {
            return Err(AppointmentError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }

        Ok(AppointmentFilter {
            patient_id: self.patient_id,
            provider_id: self.provider_id,
            status: self.status,
            from,
            to,
            page,
            limit,
        })
    }
}

/// Fully resolved list filter; both window bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub page: u32,
    pub limit: u32,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.provider_id.map_or(true, |id| appointment.provider_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && appointment.appointment_date >= self.from
            && appointment.appointment_date <= self.to
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentPage {
    pub items: Vec<Appointment>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl AppointmentPage {
    pub fn new(items: Vec<Appointment>, total: u64, filter: &AppointmentFilter) -> Self {
        let limit = filter.limit as u64;
        Self {
            items,
            total,
            page: filter.page,
            limit: filter.limit,
            pages: (total + limit - 1) / limit,
        }
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    Patient,
    Doctor,
    Radiologist,
}

impl RecipientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::Patient => "patient",
            RecipientRole::Doctor => "doctor",
            RecipientRole::Radiologist => "radiologist",
        }
    }
}

impl From<ProviderType> for RecipientRole {
    fn from(provider_type: ProviderType) -> Self {
        match provider_type {
            ProviderType::Doctor => RecipientRole::Doctor,
            ProviderType::Radiologist => RecipientRole::Radiologist,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Request,
    Confirmation,
    Rejection,
    Cancellation,
    Reminder,
}

impl NotificationKind {
    /// Suffix used in `notification.<role>.<kind>` routing keys.
    pub fn event_name(&self) -> &'static str {
        match self {
            NotificationKind::Request => "appointment_request",
            NotificationKind::Confirmation => "appointment_confirmed",
            NotificationKind::Rejection => "appointment_rejected",
            NotificationKind::Cancellation => "appointment_cancelled",
            NotificationKind::Reminder => "appointment_reminder",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentNotification {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub recipient_id: Uuid,
    pub recipient_role: RecipientRole,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl AppointmentNotification {
    pub fn new(
        appointment_id: Uuid,
        recipient_id: Uuid,
        recipient_role: RecipientRole,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            recipient_id,
            recipient_role,
            kind,
            message: message.into(),
            delivered: false,
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_statuses_are_normalized_on_the_way_in() {
        for (raw, expected) in [
            ("scheduled", AppointmentStatus::Pending),
            ("accepted", AppointmentStatus::Confirmed),
            ("in_progress", AppointmentStatus::Confirmed),
            ("rejected", AppointmentStatus::Cancelled),
            ("NO_SHOW", AppointmentStatus::NoShow),
        ] {
            let status: AppointmentStatus = serde_json::from_value(json!(raw)).unwrap();
            assert_eq!(status, expected);
        }
        assert!(serde_json::from_value::<AppointmentStatus>(json!("rescheduled")).is_err());
        assert_eq!(serde_json::to_value(AppointmentStatus::NoShow).unwrap(), json!("no_show"));
    }

    #[test]
    fn create_request_defaults() {
        let request: CreateAppointmentRequest = serde_json::from_value(json!({
            "patient_id": Uuid::new_v4(),
            "provider_id": Uuid::new_v4(),
            "appointment_date": "2025-03-03T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(request.appointment_type, "consultation");
        assert_eq!(request.duration_minutes, 30);
        assert_eq!(request.provider_type, ProviderType::Doctor);
        assert!(request.validate().is_ok());

        let appointment = request.into_appointment(Utc::now());
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.created_at, appointment.updated_at);
    }

    #[test]
    fn list_query_defaults_and_bounds() {
        let now = Utc::now();
        let filter = AppointmentListQuery::default().into_filter(now).unwrap();
        assert_eq!((filter.page, filter.limit), (1, 10));
        assert_eq!(filter.to - filter.from, Duration::days(30));

        let too_many = AppointmentListQuery { limit: Some(101), ..Default::default() };
        assert!(too_many.into_filter(now).is_err());
        let page_zero = AppointmentListQuery { page: Some(0), ..Default::default() };
        assert!(page_zero.into_filter(now).is_err());
    }

    #[test]
    fn page_count_rounds_up() {
        let filter = AppointmentListQuery { limit: Some(10), ..Default::default() }
            .into_filter(Utc::now())
            .unwrap();
        assert_eq!(AppointmentPage::new(Vec::new(), 21, &filter).pages, 3);
        assert_eq!(AppointmentPage::new(Vec::new(), 0, &filter).pages, 0);
    }
}
