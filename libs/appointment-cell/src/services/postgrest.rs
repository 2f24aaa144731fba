use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{ApiStatusError, SupabaseClient};

use crate::error::StoreError;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentNotification, AppointmentStatus,
    MAX_DURATION_MINUTES,
};
use crate::services::store::{AppointmentStore, NotificationStore};

const APPOINTMENTS: &str = "/rest/v1/appointments";
const NOTIFICATIONS: &str = "/rest/v1/appointment_notifications";
const ACTIVE_STATUSES: &str = "status=not.in.(cancelled,no_show)";

fn timestamp(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339_opts(SecondsFormat::Millis, true)).into_owned()
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| StoreError::Backend(e.to_string())))
        .collect()
}

/// `appointments` table over PostgREST. Requests carry the service key,
/// never an end-user token.
///
/// The overlap check runs before the write; a database exclusion constraint
/// answering 409 is reported as the same overlap.
pub struct PostgrestAppointmentStore {
    client: SupabaseClient,
    service_key: String,
}

impl PostgrestAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: SupabaseClient::new(config),
            service_key: config.supabase_anon_key.clone(),
        }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Appointment>, StoreError> {
        let rows: Vec<Value> = self
            .client
            .request(Method::GET, path, Some(&self.service_key), None)
            .await
            .map_err(backend)?;
        parse_rows(rows)
    }

    async fn has_overlap(&self, candidate: &Appointment) -> Result<bool, StoreError> {
        let start = candidate.appointment_date;
        let end = candidate.end();
        let path = format!(
            "{}?provider_id=eq.{}&id=neq.{}&{}&appointment_date=gte.{}&appointment_date=lt.{}",
            APPOINTMENTS,
            candidate.provider_id,
            candidate.id,
            ACTIVE_STATUSES,
            timestamp(start - Duration::minutes(MAX_DURATION_MINUTES)),
            timestamp(end),
        );
        let nearby = self.fetch(&path).await?;
        Ok(nearby
            .iter()
            .any(|existing| existing.conflicts_with(candidate.provider_id, start, end)))
    }

    fn write_error(e: anyhow::Error, provider_id: Uuid) -> StoreError {
        match e.downcast_ref::<ApiStatusError>() {
            Some(status) if status.is_conflict() => StoreError::Overlap { provider_id },
            _ => backend(e),
        }
    }

    async fn patch(&self, id: Uuid, condition: &str, body: Value) -> anyhow::Result<Vec<Value>> {
        let path = format!("{}?id=eq.{}{}", APPOINTMENTS, id, condition);
        self.client
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&self.service_key),
                Some(body),
                &[("prefer", "return=representation")],
            )
            .await
    }
}

#[async_trait]
impl AppointmentStore for PostgrestAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        if appointment.status.blocks_slot() && self.has_overlap(&appointment).await? {
            return Err(StoreError::Overlap { provider_id: appointment.provider_id });
        }

        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows: Vec<Value> = self
            .client
            .request_with_headers(
                Method::POST,
                APPOINTMENTS,
                Some(&self.service_key),
                Some(body),
                &[("prefer", "return=representation")],
            )
            .await
            .map_err(|e| Self::write_error(e, appointment.provider_id))?;

        parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("insert returned no rows".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, id);
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), StoreError> {
        let mut path = format!(
            "{}?appointment_date=gte.{}&appointment_date=lte.{}",
            APPOINTMENTS,
            timestamp(filter.from),
            timestamp(filter.to)
        );
        if let Some(id) = filter.patient_id {
            path.push_str(&format!("&patient_id=eq.{}", id));
        }
        if let Some(id) = filter.provider_id {
            path.push_str(&format!("&provider_id=eq.{}", id));
        }
        if let Some(status) = filter.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str(&format!(
            "&order=appointment_date.asc,id.asc&offset={}&limit={}",
            filter.offset(),
            filter.limit
        ));

        debug!("Listing appointments: {}", path);
        let (rows, total): (Vec<Value>, u64) = self
            .client
            .request_with_count(&path, Some(&self.service_key))
            .await
            .map_err(backend)?;
        Ok((parse_rows(rows)?, total))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
        cancellation_reason: Option<String>,
    ) -> Result<Appointment, StoreError> {
        let mut body = json!({
            "status": target,
            "updated_at": Utc::now(),
        });
        if let Some(reason) = cancellation_reason {
            body["cancellation_reason"] = json!(reason);
        }

        let condition = format!("&status=eq.{}", expected);
        let rows = self.patch(id, &condition, body).await.map_err(backend)?;
        if let Some(updated) = parse_rows(rows)?.into_iter().next() {
            return Ok(updated);
        }

        // Nothing matched: either the record is gone or its status moved on.
        match self.get(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(current) => {
                warn!("Conditional update of {} lost: now {}", id, current.status);
                Err(StoreError::StatusMismatch { id, expected, actual: current.status })
            }
        }
    }

    async fn update_details(
        &self,
        id: Uuid,
        details: &AppointmentDetails,
    ) -> Result<Appointment, StoreError> {
        let mut current = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        details.apply(&mut current);
        if details.moves_slot() && current.status.blocks_slot() && self.has_overlap(&current).await? {
            return Err(StoreError::Overlap { provider_id: current.provider_id });
        }

        let mut body = Map::new();
        body.insert("updated_at".into(), json!(Utc::now()));
        if details.appointment_date.is_some() {
            body.insert("appointment_date".into(), json!(current.appointment_date));
        }
        if details.duration_minutes.is_some() {
            body.insert("duration_minutes".into(), json!(current.duration_minutes));
        }
        if details.reason.is_some() {
            body.insert("reason".into(), json!(current.reason));
        }
        if details.notes.is_some() {
            body.insert("notes".into(), json!(current.notes));
        }
        if details.is_virtual.is_some() {
            body.insert("virtual".into(), json!(current.is_virtual));
        }
        if details.meeting_link.is_some() {
            body.insert("meeting_link".into(), json!(current.meeting_link));
        }
        if details.medical_file_ids.is_some() {
            body.insert("medical_file_ids".into(), json!(current.medical_file_ids));
        }

        let rows = self
            .patch(id, "", Value::Object(body))
            .await
            .map_err(|e| Self::write_error(e, current.provider_id))?;
        parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(id))
    }

    async fn active_for_providers(
        &self,
        provider_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        if provider_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = provider_ids.iter().map(Uuid::to_string).collect();
        let path = format!(
            "{}?provider_id=in.({})&{}&appointment_date=gte.{}&appointment_date=lt.{}&order=appointment_date.asc",
            APPOINTMENTS,
            ids.join(","),
            ACTIVE_STATUSES,
            timestamp(from),
            timestamp(to)
        );
        self.fetch(&path).await
    }
}

/// `appointment_notifications` table. Expects a unique index on
/// `(appointment_id, recipient_id, kind)`.
pub struct PostgrestNotificationStore {
    client: SupabaseClient,
    service_key: String,
}

impl PostgrestNotificationStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: SupabaseClient::new(config),
            service_key: config.supabase_anon_key.clone(),
        }
    }
}

#[async_trait]
impl NotificationStore for PostgrestNotificationStore {
    async fn record(&self, notification: AppointmentNotification) -> Result<bool, StoreError> {
        let body = serde_json::to_value(&notification).map_err(|e| StoreError::Backend(e.to_string()))?;
        let path = format!("{}?on_conflict=appointment_id,recipient_id,kind", NOTIFICATIONS);
        let rows: Vec<Value> = self
            .client
            .request_with_headers(
                Method::POST,
                &path,
                Some(&self.service_key),
                Some(body),
                &[("prefer", "resolution=ignore-duplicates,return=representation")],
            )
            .await
            .map_err(backend)?;
        Ok(!rows.is_empty())
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentNotification>, StoreError> {
        let path = format!(
            "{}?appointment_id=eq.{}&order=created_at.asc",
            NOTIFICATIONS, appointment_id
        );
        let rows: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(&self.service_key), None)
            .await
            .map_err(backend)?;
        parse_rows(rows)
    }
}
