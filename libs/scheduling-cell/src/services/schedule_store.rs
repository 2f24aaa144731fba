use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::{ProviderSchedule, ProviderType};

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderSchedule>, SchedulingError>;

    /// Schedules matching the optional filters, in a stable order.
    async fn find(
        &self,
        provider_id: Option<Uuid>,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderSchedule>, SchedulingError>;

    async fn upsert(&self, schedule: ProviderSchedule) -> Result<ProviderSchedule, SchedulingError>;
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<Vec<ProviderSchedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderSchedule>, SchedulingError> {
        Ok(self
            .schedules
            .read()
            .await
            .iter()
            .find(|s| s.provider_id == provider_id)
            .cloned())
    }

    async fn find(
        &self,
        provider_id: Option<Uuid>,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderSchedule>, SchedulingError> {
        Ok(self
            .schedules
            .read()
            .await
            .iter()
            .filter(|s| provider_id.map_or(true, |id| s.provider_id == id))
            .filter(|s| provider_type.map_or(true, |kind| s.provider_type == kind))
            .cloned()
            .collect())
    }

    async fn upsert(&self, schedule: ProviderSchedule) -> Result<ProviderSchedule, SchedulingError> {
        let mut schedules = self.schedules.write().await;
        match schedules.iter_mut().find(|s| s.provider_id == schedule.provider_id) {
            Some(existing) => *existing = schedule.clone(),
            None => schedules.push(schedule.clone()),
        }
        Ok(schedule)
    }
}

/// `provider_schedules` table over PostgREST, authenticated with the service key.
pub struct PostgrestScheduleStore {
    client: SupabaseClient,
    service_key: String,
}

impl PostgrestScheduleStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: SupabaseClient::new(config),
            service_key: config.supabase_anon_key.clone(),
        }
    }

    fn storage_error(e: anyhow::Error) -> SchedulingError {
        SchedulingError::Storage(e.to_string())
    }

    fn parse(rows: Vec<Value>) -> Result<Vec<ProviderSchedule>, SchedulingError> {
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(SchedulingError::from))
            .collect()
    }
}

#[async_trait]
impl ScheduleStore for PostgrestScheduleStore {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderSchedule>, SchedulingError> {
        let path = format!("/rest/v1/provider_schedules?provider_id=eq.{}", provider_id);
        let rows: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(&self.service_key), None)
            .await
            .map_err(Self::storage_error)?;
        Ok(Self::parse(rows)?.into_iter().next())
    }

    async fn find(
        &self,
        provider_id: Option<Uuid>,
        provider_type: Option<ProviderType>,
    ) -> Result<Vec<ProviderSchedule>, SchedulingError> {
        let mut path = "/rest/v1/provider_schedules?order=created_at.asc".to_string();
        if let Some(id) = provider_id {
            path.push_str(&format!("&provider_id=eq.{}", id));
        }
        if let Some(kind) = provider_type {
            path.push_str(&format!("&provider_type=eq.{}", kind));
        }

        debug!("Loading provider schedules: {}", path);
        let rows: Vec<Value> = self
            .client
            .request(Method::GET, &path, Some(&self.service_key), None)
            .await
            .map_err(Self::storage_error)?;
        Self::parse(rows)
    }

    async fn upsert(&self, schedule: ProviderSchedule) -> Result<ProviderSchedule, SchedulingError> {
        let body = serde_json::to_value(&schedule)?;
        let rows: Vec<Value> = self
            .client
            .request_with_headers(
                Method::POST,
                "/rest/v1/provider_schedules?on_conflict=provider_id",
                Some(&self.service_key),
                Some(body),
                &[("prefer", "resolution=merge-duplicates,return=representation")],
            )
            .await
            .map_err(Self::storage_error)?;

        Self::parse(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Storage("upsert returned no rows".to_string()))
    }
}
