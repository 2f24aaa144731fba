use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use resilience_cell::{BreakerRegistry, CircuitBreaker, CircuitBreakerError};
use shared_config::AppConfig;

use crate::error::DirectoryError;

pub const MEDECINS_SERVICE: &str = "medecins-service";
pub const PATIENTS_SERVICE: &str = "patients-service";

/// Read access to another service's records by id.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn get_by_id(&self, id: Uuid, auth_token: Option<&str>) -> Result<Value, DirectoryError>;
}

#[derive(Debug)]
enum LookupFailure {
    Missing,
    /// The service answered but declined the call (bad request, credentials).
    Refused(StatusCode),
    Transport(String),
}

/// Breaker-protected HTTP client for `GET {base_url}/api/{resource}/{id}`.
/// Only transport errors, timeouts and 5xx count against the breaker; a 404
/// or a refused call is an answer from a healthy service.
pub struct HttpDirectoryClient {
    client: Client,
    base_url: String,
    resource: &'static str,
    entity: &'static str,
    breaker: Arc<CircuitBreaker>,
}

impl HttpDirectoryClient {
    pub async fn new(
        registry: &BreakerRegistry,
        service: &str,
        base_url: &str,
        resource: &'static str,
        entity: &'static str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client for {}: {}", service, e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            resource,
            entity,
            breaker: registry.get_or_create(service).await,
        }
    }

    pub async fn medecins(config: &AppConfig, registry: &BreakerRegistry) -> Self {
        Self::new(
            registry,
            MEDECINS_SERVICE,
            &config.medecins_service_url,
            "doctors",
            "Provider",
            Duration::from_secs(config.request_timeout_seconds),
        )
        .await
    }

    pub async fn patients(config: &AppConfig, registry: &BreakerRegistry) -> Self {
        Self::new(
            registry,
            PATIENTS_SERVICE,
            &config.patients_service_url,
            "patients",
            "Patient",
            Duration::from_secs(config.request_timeout_seconds),
        )
        .await
    }

    async fn fetch(&self, id: Uuid, auth_token: Option<&str>) -> Result<Value, LookupFailure> {
        let url = format!("{}/api/{}/{}", self.base_url, self.resource, id);
        debug!("Directory lookup {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupFailure::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LookupFailure::Missing),
            status @ (StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS) => {
                Err(LookupFailure::Transport(format!("HTTP {}", status)))
            }
            status if status.is_client_error() => Err(LookupFailure::Refused(status)),
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| LookupFailure::Transport(format!("invalid body: {}", e))),
            status => Err(LookupFailure::Transport(format!("HTTP {}", status))),
        }
    }
}

#[async_trait]
impl DirectoryLookup for HttpDirectoryClient {
    #[instrument(skip(self, auth_token), fields(service = %self.breaker.name()))]
    async fn get_by_id(&self, id: Uuid, auth_token: Option<&str>) -> Result<Value, DirectoryError> {
        let service = self.breaker.name().to_string();
        let result = self
            .breaker
            .execute_classified(self.fetch(id, auth_token), |failure| {
                matches!(failure, LookupFailure::Transport(_))
            })
            .await;

        match result {
            Ok(entity) => Ok(entity),
            Err(CircuitBreakerError::OperationFailed(LookupFailure::Missing)) => {
                Err(DirectoryError::NotFound { service, entity: self.entity, id })
            }
            Err(CircuitBreakerError::OperationFailed(LookupFailure::Refused(status))) => {
                warn!("{} refused lookup of {} with {}", service, id, status);
                Err(DirectoryError::Refused { service, status: status.as_u16() })
            }
            Err(CircuitBreakerError::OperationFailed(LookupFailure::Transport(reason))) => {
                warn!("{} lookup of {} failed: {}", service, id, reason);
                Err(DirectoryError::Unavailable { service, reason })
            }
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                warn!("{} lookup of {} refused, circuit open", service, id);
                Err(DirectoryError::Unavailable { service, reason: "circuit open".to_string() })
            }
            Err(CircuitBreakerError::Timeout(after)) => {
                warn!("{} lookup of {} timed out after {:?}", service, id, after);
                Err(DirectoryError::Unavailable { service, reason: format!("timed out after {:?}", after) })
            }
        }
    }
}
