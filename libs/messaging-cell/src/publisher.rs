use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::broker::{MessageBroker, OutboundMessage};
use crate::error::MessagingError;

/// Stamps outbound events with message id, timestamp and the `service` header.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    service_name: String,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, service_name: impl Into<String>) -> Self {
        Self { broker, service_name: service_name.into() }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), MessagingError> {
        let mut headers = BTreeMap::new();
        headers.insert("service".to_string(), self.service_name.clone());

        let message = OutboundMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: serde_json::to_value(payload)?,
            message_id: format!("{}-{}", self.service_name, Uuid::new_v4()),
            timestamp: Utc::now(),
            headers,
        };

        self.broker.publish(&message).await?;
        debug!("Published {} to {}", routing_key, exchange);
        Ok(())
    }

    /// Publishes after a committed state change. Failure is logged and
    /// reported as `false`; the caller's mutation stands.
    pub async fn publish_best_effort<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> bool {
        match self.publish(exchange, routing_key, payload).await {
            Ok(()) => true,
            Err(e) => {
                error!("Event {} lost after commit: {}", routing_key, e);
                false
            }
        }
    }
}
