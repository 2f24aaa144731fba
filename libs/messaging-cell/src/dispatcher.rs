use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{AckDecision, InboundDelivery};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload can never be processed; dead-lettered.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Collaborator unavailable; worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Valid message that does not apply to current state (stale, duplicate,
    /// unknown record). Acknowledged and dropped.
    #[error("skipped: {0}")]
    Skipped(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, payload: Value) -> Result<(), HandlerError>;
}

/// Ordered (prefix, handler) routes. The first prefix the routing key starts
/// with wins.
pub struct EventDispatcher {
    routes: Vec<(String, Arc<dyn EventHandler>)>,
    dead_letter_redelivered: bool,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { routes: Vec::new(), dead_letter_redelivered: true }
    }

    pub fn route(mut self, prefix: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.push((prefix.to_string(), handler));
        self
    }

    /// When false, transient failures are requeued indefinitely.
    pub fn dead_letter_redelivered(mut self, enabled: bool) -> Self {
        self.dead_letter_redelivered = enabled;
        self
    }

    pub fn prefixes(&self) -> Vec<&str> {
        self.routes.iter().map(|(prefix, _)| prefix.as_str()).collect()
    }

    fn handler_for(&self, routing_key: &str) -> Option<&Arc<dyn EventHandler>> {
        self.routes
            .iter()
            .find(|(prefix, _)| routing_key.starts_with(prefix.as_str()))
            .map(|(_, handler)| handler)
    }

    /// Every outcome maps to exactly one acknowledgement decision.
    pub async fn dispatch(&self, delivery: &InboundDelivery) -> AckDecision {
        let routing_key = delivery.routing_key.as_str();

        let payload: Value = match serde_json::from_slice(&delivery.body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Undecodable message on {} ({}): {}", delivery.queue, routing_key, e);
                return AckDecision::Reject;
            }
        };

        let Some(handler) = self.handler_for(routing_key) else {
            warn!("No handler for routing key {}, acknowledging", routing_key);
            return AckDecision::Ack;
        };

        match handler.handle(routing_key, payload).await {
            Ok(()) => {
                debug!("Handled {}", routing_key);
                AckDecision::Ack
            }
            Err(HandlerError::Skipped(reason)) => {
                info!("Skipped {}: {}", routing_key, reason);
                AckDecision::Ack
            }
            Err(HandlerError::Malformed(reason)) => {
                error!("Rejecting {}: {}", routing_key, reason);
                AckDecision::Reject
            }
            Err(HandlerError::Transient(reason)) if delivery.redelivered && self.dead_letter_redelivered => {
                error!("Retry of {} failed again, dead-lettering: {}", routing_key, reason);
                AckDecision::Reject
            }
            Err(HandlerError::Transient(reason)) => {
                warn!("Requeueing {}: {}", routing_key, reason);
                AckDecision::Requeue
            }
        }
    }
}
