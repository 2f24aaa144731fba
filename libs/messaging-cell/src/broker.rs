use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::MessagingError;
use crate::topology::Topology;

/// A JSON message ready to be published with persistent delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Value,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub headers: BTreeMap<String, String>,
}

/// Final outcome of handling one delivery. Exactly one is applied per delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    /// Reject without requeue; the broker dead-letters the message.
    Reject,
    /// Negative acknowledgement with requeue.
    Requeue,
}

#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn settle(self: Box<Self>, decision: AckDecision) -> Result<(), MessagingError>;
}

pub struct InboundDelivery {
    pub queue: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn DeliveryAcker>,
}

impl InboundDelivery {
    pub fn new(
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            body,
            redelivered,
            acker,
        }
    }

    pub async fn settle(self, decision: AckDecision) -> Result<(), MessagingError> {
        self.acker.settle(decision).await
    }
}

impl fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("bytes", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, MessagingError>>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Idempotently declares exchanges, queues, bindings and dead-letter routes.
    async fn declare(&self, topology: &Topology) -> Result<(), MessagingError>;

    async fn publish(&self, message: &OutboundMessage) -> Result<(), MessagingError>;

    /// Starts a manual-ack consumer on `queue`. Calling it again after a
    /// stream has ended resumes consumption.
    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, MessagingError>;
}
