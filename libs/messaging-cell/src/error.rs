use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Failed to declare {name}: {reason}")]
    Topology { name: String, reason: String },

    #[error("Failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("Consumer error on {queue}: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Failed to settle delivery: {0}")]
    Acknowledge(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    pub fn topology(name: &str, reason: impl ToString) -> Self {
        Self::Topology { name: name.to_string(), reason: reason.to_string() }
    }

    pub fn publish(routing_key: &str, reason: impl ToString) -> Self {
        Self::Publish { routing_key: routing_key.to_string(), reason: reason.to_string() }
    }

    pub fn consume(queue: &str, reason: impl ToString) -> Self {
        Self::Consume { queue: queue.to_string(), reason: reason.to_string() }
    }

    /// Whether a reconnect-and-retry might succeed.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Publish { .. })
    }
}
