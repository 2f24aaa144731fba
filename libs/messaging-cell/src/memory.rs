use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::broker::{AckDecision, DeliveryAcker, DeliveryStream, InboundDelivery, MessageBroker, OutboundMessage};
use crate::error::MessagingError;
use crate::topology::{topic_matches, QueueSpec, Topology};

#[derive(Debug, Clone)]
struct QueuedMessage {
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

/// Record of how a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub queue: String,
    pub routing_key: String,
    pub decision: AckDecision,
}

struct MemoryQueue {
    spec: QueueSpec,
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedMessage>>>,
    consuming: bool,
    /// Bumped to end the active consumer stream.
    disconnects: watch::Sender<u64>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub routing_key: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, MemoryQueue>,
    published: Vec<OutboundMessage>,
    failing_publishes: u32,
}

/// Broker with AMQP topic routing semantics, held entirely in process.
/// Used by tests and by local runs without RabbitMQ.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with a connection error.
    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.lock().await.failing_publishes = count;
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.published.clone()
    }

    pub async fn published_keys(&self) -> Vec<String> {
        self.published().await.into_iter().map(|m| m.routing_key).collect()
    }

    pub async fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().await.clone()
    }

    pub async fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        let dead_letters = {
            let state = self.state.lock().await;
            match state.queues.get(queue) {
                Some(q) => Arc::clone(&q.dead_letters),
                None => return Vec::new(),
            }
        };
        let letters = dead_letters.lock().await;
        letters.clone()
    }

    /// Ends the active consumer stream on `queue`, as a dropped connection
    /// would. Queued messages stay put for the next subscriber.
    pub async fn disconnect(&self, queue: &str) -> Result<(), MessagingError> {
        let mut state = self.state.lock().await;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::consume(queue, "queue not declared"))?;
        target.consuming = false;
        target.disconnects.send_modify(|generation| *generation += 1);
        Ok(())
    }

    /// Pushes a raw body straight onto a queue, bypassing exchange routing.
    pub async fn inject(&self, queue: &str, routing_key: &str, body: Vec<u8>) -> Result<(), MessagingError> {
        let state = self.state.lock().await;
        let target = state
            .queues
            .get(queue)
            .ok_or_else(|| MessagingError::consume(queue, "queue not declared"))?;
        target
            .sender
            .send(QueuedMessage { routing_key: routing_key.to_string(), body, redelivered: false })
            .map_err(|e| MessagingError::consume(queue, e))
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), MessagingError> {
        let mut state = self.state.lock().await;
        for spec in &topology.queues {
            state.queues.entry(spec.name.clone()).or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                MemoryQueue {
                    spec: spec.clone(),
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                    consuming: false,
                    disconnects: watch::Sender::new(0),
                    dead_letters: Arc::new(Mutex::new(Vec::new())),
                }
            });
        }
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), MessagingError> {
        let mut state = self.state.lock().await;
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(MessagingError::connection("simulated broker outage"));
        }

        let body = serde_json::to_vec(&message.payload)?;
        for queue in state.queues.values() {
            if queue.spec.exchange == message.exchange
                && topic_matches(&queue.spec.binding_key, &message.routing_key)
            {
                debug!("Routing {} to {}", message.routing_key, queue.spec.name);
                let _ = queue.sender.send(QueuedMessage {
                    routing_key: message.routing_key.clone(),
                    body: body.clone(),
                    redelivered: false,
                });
            }
        }

        state.published.push(message.clone());
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        let mut state = self.state.lock().await;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::consume(queue, "queue not declared"))?;
        if target.consuming {
            return Err(MessagingError::consume(queue, "queue already has a consumer"));
        }
        target.consuming = true;

        let queue_name = queue.to_string();
        let receiver = Arc::clone(&target.receiver);
        let disconnected = target.disconnects.subscribe();
        let requeue = target.sender.clone();
        let dead_letters = Arc::clone(&target.dead_letters);
        let settlements = Arc::clone(&self.settlements);

        let stream = futures::stream::unfold((receiver, disconnected), |(receiver, mut disconnected)| async move {
            let next = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    message = rx.recv() => message,
                    _ = disconnected.changed() => None,
                }
            };
            next.map(|message| (message, (receiver, disconnected)))
        })
        .map(move |message| {
            let acker = MemoryAcker {
                queue: queue_name.clone(),
                message: message.clone(),
                requeue: requeue.clone(),
                dead_letters: Arc::clone(&dead_letters),
                settlements: Arc::clone(&settlements),
            };
            Ok::<_, MessagingError>(InboundDelivery::new(
                queue_name.clone(),
                message.routing_key,
                message.body,
                message.redelivered,
                Box::new(acker),
            ))
        });

        Ok(stream.boxed())
    }
}

struct MemoryAcker {
    queue: String,
    message: QueuedMessage,
    requeue: mpsc::UnboundedSender<QueuedMessage>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn settle(self: Box<Self>, decision: AckDecision) -> Result<(), MessagingError> {
        let this = *self;
        match decision {
            AckDecision::Ack => {}
            AckDecision::Reject => this.dead_letters.lock().await.push(DeadLetter {
                routing_key: this.message.routing_key.clone(),
                body: this.message.body.clone(),
            }),
            AckDecision::Requeue => {
                let redelivery = QueuedMessage { redelivered: true, ..this.message.clone() };
                this.requeue
                    .send(redelivery)
                    .map_err(|e| MessagingError::Acknowledge(e.to_string()))?;
            }
        }

        this.settlements.lock().await.push(Settlement {
            queue: this.queue,
            routing_key: this.message.routing_key,
            decision,
        });
        Ok(())
    }
}
