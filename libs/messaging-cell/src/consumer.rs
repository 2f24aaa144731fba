use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::broker::{DeliveryStream, MessageBroker};
use crate::dispatcher::EventDispatcher;
use crate::error::MessagingError;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// One consume loop per queue, all feeding the same dispatcher.
pub struct EventConsumer {
    broker: Arc<dyn MessageBroker>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_delay: Duration,
}

impl EventConsumer {
    pub fn new(broker: Arc<dyn MessageBroker>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { broker, dispatcher, reconnect_delay: DEFAULT_RECONNECT_DELAY }
    }

    /// First wait before resubscribing to a queue whose stream ended.
    /// Doubles on every failed attempt, up to 30 seconds.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Subscribes to every queue before spawning, so a missing queue fails
    /// startup instead of a background task.
    pub async fn start(
        &self,
        queues: &[String],
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, MessagingError> {
        let mut streams = Vec::with_capacity(queues.len());
        for queue in queues {
            streams.push((queue.clone(), self.broker.subscribe(queue).await?));
        }

        let handles = streams
            .into_iter()
            .map(|(queue, stream)| {
                let consumer = QueueConsumer {
                    broker: Arc::clone(&self.broker),
                    dispatcher: Arc::clone(&self.dispatcher),
                    reconnect_delay: self.reconnect_delay,
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(consumer.run(queue, stream))
            })
            .collect();

        Ok(handles)
    }
}

struct QueueConsumer {
    broker: Arc<dyn MessageBroker>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl QueueConsumer {
    fn stopping(&self, changed: Result<(), watch::error::RecvError>) -> bool {
        changed.is_err() || *self.shutdown.borrow()
    }

    #[instrument(skip(self, stream))]
    async fn run(mut self, queue: String, mut stream: DeliveryStream) {
        info!("Consumer started for {}", queue);

        loop {
            let ended = tokio::select! {
                changed = self.shutdown.changed() => {
                    if self.stopping(changed) {
                        break;
                    }
                    false
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let decision = self.dispatcher.dispatch(&delivery).await;
                        let routing_key = delivery.routing_key.clone();
                        if let Err(e) = delivery.settle(decision).await {
                            error!("Failed to settle {} with {:?}: {}", routing_key, decision, e);
                        }
                        false
                    }
                    Some(Err(e)) => {
                        error!("Delivery error on {}: {}", queue, e);
                        false
                    }
                    None => true,
                }
            };

            if ended {
                warn!("Delivery stream for {} ended, resubscribing", queue);
                match self.resubscribe(&queue).await {
                    Some(next) => stream = next,
                    None => break,
                }
            }
        }

        info!("Consumer for {} shutting down", queue);
    }

    /// Retries with exponential backoff until subscribed or shut down.
    async fn resubscribe(&mut self, queue: &str) -> Option<DeliveryStream> {
        let mut delay = self.reconnect_delay;
        loop {
            let stop = tokio::select! {
                changed = self.shutdown.changed() => self.stopping(changed),
                _ = tokio::time::sleep(delay) => false,
            };
            if stop {
                return None;
            }

            match self.broker.subscribe(queue).await {
                Ok(stream) => {
                    info!("Resubscribed to {}", queue);
                    return Some(stream);
                }
                Err(e) => {
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    warn!("Resubscribing to {} failed, next attempt in {:?}: {}", queue, delay, e);
                }
            }
        }
    }
}
