use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::broker::{AckDecision, DeliveryAcker, DeliveryStream, InboundDelivery, MessageBroker, OutboundMessage};
use crate::error::MessagingError;
use crate::topology::{ExchangeType, QueueSpec, Topology};

struct Session {
    connection: Connection,
    channel: Channel,
}

/// lapin-backed broker. The publishing channel is re-established when the
/// connection has dropped; consumers get their own channel.
pub struct RabbitMqBroker {
    url: String,
    connection_name: String,
    prefetch_count: u16,
    session: Mutex<Option<Session>>,
}

impl RabbitMqBroker {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
            prefetch_count,
            session: Mutex::new(None),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(&config.rabbitmq_url, &config.service_name, config.rabbitmq_prefetch_count)
    }

    /// Connects eagerly so startup fails fast on a bad URL.
    pub async fn connect(&self) -> Result<(), MessagingError> {
        self.channel().await.map(|_| ())
    }

    /// Scheme and host only.
    pub fn connection_url_redacted(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) => format!("{}{}", &self.url[..scheme_end + 3], &self.url[at + 1..]),
            _ => self.url.clone(),
        }
    }

    async fn open_session(&self) -> Result<Session, MessagingError> {
        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ channel creation failed: {}", e)))?;

        info!("Connected to RabbitMQ at {}", self.connection_url_redacted());
        Ok(Session { connection, channel })
    }

    async fn channel(&self) -> Result<Channel, MessagingError> {
        let mut session = self.session.lock().await;

        let healthy = session
            .as_ref()
            .map(|s| s.connection.status().connected() && s.channel.status().connected())
            .unwrap_or(false);

        if !healthy {
            if session.is_some() {
                warn!("RabbitMQ connection lost, reconnecting");
            }
            *session = Some(self.open_session().await?);
        }

        session
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or_else(|| MessagingError::connection("no RabbitMQ session"))
    }

    async fn reset(&self) {
        self.session.lock().await.take();
    }

    async fn declare_queue(&self, channel: &Channel, queue: &QueueSpec) -> Result<(), MessagingError> {
        let mut args = FieldTable::default();

        if queue.dead_letter {
            let dlx = queue.dead_letter_exchange();
            let dlq = queue.dead_letter_queue();

            channel
                .exchange_declare(
                    &dlx,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::topology(&dlx, e))?;

            channel
                .queue_declare(
                    &dlq,
                    QueueDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::topology(&dlq, e))?;

            channel
                .queue_bind(&dlq, &dlx, &queue.name, QueueBindOptions::default(), FieldTable::default())
                .await
                .map_err(|e| MessagingError::topology(&dlq, e))?;

            args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(dlx.into()));
            args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(queue.name.clone().into()));
        }

        channel
            .queue_declare(&queue.name, QueueDeclareOptions { durable: true, ..Default::default() }, args)
            .await
            .map_err(|e| MessagingError::topology(&queue.name, e))?;

        channel
            .queue_bind(
                &queue.name,
                &queue.exchange,
                &queue.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology(&queue.name, e))?;

        debug!("Declared queue {} bound to {} with {}", queue.name, queue.exchange, queue.binding_key);
        Ok(())
    }

    async fn publish_once(&self, message: &OutboundMessage) -> Result<(), MessagingError> {
        let channel = self.channel().await?;
        let body = serde_json::to_vec(&message.payload)?;

        let mut headers = FieldTable::default();
        for (key, value) in &message.headers {
            headers.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
        }

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_timestamp(message.timestamp.timestamp().max(0) as u64)
            .with_message_id(message.message_id.clone().into())
            .with_headers(headers);

        channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::publish(&message.routing_key, e))?
            .await
            .map_err(|e| MessagingError::publish(&message.routing_key, format!("confirmation failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), MessagingError> {
        let channel = self.channel().await?;

        for exchange in &topology.exchanges {
            let kind = match exchange.kind {
                ExchangeType::Topic => ExchangeKind::Topic,
                ExchangeType::Direct => ExchangeKind::Direct,
            };
            channel
                .exchange_declare(
                    &exchange.name,
                    kind,
                    ExchangeDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::topology(&exchange.name, e))?;
        }

        for queue in &topology.queues {
            self.declare_queue(&channel, queue).await?;
        }

        info!(
            "RabbitMQ topology declared: {} exchanges, {} queues",
            topology.exchanges.len(),
            topology.queues.len()
        );
        Ok(())
    }

    /// One reconnect-and-retry on failure.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), MessagingError> {
        match self.publish_once(message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_level() => {
                warn!("Publish to {} failed ({}), retrying on a fresh connection", message.routing_key, e);
                self.reset().await;
                self.publish_once(message).await
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        // Ensures a live session before opening a dedicated consumer channel.
        self.channel().await?;

        let channel = {
            let session = self.session.lock().await;
            let session = session
                .as_ref()
                .ok_or_else(|| MessagingError::connection("no RabbitMQ session"))?;
            session
                .connection
                .create_channel()
                .await
                .map_err(|e| MessagingError::consume(queue, e))?
        };

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::consume(queue, format!("failed to set QoS: {}", e)))?;

        let consumer_tag = format!("{}-{}", self.connection_name, Uuid::new_v4());
        let consumer = channel
            .basic_consume(queue, &consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::consume(queue, e))?;

        info!("Consuming from {} as {}", queue, consumer_tag);

        let queue_name = queue.to_string();
        let stream = consumer.map(move |delivery| {
            let delivery = delivery.map_err(|e| MessagingError::consume(&queue_name, e))?;
            Ok(InboundDelivery::new(
                queue_name.clone(),
                delivery.routing_key.as_str(),
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });

        Ok(stream.boxed())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn settle(self: Box<Self>, decision: AckDecision) -> Result<(), MessagingError> {
        let result = match decision {
            AckDecision::Ack => self.0.ack(BasicAckOptions::default()).await,
            AckDecision::Reject => self.0.reject(BasicRejectOptions { requeue: false }).await,
            AckDecision::Requeue => {
                self.0
                    .nack(BasicNackOptions { requeue: true, ..Default::default() })
                    .await
            }
        };
        result
            .map(|_| ())
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }
}
