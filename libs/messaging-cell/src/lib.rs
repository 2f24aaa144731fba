pub mod broker;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod rabbitmq;
pub mod topology;

pub use broker::{AckDecision, DeliveryAcker, DeliveryStream, InboundDelivery, MessageBroker, OutboundMessage};
pub use consumer::EventConsumer;
pub use dispatcher::{EventDispatcher, EventHandler, HandlerError};
pub use error::MessagingError;
pub use memory::{DeadLetter, InMemoryBroker, Settlement};
pub use publisher::EventPublisher;
pub use rabbitmq::RabbitMqBroker;
pub use topology::{routing, Topology, APPOINTMENTS_EXCHANGE, NOTIFICATIONS_EXCHANGE};
