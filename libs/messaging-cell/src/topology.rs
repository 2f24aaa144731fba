//! Exchanges, queues and routing keys used by the appointment service.

pub const APPOINTMENTS_EXCHANGE: &str = "medical.appointments";
pub const NOTIFICATIONS_EXCHANGE: &str = "medical.notifications";
pub const EVENTS_EXCHANGE: &str = "medical.events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Topic,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub exchange: String,
    pub binding_key: String,
    /// Rejected deliveries are routed to `<name>.dlx` / `<name>.dlq`.
    pub dead_letter: bool,
}

impl QueueSpec {
    pub fn new(name: &str, exchange: &str, binding_key: &str) -> Self {
        Self {
            name: name.to_string(),
            exchange: exchange.to_string(),
            binding_key: binding_key.to_string(),
            dead_letter: true,
        }
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
}

impl Topology {
    pub fn appointment_service() -> Self {
        let exchanges = [APPOINTMENTS_EXCHANGE, NOTIFICATIONS_EXCHANGE, EVENTS_EXCHANGE]
            .into_iter()
            .map(|name| ExchangeSpec { name: name.to_string(), kind: ExchangeType::Topic })
            .collect();

        let queues = vec![
            QueueSpec::new("appointment.requests", APPOINTMENTS_EXCHANGE, "appointment.request.#"),
            QueueSpec::new("appointment.responses", APPOINTMENTS_EXCHANGE, "appointment.response.#"),
            QueueSpec::new("appointment.status.updates", APPOINTMENTS_EXCHANGE, "appointment.status.#"),
            QueueSpec::new("appointment.cancellations", APPOINTMENTS_EXCHANGE, routing::APPOINTMENT_CANCELLED),
            QueueSpec::new("appointment.reminders", APPOINTMENTS_EXCHANGE, "appointment.reminder.#"),
            QueueSpec::new("provider.schedule.updates", APPOINTMENTS_EXCHANGE, "provider.schedule.#"),
        ];

        Self { exchanges, queues }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}

/// AMQP topic match: words are dot separated, `*` matches exactly one word,
/// `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

pub mod routing {
    pub const APPOINTMENT_REQUEST_CREATED: &str = "appointment.request.created";
    pub const APPOINTMENT_RESPONSE_ACCEPTED: &str = "appointment.response.accepted";
    pub const APPOINTMENT_RESPONSE_REJECTED: &str = "appointment.response.rejected";
    pub const APPOINTMENT_STATUS_UPDATED: &str = "appointment.status.updated";
    pub const APPOINTMENT_CANCELLED: &str = "appointment.cancelled";
    pub const APPOINTMENT_REMINDER_NEEDED: &str = "appointment.reminder.needed";
    pub const PROVIDER_SCHEDULE_UPDATED: &str = "provider.schedule.updated";
    pub const APPOINTMENT_CREATED: &str = "appointment.created";

    pub fn status_changed(status: &str) -> String {
        format!("appointment.status.{}", status)
    }

    pub fn response(decision: &str) -> String {
        format!("appointment.response.{}", decision)
    }

    pub fn notification(role: &str, kind: &str) -> String {
        format!("notification.{}.{}", role, kind)
    }
}
