#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use appointment_cell::{
    AppointmentOrchestrator, CreateAppointmentRequest, DirectoryError, DirectoryLookup,
    InMemoryAppointmentStore, InMemoryNotificationStore, ProviderType,
};
use messaging_cell::{EventPublisher, InMemoryBroker};
use scheduling_cell::InMemoryAvailabilityCache;

/// Directory double: every id resolves unless marked missing, and the
/// whole service can be taken down.
pub struct StubDirectory {
    service: &'static str,
    missing: Mutex<HashSet<Uuid>>,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl StubDirectory {
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            missing: Mutex::new(HashSet::new()),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn mark_missing(&self, id: Uuid) {
        self.missing.lock().unwrap().insert(id);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryLookup for StubDirectory {
    async fn get_by_id(&self, id: Uuid, _auth_token: Option<&str>) -> Result<Value, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable {
                service: self.service.to_string(),
                reason: "circuit open".to_string(),
            });
        }
        if self.missing.lock().unwrap().contains(&id) {
            return Err(DirectoryError::NotFound { service: self.service.to_string(), entity: "Entity", id });
        }
        Ok(json!({ "id": id }))
    }
}

pub struct Harness {
    pub orchestrator: Arc<AppointmentOrchestrator>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub notifications: Arc<InMemoryNotificationStore>,
    pub providers: Arc<StubDirectory>,
    pub patients: Arc<StubDirectory>,
    pub cache: Arc<InMemoryAvailabilityCache>,
    pub broker: InMemoryBroker,
}

pub fn harness() -> Harness {
    harness_with_broker(InMemoryBroker::new())
}

pub fn harness_with_broker(broker: InMemoryBroker) -> Harness {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let providers = Arc::new(StubDirectory::new("medecins-service"));
    let patients = Arc::new(StubDirectory::new("patients-service"));
    let cache = Arc::new(InMemoryAvailabilityCache::new());

    let orchestrator = Arc::new(AppointmentOrchestrator::new(
        store.clone(),
        notifications.clone(),
        providers.clone(),
        patients.clone(),
        EventPublisher::new(Arc::new(broker.clone()), "appointment-service"),
        cache.clone(),
    ));

    Harness { orchestrator, store, notifications, providers, patients, cache, broker }
}

/// A Monday, 09:00 UTC.
pub fn monday_nine() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 3, 9, 0, 0).unwrap()
}

pub fn request(patient_id: Uuid, provider_id: Uuid, at: DateTime<Utc>, minutes: i64) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id,
        provider_id,
        provider_type: ProviderType::Doctor,
        appointment_type: "consultation".to_string(),
        appointment_date: at,
        duration_minutes: minutes,
        reason: Some("Checkup".to_string()),
        notes: None,
        is_virtual: false,
        meeting_link: None,
        medical_file_ids: Vec::new(),
    }
}

pub fn half_hour_later(at: DateTime<Utc>) -> DateTime<Utc> {
    at + Duration::minutes(30)
}
