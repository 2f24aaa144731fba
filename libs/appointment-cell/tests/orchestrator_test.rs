mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::{
    AppointmentError, AppointmentListQuery, AppointmentStatus, AppointmentStore, NotificationKind,
    NotificationStore, ResponseDecision, Transition, UpdateAppointmentRequest,
};
use messaging_cell::{routing, InMemoryBroker};
use scheduling_cell::{AvailabilityCache, ProviderType, TimeSlot};

use common::{harness, harness_with_broker, monday_nine, request};

fn cached_slot(provider_id: Uuid) -> Vec<TimeSlot> {
    vec![TimeSlot {
        start: monday_nine(),
        end: monday_nine() + Duration::minutes(30),
        provider_id,
        provider_type: ProviderType::Doctor,
        is_available: true,
    }]
}

#[tokio::test]
async fn create_stores_pending_and_announces() {
    let h = harness();
    let (patient, provider) = (Uuid::new_v4(), Uuid::new_v4());

    let appointment = h
        .orchestrator
        .create(request(patient, provider, monday_nine(), 30), Some("token"))
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(h.store.get(appointment.id).await.unwrap(), Some(appointment.clone()));
    assert_eq!(h.providers.calls(), 1);
    assert_eq!(h.patients.calls(), 1);

    let keys = h.broker.published_keys().await;
    assert_eq!(keys[0], routing::APPOINTMENT_CREATED);
    assert!(keys.contains(&"notification.doctor.appointment_request".to_string()));
    assert!(keys.contains(&"notification.patient.appointment_request".to_string()));

    let stored = h.notifications.for_appointment(appointment.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|n| n.kind == NotificationKind::Request));
}

#[tokio::test]
async fn create_with_unknown_provider_writes_nothing() {
    let h = harness();
    let (patient, provider) = (Uuid::new_v4(), Uuid::new_v4());
    h.providers.mark_missing(provider);

    let result = h.orchestrator.create(request(patient, provider, monday_nine(), 30), None).await;

    assert_matches!(result, Err(AppointmentError::ParticipantNotFound { id, .. }) if id == provider);
    assert_eq!(h.patients.calls(), 0);
    assert!(h.broker.published().await.is_empty());
}

#[tokio::test]
async fn create_fails_closed_when_directory_is_down() {
    let h = harness();
    h.patients.set_down(true);

    let result = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await;

    assert_matches!(result, Err(AppointmentError::DependencyUnavailable(_)));
    assert!(h.broker.published().await.is_empty());
}

#[tokio::test]
async fn invalid_request_is_rejected_before_lookups() {
    let h = harness();
    let same = Uuid::new_v4();

    let result = h.orchestrator.create(request(same, same, monday_nine(), 30), None).await;
    assert_matches!(result, Err(AppointmentError::Validation(_)));

    let result = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 0), None)
        .await;
    assert_matches!(result, Err(AppointmentError::Validation(_)));
    assert_eq!(h.providers.calls(), 0);
}

#[tokio::test]
async fn overlapping_request_for_same_provider_is_a_conflict() {
    let h = harness();
    let provider = Uuid::new_v4();

    h.orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 60), None)
        .await
        .unwrap();

    let overlapping = request(Uuid::new_v4(), provider, monday_nine() + Duration::minutes(30), 30);
    assert_matches!(
        h.orchestrator.create(overlapping, None).await,
        Err(AppointmentError::Conflict(_))
    );

    // Touching intervals do not overlap.
    let adjacent = request(Uuid::new_v4(), provider, monday_nine() + Duration::minutes(60), 30);
    h.orchestrator.create(adjacent, None).await.unwrap();

    // Another provider at the same time is fine.
    h.orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 60), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_requests_for_one_slot_book_once() {
    let h = harness();
    let provider = Uuid::new_v4();

    let attempts = (0..8).map(|_| {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move {
            orchestrator
                .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
                .await
        })
    });

    let mut booked = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => booked += 1,
            Err(e) => assert_matches!(e, AppointmentError::Conflict(_)),
        }
    }
    assert_eq!(booked, 1);
}

#[tokio::test]
async fn cancelled_slot_can_be_rebooked() {
    let h = harness();
    let provider = Uuid::new_v4();
    let first = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();

    h.orchestrator.cancel(first.id, Some("Patient ill".to_string())).await.unwrap();

    h.orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn respond_accept_confirms_and_notifies_patient() {
    let h = harness();
    let provider = Uuid::new_v4();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();

    let applied = h
        .orchestrator
        .respond(created.id, provider, ResponseDecision::Accepted, None)
        .await
        .unwrap();

    assert_eq!(applied.transition, Transition::Apply);
    assert_eq!(applied.appointment.status, AppointmentStatus::Confirmed);

    let keys = h.broker.published_keys().await;
    assert!(keys.contains(&"appointment.response.accepted".to_string()));
    assert!(keys.contains(&"notification.patient.appointment_confirmed".to_string()));
}

#[tokio::test]
async fn respond_reject_keeps_message_as_reason() {
    let h = harness();
    let provider = Uuid::new_v4();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();

    let applied = h
        .orchestrator
        .respond(created.id, provider, ResponseDecision::Rejected, Some("Fully booked".to_string()))
        .await
        .unwrap();

    assert_eq!(applied.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(applied.appointment.cancellation_reason.as_deref(), Some("Fully booked"));
}

#[tokio::test]
async fn only_assigned_provider_may_respond() {
    let h = harness();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await
        .unwrap();

    let result = h
        .orchestrator
        .respond(created.id, Uuid::new_v4(), ResponseDecision::Accepted, None)
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden(_)));
    assert_eq!(h.orchestrator.get(created.id).await.unwrap().status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn repeated_response_is_a_no_op() {
    let h = harness();
    let provider = Uuid::new_v4();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();

    h.orchestrator
        .respond(created.id, provider, ResponseDecision::Accepted, None)
        .await
        .unwrap();
    let published = h.broker.published().await.len();

    let again = h
        .orchestrator
        .respond(created.id, provider, ResponseDecision::Accepted, None)
        .await
        .unwrap();

    assert_eq!(again.transition, Transition::AlreadyApplied);
    assert_eq!(h.broker.published().await.len(), published);

    // A late rejection cannot undo the confirmation.
    let late = h
        .orchestrator
        .respond(created.id, provider, ResponseDecision::Rejected, None)
        .await;
    assert_matches!(
        late,
        Err(AppointmentError::InvalidTransition { from: AppointmentStatus::Confirmed, to: AppointmentStatus::Cancelled })
    );
}

#[tokio::test]
async fn status_moves_follow_the_lattice() {
    let h = harness();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await
        .unwrap();

    assert_matches!(
        h.orchestrator.update_status(created.id, AppointmentStatus::Completed).await,
        Err(AppointmentError::InvalidTransition { .. })
    );

    h.orchestrator.update_status(created.id, AppointmentStatus::Confirmed).await.unwrap();
    let done = h
        .orchestrator
        .update_status(created.id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(done.appointment.status, AppointmentStatus::Completed);
    assert!(h.broker.published_keys().await.contains(&"appointment.status.completed".to_string()));

    assert_matches!(
        h.orchestrator.cancel(created.id, None).await,
        Err(AppointmentError::InvalidTransition { from: AppointmentStatus::Completed, .. })
    );
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let h = harness();
    let id = Uuid::new_v4();

    assert_matches!(h.orchestrator.get(id).await, Err(AppointmentError::NotFound(missing)) if missing == id);
    assert_matches!(
        h.orchestrator.update_status(id, AppointmentStatus::Confirmed).await,
        Err(AppointmentError::NotFound(_))
    );
}

#[tokio::test]
async fn cancel_twice_reports_already_applied() {
    let h = harness();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await
        .unwrap();

    let first = h.orchestrator.cancel(created.id, None).await.unwrap();
    let second = h.orchestrator.cancel(created.id, None).await.unwrap();

    assert_eq!(first.transition, Transition::Apply);
    assert_eq!(second.transition, Transition::AlreadyApplied);
    let cancellations = h
        .broker
        .published_keys()
        .await
        .into_iter()
        .filter(|k| k == routing::APPOINTMENT_CANCELLED)
        .count();
    assert_eq!(cancellations, 1);
}

#[tokio::test]
async fn reminders_are_sent_once_per_participant() {
    let h = harness();
    let provider = Uuid::new_v4();
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();

    assert_matches!(h.orchestrator.reminder(created.id).await, Err(AppointmentError::Conflict(_)));

    h.orchestrator
        .respond(created.id, provider, ResponseDecision::Accepted, None)
        .await
        .unwrap();

    assert_eq!(h.orchestrator.reminder(created.id).await.unwrap(), 2);
    assert_eq!(h.orchestrator.reminder(created.id).await.unwrap(), 0);

    let reminders = h
        .notifications
        .for_appointment(created.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Reminder)
        .count();
    assert_eq!(reminders, 2);
}

#[tokio::test]
async fn publish_failure_does_not_undo_the_write() {
    let broker = InMemoryBroker::new();
    broker.fail_next_publishes(10).await;
    let h = harness_with_broker(broker);

    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await
        .unwrap();

    assert!(h.store.get(created.id).await.unwrap().is_some());
    assert!(h.broker.published().await.is_empty());
}

#[tokio::test]
async fn slot_changes_invalidate_cached_availability() {
    let h = harness();
    let provider = Uuid::new_v4();
    let key = format!("availability:provider:{}:2030-06-03:2030-06-04:30", provider);

    h.cache.put(&key, &cached_slot(provider), StdDuration::from_secs(300)).await;
    let created = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();
    assert!(h.cache.get(&key).await.is_none());

    h.cache.put(&key, &cached_slot(provider), StdDuration::from_secs(300)).await;
    h.orchestrator
        .respond(created.id, provider, ResponseDecision::Accepted, None)
        .await
        .unwrap();
    // Confirming keeps the slot taken; the cached view is still correct.
    assert!(h.cache.get(&key).await.is_some());

    h.orchestrator.cancel(created.id, None).await.unwrap();
    assert!(h.cache.get(&key).await.is_none());
}

#[tokio::test]
async fn schedule_update_drops_provider_entries() {
    let h = harness();
    let provider = Uuid::new_v4();
    let other = Uuid::new_v4();
    h.cache
        .put(&format!("availability:provider:{}:a", provider), &cached_slot(provider), StdDuration::from_secs(300))
        .await;
    h.cache
        .put(&format!("availability:provider:{}:a", other), &cached_slot(other), StdDuration::from_secs(300))
        .await;

    assert_eq!(h.orchestrator.provider_schedule_updated(provider).await, 1);
    assert_eq!(h.cache.len().await, 1);
}

#[tokio::test]
async fn reschedule_checks_overlap_and_terminal_state() {
    let h = harness();
    let provider = Uuid::new_v4();
    let first = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine(), 30), None)
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create(request(Uuid::new_v4(), provider, monday_nine() + Duration::hours(2), 30), None)
        .await
        .unwrap();

    let onto_first = UpdateAppointmentRequest {
        appointment_date: Some(monday_nine() + Duration::minutes(15)),
        ..Default::default()
    };
    assert_matches!(
        h.orchestrator.update(second.id, onto_first).await,
        Err(AppointmentError::Conflict(_))
    );

    let moved = h
        .orchestrator
        .update(
            second.id,
            UpdateAppointmentRequest {
                appointment_date: Some(monday_nine() + Duration::hours(3)),
                notes: Some("Bring results".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.appointment_date, monday_nine() + Duration::hours(3));
    assert_eq!(moved.notes.as_deref(), Some("Bring results"));

    h.orchestrator.cancel(first.id, None).await.unwrap();
    let reschedule_cancelled = UpdateAppointmentRequest {
        appointment_date: Some(monday_nine() + Duration::hours(5)),
        ..Default::default()
    };
    assert_matches!(
        h.orchestrator.update(first.id, reschedule_cancelled).await,
        Err(AppointmentError::Conflict(_))
    );
}

#[tokio::test]
async fn list_pages_through_matching_appointments() {
    let h = harness();
    let patient = Uuid::new_v4();
    for hour in 0..3 {
        h.orchestrator
            .create(request(patient, Uuid::new_v4(), monday_nine() + Duration::hours(hour), 30), None)
            .await
            .unwrap();
    }
    h.orchestrator
        .create(request(Uuid::new_v4(), Uuid::new_v4(), monday_nine(), 30), None)
        .await
        .unwrap();

    let filter = AppointmentListQuery {
        patient_id: Some(patient),
        start_date: Some(monday_nine() - Duration::days(1)),
        limit: Some(2),
        page: Some(2),
        ..Default::default()
    }
    .into_filter(monday_nine())
    .unwrap();

    let page = h.orchestrator.list(&filter).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.pages, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].appointment_date, monday_nine() + Duration::hours(2));
}
