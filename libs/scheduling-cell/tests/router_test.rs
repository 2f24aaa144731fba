use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use messaging_cell::{routing, EventPublisher, InMemoryBroker};
use scheduling_cell::{
    scheduling_routes, AvailabilityService, BookedInterval, BookingSource,
    InMemoryAvailabilityCache, InMemoryScheduleStore, SchedulingError, SchedulingState,
};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct NoBookings;

#[async_trait]
impl BookingSource for NoBookings {
    async fn booked_intervals(
        &self,
        _provider_ids: &[Uuid],
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, SchedulingError> {
        Ok(Vec::new())
    }
}

fn app(config: &TestConfig, broker: &InMemoryBroker) -> Router {
    let availability = AvailabilityService::new(
        Arc::new(InMemoryScheduleStore::new()),
        Arc::new(NoBookings),
        Arc::new(InMemoryAvailabilityCache::new()),
        Duration::from_secs(60),
    );
    scheduling_routes(Arc::new(SchedulingState {
        config: config.to_arc(),
        availability: Arc::new(availability),
        publisher: EventPublisher::new(Arc::new(broker.clone()), "appointment-service"),
    }))
}

fn schedule_body(provider_id: Uuid) -> Value {
    json!({
        "provider_id": provider_id,
        "provider_type": "doctor",
        "work_hours": {"0": {"start": 9, "end": 11}}
    })
}

fn put_schedule(token: &str, path_id: Uuid, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(format!("/provider-schedule/{}", path_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(token: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requires_a_bearer_token() {
    let config = TestConfig::default();
    let response = app(&config, &InMemoryBroker::new())
        .oneshot(
            Request::builder()
                .uri("/available-slots?start_date=2025-01-06")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provider_updates_own_schedule_and_announces_it() {
    let config = TestConfig::default();
    let broker = InMemoryBroker::new();
    let app = app(&config, &broker);
    let provider_id = Uuid::new_v4();
    let token = JwtTestUtils::create_test_token(&TestUser::with_id(provider_id, "doctor"), &config.jwt_secret, None);

    let response = app
        .clone()
        .oneshot(put_schedule(&token, provider_id, &schedule_body(provider_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(broker.published_keys().await, vec![routing::PROVIDER_SCHEDULE_UPDATED.to_string()]);
    assert_eq!(broker.published().await[0].payload["provider_type"], "doctor");

    let response = app
        .oneshot(get(
            &token,
            &format!(
                "/available-slots?provider_id={}&start_date=2025-01-06&end_date=2025-01-06&duration_minutes=60",
                provider_id
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["slots"][0]["start"], "2025-01-06T09:00:00Z");
}

#[tokio::test]
async fn other_providers_cannot_replace_a_schedule() {
    let config = TestConfig::default();
    let broker = InMemoryBroker::new();
    let provider_id = Uuid::new_v4();
    let token = JwtTestUtils::create_test_token(&TestUser::doctor("other@example.com"), &config.jwt_secret, None);

    let response = app(&config, &broker)
        .oneshot(put_schedule(&token, provider_id, &schedule_body(provider_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(broker.published().await.is_empty());
}

#[tokio::test]
async fn admin_may_replace_any_schedule_but_ids_must_agree() {
    let config = TestConfig::default();
    let broker = InMemoryBroker::new();
    let app = app(&config, &broker);
    let token = JwtTestUtils::create_test_token(&TestUser::admin("admin@example.com"), &config.jwt_secret, None);
    let provider_id = Uuid::new_v4();

    let mismatched = app
        .clone()
        .oneshot(put_schedule(&token, Uuid::new_v4(), &schedule_body(provider_id)))
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::BAD_REQUEST);

    let accepted = app
        .oneshot(put_schedule(&token, provider_id, &schedule_body(provider_id)))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_schedule_is_not_found() {
    let config = TestConfig::default();
    let token = JwtTestUtils::create_test_token(&TestUser::patient("p@example.com"), &config.jwt_secret, None);

    let response = app(&config, &InMemoryBroker::new())
        .oneshot(get(&token, &format!("/provider-schedule/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_range_is_a_validation_error() {
    let config = TestConfig::default();
    let token = JwtTestUtils::create_test_token(&TestUser::patient("p@example.com"), &config.jwt_secret, None);

    let response = app(&config, &InMemoryBroker::new())
        .oneshot(get(&token, "/available-slots?start_date=2025-01-01&end_date=2025-12-31"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expired_or_forged_tokens_are_unauthorized() {
    let config = TestConfig::default();
    let user = TestUser::patient("p@example.com");
    let app = app(&config, &InMemoryBroker::new());
    let uri = "/available-slots?start_date=2025-01-06";

    for token in [
        JwtTestUtils::create_expired_token(&user, &config.jwt_secret),
        JwtTestUtils::create_invalid_signature_token(&user),
    ] {
        let response = app.clone().oneshot(get(&token, uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn huge_slot_duration_is_a_validation_error() {
    let config = TestConfig::default();
    let token = JwtTestUtils::create_test_token(&TestUser::patient("p@example.com"), &config.jwt_secret, None);
    let app = app(&config, &InMemoryBroker::new());

    let max = i64::MAX.to_string();
    for duration in ["1441", "1000000000000", max.as_str()] {
        let uri = format!("/available-slots?start_date=2025-01-06&duration_minutes={}", duration);
        let response = app.clone().oneshot(get(&token, &uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
