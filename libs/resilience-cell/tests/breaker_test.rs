use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use resilience_cell::{BreakerMode, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

fn config(threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        recovery_timeout: Duration::from_secs(30),
        half_open_max_calls: 1,
        call_timeout: Duration::from_secs(5),
    }
}

async fn fail(breaker: &CircuitBreaker) {
    let _ = breaker.execute(async { Err::<(), _>("boom") }).await;
}

async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CircuitBreakerError<&'static str>> {
    breaker.execute(async { Ok::<_, &'static str>(7) }).await
}

#[tokio::test(start_paused = true)]
async fn opens_after_threshold_and_short_circuits() {
    let breaker = CircuitBreaker::new("medecins-service", config(3));
    for _ in 0..3 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.mode().await, BreakerMode::Open);

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let result = breaker
        .execute(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &'static str>(())
        })
        .await;

    assert_matches!(result, Err(CircuitBreakerError::CircuitOpen { ref name }) if name == "medecins-service");
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(breaker.snapshot().await.rejections_total, 1);
}

#[tokio::test(start_paused = true)]
async fn success_resets_consecutive_failures() {
    let breaker = CircuitBreaker::new("patients-service", config(3));
    fail(&breaker).await;
    fail(&breaker).await;
    assert!(succeed(&breaker).await.is_ok());
    fail(&breaker).await;
    fail(&breaker).await;

    assert_eq!(breaker.mode().await, BreakerMode::Closed);
    assert_eq!(breaker.snapshot().await.consecutive_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn recovers_through_half_open_trial() {
    let breaker = CircuitBreaker::new("patients-service", config(1));
    fail(&breaker).await;
    assert_eq!(breaker.mode().await, BreakerMode::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_matches!(succeed(&breaker).await, Err(CircuitBreakerError::CircuitOpen { .. }));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(succeed(&breaker).await.unwrap(), 7);
    assert_eq!(breaker.mode().await, BreakerMode::Closed);

    let snapshot = breaker.snapshot().await;
    assert_eq!(snapshot.consecutive_failures, 0);
    // closed -> open -> half-open -> closed
    assert_eq!(snapshot.transitions_total, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_and_restarts_timer() {
    let breaker = CircuitBreaker::new("medecins-service", config(1));
    fail(&breaker).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    fail(&breaker).await;
    assert_eq!(breaker.mode().await, BreakerMode::Open);

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_matches!(succeed(&breaker).await, Err(CircuitBreakerError::CircuitOpen { .. }));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(succeed(&breaker).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn half_open_limits_concurrent_trials() {
    let breaker = CircuitBreaker::new(
        "medecins-service",
        CircuitBreakerConfig { half_open_max_calls: 2, ..config(1) },
    );
    fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    assert!(breaker.try_acquire().await);
    assert_eq!(breaker.mode().await, BreakerMode::HalfOpen);
    assert!(breaker.try_acquire().await);
    assert!(!breaker.try_acquire().await);
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failure() {
    let breaker = CircuitBreaker::new("patients-service", config(1));
    let result = breaker
        .execute(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, &'static str>(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_unavailable());
    assert_matches!(err, CircuitBreakerError::Timeout(d) if d == Duration::from_secs(5));
    assert_eq!(breaker.mode().await, BreakerMode::Open);
}

#[tokio::test(start_paused = true)]
async fn classified_errors_do_not_trip() {
    let breaker = CircuitBreaker::new("medecins-service", config(1));
    let result = breaker
        .execute_classified(async { Err::<(), _>("not found") }, |e| *e != "not found")
        .await;

    assert_matches!(result, Err(CircuitBreakerError::OperationFailed("not found")));
    assert_eq!(breaker.mode().await, BreakerMode::Closed);
    assert_eq!(breaker.snapshot().await.successes_total, 1);
}
