use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerMode {
    /// Numeric gauge value: 0 closed, 1 open, 2 half-open.
    pub fn gauge(&self) -> u8 {
        match self {
            BreakerMode::Closed => 0,
            BreakerMode::Open => 1,
            BreakerMode::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.circuit_breaker_recovery_timeout_seconds),
            half_open_max_calls: config.circuit_breaker_half_open_max_calls.max(1),
            call_timeout: Duration::from_secs(config.request_timeout_seconds.max(1)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the dependency was never reached or did not answer in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. } | CircuitBreakerError::Timeout(_))
    }
}

#[derive(Debug)]
struct BreakerInner {
    mode: BreakerMode,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

#[derive(Debug, Default)]
struct BreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    rejections: AtomicU64,
    transitions: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerMode,
    pub state_gauge: u8,
    pub consecutive_failures: u32,
    pub half_open_calls: u32,
    pub failures_total: u64,
    pub successes_total: u64,
    pub rejections_total: u64,
    pub transitions_total: u64,
    pub config: CircuitBreakerConfig,
}

/// Per-dependency breaker. Failures are consecutive: any success while closed
/// resets the count.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: BreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                mode: BreakerMode::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
            metrics: BreakerMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` under the breaker; every error counts as a failure.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute) but lets the caller decide which
    /// errors indicate an unhealthy dependency. A definitive answer such as
    /// "not found" should not trip the breaker.
    #[instrument(skip(self, operation, is_failure), fields(breaker = %self.name))]
    pub async fn execute_classified<F, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        if !self.try_acquire().await {
            self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
            debug!("Circuit breaker {} rejected call", self.name);
            return Err(CircuitBreakerError::CircuitOpen { name: self.name.clone() });
        }

        match tokio::time::timeout(self.config.call_timeout, operation).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(error)) => {
                if is_failure(&error) {
                    self.record_failure().await;
                } else {
                    self.record_success().await;
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
            Err(_) => {
                warn!("Call through circuit breaker {} timed out", self.name);
                self.record_failure().await;
                Err(CircuitBreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Admission check. Moves OPEN to HALF_OPEN once the recovery timeout has
    /// strictly elapsed since the last failure.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.mode == BreakerMode::Open {
            let recovered = inner
                .last_failure
                .map(|at| at.elapsed() > self.config.recovery_timeout)
                .unwrap_or(true);
            if !recovered {
                return false;
            }
            self.transition(&mut inner, BreakerMode::HalfOpen);
        }

        match inner.mode {
            BreakerMode::Closed => true,
            BreakerMode::HalfOpen if inner.half_open_calls < self.config.half_open_max_calls => {
                inner.half_open_calls += 1;
                true
            }
            _ => false,
        }
    }

    pub async fn record_success(&self) {
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        match inner.mode {
            BreakerMode::HalfOpen => {
                self.transition(&mut inner, BreakerMode::Closed);
                info!("Circuit breaker {} closed after successful trial", self.name);
            }
            BreakerMode::Closed => inner.consecutive_failures = 0,
            BreakerMode::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        inner.last_failure = Some(Instant::now());

        match inner.mode {
            BreakerMode::HalfOpen => {
                self.transition(&mut inner, BreakerMode::Open);
                warn!("Circuit breaker {} reopened after failed trial", self.name);
            }
            BreakerMode::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker {} opened due to {} consecutive failures",
                        self.name, inner.consecutive_failures
                    );
                    self.transition(&mut inner, BreakerMode::Open);
                }
            }
            BreakerMode::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerMode) {
        if inner.mode == to {
            return;
        }
        debug!("Circuit breaker {}: {:?} -> {:?}", self.name, inner.mode, to);
        inner.mode = to;
        inner.half_open_calls = 0;
        if to == BreakerMode::Closed {
            inner.consecutive_failures = 0;
        }
        self.metrics.transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Current mode without side effects; an expired OPEN still reports OPEN
    /// until the next admission check.
    pub async fn mode(&self) -> BreakerMode {
        self.inner.lock().await.mode
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.mode,
            state_gauge: inner.mode.gauge(),
            consecutive_failures: inner.consecutive_failures,
            half_open_calls: inner.half_open_calls,
            failures_total: self.metrics.failures.load(Ordering::Relaxed),
            successes_total: self.metrics.successes.load(Ordering::Relaxed),
            rejections_total: self.metrics.rejections.load(Ordering::Relaxed),
            transitions_total: self.metrics.transitions.load(Ordering::Relaxed),
            config: self.config.clone(),
        }
    }
}
