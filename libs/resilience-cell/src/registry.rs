use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;

use crate::breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};

/// Owns one breaker per dependency name. Built once at startup and shared
/// through `Arc`.
#[derive(Debug)]
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(CircuitBreakerConfig::from_app_config(config))
    }

    /// Per-dependency configuration. Only affects breakers created afterwards.
    pub fn with_override(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().await;
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            debug!("Creating circuit breaker {}", name);
            let config = self
                .overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            Arc::new(CircuitBreaker::new(name, config))
        }))
    }

    /// Snapshots sorted by name.
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
