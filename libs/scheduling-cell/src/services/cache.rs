use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::TimeSlot;

/// Key patterns affected by a change to one provider's schedule or bookings.
/// Type-scoped and unscoped entries may include the provider, so they go too.
pub fn invalidation_prefixes(provider_id: Uuid) -> Vec<String> {
    vec![
        format!("availability:provider:{}:", provider_id),
        "availability:type:".to_string(),
        "availability:all:".to_string(),
    ]
}

/// Best-effort cache of computed slots. Failures degrade to a miss.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<TimeSlot>>;
    async fn put(&self, key: &str, slots: &[TimeSlot], ttl: Duration);
    /// Returns the number of entries removed.
    async fn invalidate_provider(&self, provider_id: Uuid) -> usize;
}

#[derive(Default)]
pub struct InMemoryAvailabilityCache {
    entries: RwLock<HashMap<String, (Instant, Vec<TimeSlot>)>>,
}

impl InMemoryAvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drops expired entries.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        before - entries.len()
    }

    /// Sweeps expired entries every `every` until shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.cleanup_expired().await;
                        if removed > 0 {
                            debug!("Evicted {} expired availability entries", removed);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AvailabilityCache for InMemoryAvailabilityCache {
    async fn get(&self, key: &str) -> Option<Vec<TimeSlot>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((expires_at, slots)) if *expires_at > Instant::now() => Some(slots.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: &str, slots: &[TimeSlot], ttl: Duration) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (Instant::now() + ttl, slots.to_vec()));
    }

    async fn invalidate_provider(&self, provider_id: Uuid) -> usize {
        let prefixes = invalidation_prefixes(provider_id);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !prefixes.iter().any(|p| key.starts_with(p.as_str())));
        let removed = before - entries.len();
        debug!("Invalidated {} cached availability entries for {}", removed, provider_id);
        removed
    }
}

pub struct RedisAvailabilityCache {
    pool: Pool,
}

impl RedisAvailabilityCache {
    pub async fn new(redis_url: &str) -> Result<Self, SchedulingError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                SchedulingError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "Failed to create Redis pool",
                    e.to_string(),
                )))
            })?;

        let mut conn = pool.get().await.map_err(|e| {
            SchedulingError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to connect to Redis",
                e.to_string(),
            )))
        })?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis availability cache initialized");

        Ok(Self { pool })
    }

    async fn connection(&self) -> Option<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!("Redis unavailable for availability cache: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AvailabilityCache for RedisAvailabilityCache {
    async fn get(&self, key: &str) -> Option<Vec<TimeSlot>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Redis GET {} failed: {}", key, e);
                return None;
            }
        };
        raw.and_then(|body| serde_json::from_str(&body).ok())
    }

    async fn put(&self, key: &str, slots: &[TimeSlot], ttl: Duration) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let body = match serde_json::to_string(slots) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not serialize slots for {}: {}", key, e);
                return;
            }
        };
        let result: Result<(), redis::RedisError> = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(body)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Redis SETEX {} failed: {}", key, e);
        }
    }

    async fn invalidate_provider(&self, provider_id: Uuid) -> usize {
        let Some(mut conn) = self.connection().await else {
            return 0;
        };

        let mut removed = 0;
        for prefix in invalidation_prefixes(provider_id) {
            let keys: Vec<String> = match conn.keys(format!("{}*", prefix)).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Redis KEYS {}* failed: {}", prefix, e);
                    continue;
                }
            };
            if keys.is_empty() {
                continue;
            }
            match conn.del::<_, usize>(keys).await {
                Ok(count) => removed += count,
                Err(e) => warn!("Redis DEL for {} failed: {}", prefix, e),
            }
        }
        debug!("Invalidated {} cached availability entries for {}", removed, provider_id);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::ProviderType;

    fn slot(provider_id: Uuid) -> TimeSlot {
        let start = Utc::now();
        TimeSlot {
            start,
            end: start + chrono::Duration::minutes(30),
            provider_id,
            provider_type: ProviderType::Doctor,
            is_available: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryAvailabilityCache::new();
        let id = Uuid::new_v4();
        cache.put("availability:all:a:b:30", &[slot(id)], Duration::from_secs(60)).await;

        assert!(cache.get("availability:all:a:b:30").await.is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("availability:all:a:b:30").await.is_none());
        assert_eq!(cache.cleanup_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_evicts_expired_entries() {
        let cache = Arc::new(InMemoryAvailabilityCache::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = cache.spawn_cleanup(Duration::from_secs(30), shutdown_rx);

        cache.put("availability:all:a:b:30", &[slot(Uuid::new_v4())], Duration::from_secs(10)).await;
        cache.put("availability:all:a:b:60", &[], Duration::from_secs(300)).await;
        assert_eq!(cache.len().await, 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.len().await, 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn invalidation_spares_other_providers() {
        let cache = InMemoryAvailabilityCache::new();
        let changed = Uuid::new_v4();
        let untouched = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        cache.put(&format!("availability:provider:{}:x:y:30", changed), &[], ttl).await;
        cache.put(&format!("availability:provider:{}:x:y:30", untouched), &[], ttl).await;
        cache.put("availability:type:doctor:x:y:30", &[], ttl).await;
        cache.put("availability:all:x:y:30", &[], ttl).await;

        assert_eq!(cache.invalidate_provider(changed).await, 3);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis running"]
    async fn redis_round_trip() {
        let url = std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let cache = RedisAvailabilityCache::new(&url).await.unwrap();
        let id = Uuid::new_v4();
        let key = format!("availability:provider:{}:x:y:30", id);

        cache.put(&key, &[slot(id)], Duration::from_secs(30)).await;
        assert_eq!(cache.get(&key).await.map(|s| s.len()), Some(1));
        assert!(cache.invalidate_provider(id).await >= 1);
        assert!(cache.get(&key).await.is_none());
    }
}
