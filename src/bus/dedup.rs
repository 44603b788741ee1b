//! Message-id deduplication for at-least-once delivery.
//!
//! Broadcast delivery may hand the same envelope to a subscriber more than
//! once. Handlers are required to be idempotent anyway; this LRU cache
//! suppresses the common duplicates before they reach handlers at all.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Configuration for the delivery dedup cache.
#[derive(Debug, Clone, Copy)]
pub struct DedupSettings {
    /// Maximum number of message ids remembered
    pub capacity: usize,
    /// How long a message id stays remembered
    pub ttl: Duration,
    /// Interval for expired-entry sweeps
    pub cleanup_interval: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Shared message-id dedup cache.
#[derive(Clone)]
pub struct DeliveryDedup {
    inner: Arc<Mutex<DedupInner>>,
}

struct DedupInner {
    cache: LruCache<Uuid, Instant>,
    ttl: Duration,
}

impl DeliveryDedup {
    pub fn new(settings: DedupSettings) -> Self {
        let capacity =
            NonZeroUsize::new(settings.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(DedupInner {
                cache: LruCache::new(capacity),
                ttl: settings.ttl,
            })),
        }
    }

    /// Record `message_id`, reporting whether it was already seen within the
    /// TTL window.
    pub async fn check_and_record(&self, message_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let ttl = inner.ttl;
        let hit = inner
            .cache
            .get(&message_id)
            .is_some_and(|seen_at| now.duration_since(*seen_at) < ttl);
        inner.cache.put(message_id, now);
        hit
    }

    /// Drop entries older than the TTL; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let ttl = inner.ttl;
        let expired: Vec<Uuid> = inner
            .cache
            .iter()
            .filter(|(_, seen_at)| now.duration_since(**seen_at) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            inner.cache.pop(id);
        }
        expired.len()
    }

    /// Spawn a background sweep task for this cache.
    pub fn spawn_maintenance(&self, sweep_interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    tracing::trace!(removed, "Dedup cache sweep removed expired entries");
                }
            }
        })
    }
}
