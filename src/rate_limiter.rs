//! # Rate Limiter Registry
//!
//! The keyed collection of per-endpoint [`ThrottlingQueue`]s that backs
//! every outbound request. Buckets and queues are created lazily on first
//! use of an [`EndpointKey`]; a subsequent [`RateLimiterRegistry::configure`]
//! rebuilds an existing bucket in place, preserving its fill ratio rather
//! than handing out a free refill.
//!
//! ## Defaults
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  override present              → configured capacity/refillRate  │
//! │  per-template targetRps = r    → capacity = max(2, 2r), rate = r │
//! │  global rps split across eps   → see controller::RateTarget      │
//! │  nothing known                 → capacity = 2, rate = 1 tok/s    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::SurgeError;
use crate::model::EndpointKey;
use crate::throttling_queue::{QueueStats, ThrottlingQueue};
use crate::token_bucket::TokenBucket;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_CAPACITY: u64 = 2;
const DEFAULT_REFILL_RATE: f64 = 1.0;
const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);
const TEST_MODE_MAX_QUEUE_SIZE: usize = 1_000_000;
const TEST_MODE_MAX_WAIT: Duration = Duration::from_secs(3_600);

/// Point-in-time statistics for one endpoint's limiter entry.
#[derive(Debug, Clone)]
pub struct EndpointLimiterStats {
    pub current_tokens: u64,
    pub capacity: u64,
    pub refill_rate: f64,
    pub successful_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub average_wait_ms: f64,
}

struct Entry {
    queue: ThrottlingQueue,
    last_access: RwLock<Instant>,
}

/// Returns whether the test-mode environment flag is set, relaxing queue
/// overflow and wait-time limits so tests against a simulated clock don't
/// flake on timing they don't control.
pub fn test_mode_enabled() -> bool {
    std::env::var("SURGE_TEST_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Keyed map of (endpoint → bucket + queue) with lazy creation, config
/// overrides, stats aggregation, and idle eviction.
pub struct RateLimiterRegistry {
    entries: RwLock<HashMap<EndpointKey, Entry>>,
    default_capacity: u64,
    default_refill_rate: f64,
    max_queue_size: usize,
    max_wait: Duration,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        let (max_queue_size, max_wait) = if test_mode_enabled() {
            (TEST_MODE_MAX_QUEUE_SIZE, TEST_MODE_MAX_WAIT)
        } else {
            (DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_WAIT)
        };
        Self {
            entries: RwLock::new(HashMap::new()),
            default_capacity: DEFAULT_CAPACITY,
            default_refill_rate: DEFAULT_REFILL_RATE,
            max_queue_size,
            max_wait,
        }
    }

    /// Installs an override for `key`. If a bucket already exists, it is
    /// rebuilt in place preserving the token-fill ratio.
    pub fn configure(&self, key: &EndpointKey, capacity: u64, refill_rate: f64) {
        let entries = self.entries.read().unwrap();
        if let Some(entry) = entries.get(key) {
            entry.queue.with_bucket(|b| b.reconfigure(capacity, refill_rate));
            *entry.last_access.write().unwrap() = Instant::now();
            return;
        }
        drop(entries);

        let queue = ThrottlingQueue::new(
            TokenBucket::new(capacity, refill_rate),
            self.max_queue_size,
            self.max_wait,
        );
        self.entries.write().unwrap().insert(
            key.clone(),
            Entry {
                queue,
                last_access: RwLock::new(Instant::now()),
            },
        );
    }

    /// Lazily instantiates a bucket+queue on first call using
    /// `(default_capacity, default_refill_rate)`, then delegates to
    /// [`ThrottlingQueue::submit`].
    pub async fn acquire(&self, key: &EndpointKey, tokens: u64) -> Result<Duration, SurgeError> {
        let queue = self.get_or_create(key);
        queue.submit(tokens).await
    }

    /// Same as [`Self::acquire`] but with explicit defaults to use if the
    /// endpoint has not been configured yet, per the per-endpoint/global
    /// target-RPS resolution in the controller.
    pub async fn acquire_with_defaults(
        &self,
        key: &EndpointKey,
        tokens: u64,
        capacity: u64,
        refill_rate: f64,
    ) -> Result<Duration, SurgeError> {
        let queue = self.get_or_create_with(key, capacity, refill_rate);
        queue.submit(tokens).await
    }

    fn get_or_create(&self, key: &EndpointKey) -> ThrottlingQueue {
        self.get_or_create_with(key, self.default_capacity, self.default_refill_rate)
    }

    fn get_or_create_with(&self, key: &EndpointKey, capacity: u64, refill_rate: f64) -> ThrottlingQueue {
        {
            let entries = self.entries.read().unwrap();
            if let Some(entry) = entries.get(key) {
                *entry.last_access.write().unwrap() = Instant::now();
                return entry.queue.clone();
            }
        }
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(key) {
            *entry.last_access.write().unwrap() = Instant::now();
            return entry.queue.clone();
        }
        let queue = ThrottlingQueue::new(
            TokenBucket::new(capacity, refill_rate),
            self.max_queue_size,
            self.max_wait,
        );
        entries.insert(
            key.clone(),
            Entry {
                queue: queue.clone(),
                last_access: RwLock::new(Instant::now()),
            },
        );
        queue
    }

    pub fn stats(&self, key: &EndpointKey) -> Option<EndpointLimiterStats> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        let mut bucket = entry.queue.bucket_snapshot();
        let qstats: QueueStats = entry.queue.stats();
        Some(EndpointLimiterStats {
            current_tokens: bucket.available_tokens(),
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
            successful_acquisitions: qstats.successful_acquisitions,
            failed_acquisitions: qstats.failed_acquisitions,
            average_wait_ms: qstats.average_wait_ms(),
        })
    }

    /// Removes endpoints whose last access age exceeds `max_idle`, clearing
    /// their queues first so in-flight waiters fail cleanly. Returns the
    /// number of endpoints removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<EndpointKey> = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .filter(|(_, entry)| entry.last_access.read().unwrap().elapsed() >= max_idle)
                .map(|(key, _)| key.clone())
                .collect()
        };
        if stale.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().unwrap();
        let mut removed = 0;
        for key in &stale {
            if let Some(entry) = entries.remove(key) {
                entry.queue.clear();
                removed += 1;
            }
        }
        debug!(removed, "evicted idle rate-limiter entries");
        removed
    }

    /// Clears every endpoint's queue, failing pending waiters. Used on
    /// controller shutdown.
    pub fn clear_all(&self) {
        let entries = self.entries.read().unwrap();
        for entry in entries.values() {
            entry.queue.clear();
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> EndpointKey {
        EndpointKey::new(&reqwest::Method::GET, s)
    }

    #[tokio::test]
    async fn lazy_creation_uses_defaults() {
        let registry = RateLimiterRegistry::new();
        let k = key("http://h/a");
        let waited = registry.acquire(&k, 1).await.unwrap();
        assert_eq!(waited, Duration::ZERO);
        let stats = registry.stats(&k).unwrap();
        assert_eq!(stats.capacity, DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn configure_preserves_ratio_and_counters() {
        let registry = RateLimiterRegistry::new();
        let k = key("http://h/b");
        registry.configure(&k, 10, 5.0);
        registry.acquire(&k, 5).await.unwrap(); // half-drain
        registry.configure(&k, 100, 50.0);
        let stats = registry.stats(&k).unwrap();
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.refill_rate, 50.0);
        assert_eq!(stats.current_tokens, 50);
        assert_eq!(stats.successful_acquisitions, 1);
    }

    #[tokio::test]
    async fn evict_idle_removes_stale_entries() {
        let registry = RateLimiterRegistry::new();
        let k = key("http://h/c");
        registry.acquire(&k, 1).await.unwrap();
        assert_eq!(registry.endpoint_count(), 1);
        let removed = registry.evict_idle(Duration::from_millis(0));
        assert_eq!(removed, 1);
        assert_eq!(registry.endpoint_count(), 0);
    }
}
