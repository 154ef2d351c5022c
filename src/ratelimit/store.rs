//! Concurrent bucket store
//!
//! Keyed token buckets behind a reader/writer lock. Buckets are created
//! lazily on first access and evicted by a periodic sweeper once idle for
//! longer than the eviction threshold.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How often the sweeper scans for stale buckets
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Buckets idle longer than this are removed
pub const EVICTION_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Per-key mutable rate-limit state
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Available tokens; never negative, capped at requests + burst
    pub tokens: f64,
    /// Last refill instant; also the idle marker for eviction
    pub last_refill: Instant,
    /// Consecutive denied admissions
    pub violations: u32,
    /// Instant of the most recent violation
    pub last_violation: Option<Instant>,
    /// Active penalty end, when backoff is engaged
    pub backoff_until: Option<Instant>,
}

impl Bucket {
    fn new(initial_tokens: f64, now: Instant) -> Self {
        Self {
            tokens: initial_tokens,
            last_refill: now,
            violations: 0,
            last_violation: None,
            backoff_until: None,
        }
    }
}

/// Concurrent mapping of key → bucket
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl BucketStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a copy of the bucket for `key`, if present
    pub fn get(&self, key: &str) -> Option<Bucket> {
        self.read_lock().get(key).cloned()
    }

    /// Fetch a copy of the bucket for `key`, creating it with
    /// `initial_tokens` if absent
    pub fn get_or_create(&self, key: &str, initial_tokens: f64, now: Instant) -> Bucket {
        self.with_bucket(key, initial_tokens, now, |bucket| bucket.clone())
    }

    /// Replace the bucket for `key`
    pub fn set(&self, key: &str, bucket: Bucket) {
        self.write_lock().insert(key.to_string(), bucket);
    }

    /// Remove the bucket for `key`
    pub fn delete(&self, key: &str) {
        self.write_lock().remove(key);
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Whether the store holds no buckets
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Run `f` against the bucket for `key` under the exclusive lock,
    /// creating the bucket with `initial_tokens` if absent.
    ///
    /// This is the limiter's serialization point: all mutations of a
    /// bucket happen inside `f` while the lock is held.
    pub fn with_bucket<R>(
        &self,
        key: &str,
        initial_tokens: f64,
        now: Instant,
        f: impl FnOnce(&mut Bucket) -> R,
    ) -> R {
        let mut buckets = self.write_lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(initial_tokens, now));
        f(bucket)
    }

    /// Remove buckets whose `last_refill` is older than the threshold.
    /// Returns the number of evicted entries.
    pub fn sweep(&self, now: Instant, threshold: Duration) -> usize {
        let mut buckets = self.write_lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) <= threshold);
        before - buckets.len()
    }

    /// Periodically sweep stale buckets until the shutdown signal fires.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep(Instant::now(), EVICTION_THRESHOLD);
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "Swept stale rate-limit buckets");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("Bucket sweeper stopped");
                    return;
                }
            }
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Bucket>> {
        self.buckets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Bucket>> {
        self.buckets.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_seeds_initial_tokens() {
        let store = BucketStore::new();
        let now = Instant::now();
        let tokens = store.with_bucket("1.2.3.4:/rest/x", 5.0, now, |b| b.tokens);
        assert_eq!(tokens, 5.0);
        assert_eq!(store.len(), 1);

        // Second access sees the same bucket, not a fresh one.
        store.with_bucket("1.2.3.4:/rest/x", 5.0, now, |b| b.tokens -= 1.0);
        let bucket = store.get("1.2.3.4:/rest/x").unwrap();
        assert_eq!(bucket.tokens, 4.0);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_copy() {
        let store = BucketStore::new();
        let now = Instant::now();
        let bucket = store.get_or_create("k", 3.0, now);
        assert_eq!(bucket.tokens, 3.0);
        assert_eq!(bucket.violations, 0);
        // Mutating the copy does not touch the stored bucket.
        let mut copy = store.get_or_create("k", 3.0, now);
        copy.tokens = 0.0;
        assert_eq!(store.get("k").unwrap().tokens, 3.0);
    }

    #[tokio::test]
    async fn test_set_and_delete() {
        let store = BucketStore::new();
        let now = Instant::now();
        store.set(
            "k",
            Bucket {
                tokens: 1.0,
                last_refill: now,
                violations: 3,
                last_violation: Some(now),
                backoff_until: None,
            },
        );
        assert_eq!(store.get("k").unwrap().violations, 3);
        store.delete("k");
        assert!(store.get("k").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_buckets() {
        let store = BucketStore::new();
        let start = Instant::now();
        store.with_bucket("old", 1.0, start, |_| {});

        tokio::time::advance(EVICTION_THRESHOLD + Duration::from_secs(1)).await;
        store.with_bucket("fresh", 1.0, Instant::now(), |_| {});

        let evicted = store.sweep(Instant::now(), EVICTION_THRESHOLD);
        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_and_stops_on_shutdown() {
        let store = std::sync::Arc::new(BucketStore::new());
        store.with_bucket("stale", 1.0, Instant::now(), |_| {});

        let (tx, rx) = watch::channel(false);
        let sweeper = {
            let store = store.clone();
            tokio::spawn(async move { store.run_sweeper(rx).await })
        };

        // Let the bucket age past the threshold, then past a sweep tick.
        tokio::time::advance(EVICTION_THRESHOLD + SWEEP_INTERVAL).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty());

        tx.send(true).unwrap();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_access_distinct_keys() {
        let store = std::sync::Arc::new(BucketStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("10.0.0.{}:/rest/x", i);
                for _ in 0..100 {
                    store.with_bucket(&key, 100.0, Instant::now(), |b| {
                        b.tokens -= 1.0;
                    });
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len(), 16);
        for i in 0..16 {
            let bucket = store.get(&format!("10.0.0.{}:/rest/x", i)).unwrap();
            assert_eq!(bucket.tokens, 0.0);
        }
    }
}
