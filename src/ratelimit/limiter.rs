//! Token-bucket rate limiter with exponential offender penalties
//!
//! Refill follows the standard token-bucket algorithm; repeated denials
//! grow a per-key penalty window during which requests are rejected
//! without touching the bucket.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::store::BucketStore;

/// Admission policy for one endpoint class
#[derive(Debug, Clone)]
pub struct Policy {
    /// Requests admitted per window
    pub requests: u32,
    /// Window length
    pub window: Duration,
    /// Extra capacity above `requests`
    pub burst: u32,
}

impl Policy {
    /// Maximum tokens a bucket may hold
    pub fn capacity(&self) -> f64 {
        (self.requests + self.burst) as f64
    }

    /// Refill rate in tokens per second
    pub fn refill_rate(&self) -> f64 {
        self.requests as f64 / self.window.as_secs_f64()
    }
}

/// Exponential penalty settings
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub enabled: bool,
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Outcome of a single admission attempt
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// How long the client should wait before retrying. Zero on admit.
    /// On deny without backoff this is computed from the post-refill
    /// bucket state: `(1 - tokens) / refill_rate`.
    pub retry_after: Duration,
    /// Policy requests per window
    pub limit: u32,
    /// Whole tokens remaining after the decision
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_after: Duration,
    /// Violations recorded for the key so far
    pub violations: u32,
}

/// Point-in-time view of one bucket
#[derive(Debug, Clone)]
pub struct BucketMetrics {
    pub remaining: u32,
    pub total: u32,
    pub reset_after: Duration,
    pub violations: u32,
}

/// Per-key token-bucket limiter
pub struct RateLimiter {
    store: Arc<BucketStore>,
    policy: Policy,
    backoff: BackoffPolicy,
}

impl RateLimiter {
    /// Create a limiter over a (possibly shared) bucket store
    pub fn new(store: Arc<BucketStore>, policy: Policy, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            policy,
            backoff,
        }
    }

    /// The limiter's admission policy
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decide admission for `key`.
    ///
    /// Serialized per key by the store's exclusive lock; strictly CPU-bound.
    pub fn allow(&self, key: &str) -> Decision {
        let now = Instant::now();
        let policy = &self.policy;
        let backoff = &self.backoff;

        self.store
            .with_bucket(key, policy.requests as f64, now, |bucket| {
                // Active penalty: deny without touching the bucket.
                if backoff.enabled {
                    if let Some(until) = bucket.backoff_until {
                        if now < until {
                            return Decision {
                                allowed: false,
                                retry_after: until.duration_since(now),
                                limit: policy.requests,
                                remaining: bucket.tokens.floor().max(0.0) as u32,
                                reset_after: reset_after(bucket.last_refill, policy.window, now),
                                violations: bucket.violations,
                            };
                        }
                    }
                }

                // Refill, capped at requests + burst.
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens =
                    (bucket.tokens + elapsed * policy.refill_rate()).min(policy.capacity());
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Decision {
                        allowed: true,
                        retry_after: Duration::ZERO,
                        limit: policy.requests,
                        remaining: bucket.tokens.floor() as u32,
                        reset_after: policy.window,
                        violations: bucket.violations,
                    };
                }

                bucket.violations += 1;
                bucket.last_violation = Some(now);

                let retry_after = if backoff.enabled {
                    let penalty = penalty_for(backoff, bucket.violations);
                    bucket.backoff_until = Some(now + penalty);
                    penalty
                } else {
                    Duration::from_secs_f64((1.0 - bucket.tokens) / policy.refill_rate())
                };

                Decision {
                    allowed: false,
                    retry_after,
                    limit: policy.requests,
                    remaining: 0,
                    reset_after: policy.window,
                    violations: bucket.violations,
                }
            })
    }

    /// Read the current state of `key` without consuming a token
    pub fn metrics(&self, key: &str) -> BucketMetrics {
        let now = Instant::now();
        match self.store.get(key) {
            Some(bucket) => BucketMetrics {
                remaining: bucket.tokens.floor().max(0.0) as u32,
                total: self.policy.requests,
                reset_after: reset_after(bucket.last_refill, self.policy.window, now),
                violations: bucket.violations,
            },
            None => BucketMetrics {
                remaining: self.policy.requests,
                total: self.policy.requests,
                reset_after: self.policy.window,
                violations: 0,
            },
        }
    }

    /// Clear all state for `key`
    pub fn reset(&self, key: &str) {
        self.store.delete(key);
    }
}

fn reset_after(last_refill: Instant, window: Duration, now: Instant) -> Duration {
    (last_refill + window).saturating_duration_since(now)
}

/// Penalty for the nth consecutive violation: min(base · mᵛ⁻¹, max)
fn penalty_for(backoff: &BackoffPolicy, violations: u32) -> Duration {
    let factor = backoff.multiplier.powi(violations.saturating_sub(1) as i32);
    let penalty = backoff.base.as_secs_f64() * factor;
    Duration::from_secs_f64(penalty.min(backoff.max.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_secs: u64, burst: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(BucketStore::new()),
            Policy {
                requests,
                window: Duration::from_secs(window_secs),
                burst,
            },
            BackoffPolicy::default(),
        )
    }

    fn limiter_with_backoff(
        requests: u32,
        window_secs: u64,
        base_secs: u64,
        max_secs: u64,
        multiplier: f64,
    ) -> RateLimiter {
        RateLimiter::new(
            Arc::new(BucketStore::new()),
            Policy {
                requests,
                window: Duration::from_secs(window_secs),
                burst: 0,
            },
            BackoffPolicy {
                enabled: true,
                base: Duration::from_secs(base_secs),
                max: Duration::from_secs(max_secs),
                multiplier,
            },
        )
    }

    // --- admission ---

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_requests_plus_burst() {
        let rl = limiter(5, 60, 2);
        // Initial tokens equal `requests`; burst is headroom for refill.
        for i in 0..5 {
            assert!(rl.allow("k").allowed, "request {} should be admitted", i);
        }
        assert!(!rl.allow("k").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_retry_after_is_refill_time() {
        let rl = limiter(5, 60, 0);
        for _ in 0..5 {
            rl.allow("k");
        }
        let decision = rl.allow("k");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        // One token refills in window/requests = 12s.
        assert_eq!(decision.retry_after, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_restores_tokens() {
        let rl = limiter(2, 2, 0);
        assert!(rl.allow("k").allowed);
        assert!(rl.allow("k").allowed);
        assert!(!rl.allow("k").allowed);

        // One token per second; after 1s one request passes again.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(rl.allow("k").allowed);
        assert!(!rl.allow("k").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_capped_at_capacity() {
        let rl = limiter(2, 1, 1);
        tokio::time::advance(Duration::from_secs(100)).await;
        // Long idle must not accumulate beyond requests + burst = 3.
        for _ in 0..3 {
            assert!(rl.allow("k").allowed);
        }
        assert!(!rl.allow("k").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_negative() {
        let rl = limiter(1, 60, 0);
        rl.allow("k");
        for _ in 0..10 {
            let d = rl.allow("k");
            assert!(!d.allowed);
            assert!(d.retry_after > Duration::ZERO);
        }
        let m = rl.metrics("k");
        assert_eq!(m.remaining, 0);
    }

    // --- backoff penalties ---

    #[tokio::test(start_paused = true)]
    async fn test_backoff_penalty_growth() {
        let rl = limiter_with_backoff(1, 1, 2, 10, 2.0);
        assert!(rl.allow("k").allowed);

        // First violation: base penalty.
        let d = rl.allow("k");
        assert!(!d.allowed);
        assert_eq!(d.violations, 1);
        assert_eq!(d.retry_after, Duration::from_secs(2));

        // Inside the penalty window: denied without a new violation.
        let d = rl.allow("k");
        assert!(!d.allowed);
        assert_eq!(d.violations, 1);
        assert!(d.retry_after <= Duration::from_secs(2));

        // After the penalty but still out of tokens: second violation, 4s.
        tokio::time::advance(Duration::from_secs(2)).await;
        // 2s elapsed refilled 2 tokens at rate 1/s, capped at 1 → admitted.
        assert!(rl.allow("k").allowed);
        let d = rl.allow("k");
        assert_eq!(d.violations, 2);
        assert_eq!(d.retry_after, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_penalty_capped_at_max() {
        let rl = limiter_with_backoff(1, 3600, 2, 10, 2.0);
        rl.allow("k");
        let mut last = Duration::ZERO;
        for _ in 0..6 {
            let d = rl.allow("k");
            assert!(!d.allowed);
            last = d.retry_after;
            // Step past the penalty so the next deny is a fresh violation.
            tokio::time::advance(d.retry_after + Duration::from_millis(10)).await;
        }
        assert_eq!(last, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_window_denies_without_mutation() {
        let rl = limiter_with_backoff(1, 1, 5, 60, 2.0);
        rl.allow("k");
        let first = rl.allow("k");
        assert_eq!(first.violations, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let inside = rl.allow("k");
        assert!(!inside.allowed);
        assert_eq!(inside.violations, 1);
        assert_eq!(inside.retry_after, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_violations_monotonic() {
        let rl = limiter(1, 3600, 0);
        rl.allow("k");
        let mut prev = 0;
        for _ in 0..5 {
            let d = rl.allow("k");
            assert!(d.violations > prev);
            prev = d.violations;
        }
    }

    // --- metrics and reset ---

    #[tokio::test(start_paused = true)]
    async fn test_metrics_reflect_bucket_state() {
        let rl = limiter(10, 60, 0);
        rl.allow("k");
        rl.allow("k");
        let m = rl.metrics("k");
        assert_eq!(m.remaining, 8);
        assert_eq!(m.total, 10);
        assert_eq!(m.violations, 0);
        assert!(m.reset_after <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_for_unknown_key() {
        let rl = limiter(10, 60, 0);
        let m = rl.metrics("unknown");
        assert_eq!(m.remaining, 10);
        assert_eq!(m.violations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_bucket() {
        let rl = limiter(1, 3600, 0);
        rl.allow("k");
        assert!(!rl.allow("k").allowed);
        rl.reset("k");
        assert!(rl.allow("k").allowed);
    }

    // --- ordering across keys ---

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let rl = limiter(1, 3600, 0);
        assert!(rl.allow("a").allowed);
        assert!(rl.allow("b").allowed);
        assert!(!rl.allow("a").allowed);
        assert!(!rl.allow("b").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_bounded_within_window() {
        // Property 1: admits within any window never exceed R + B.
        let rl = limiter(5, 10, 3);
        tokio::time::advance(Duration::from_secs(100)).await;
        let mut admitted = 0;
        for _ in 0..50 {
            if rl.allow("k").allowed {
                admitted += 1;
            }
        }
        assert!(admitted <= 8, "admitted {} > R + B", admitted);
    }
}
