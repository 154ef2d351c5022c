//! Gateway metrics — lightweight counters and histograms
//!
//! In-process metrics with no external dependencies, rendered in
//! Prometheus text exposition format at `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries for backoff durations, in seconds.
/// These match the platform's standard latency/duration buckets.
const BACKOFF_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.5, 2.0, 2.5,
    3.0, 4.0, 5.0, 10.0, 15.0, 20.0, 30.0, 45.0, 60.0, 80.0, 100.0, 150.0, 200.0,
];

/// Gateway metrics collector
#[derive(Debug)]
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    rate_limit_allowed: AtomicU64,
    rate_limit_denied: AtomicU64,
    auth_rejected: AtomicU64,
    upstream_errors: AtomicU64,
    backoff_bucket_counts: Vec<AtomicU64>,
    backoff_sum_micros: AtomicU64,
    backoff_count: AtomicU64,
}

impl GatewayMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_3xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            rate_limit_allowed: AtomicU64::new(0),
            rate_limit_denied: AtomicU64::new(0),
            auth_rejected: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            backoff_bucket_counts: BACKOFF_BUCKETS.iter().map(|_| AtomicU64::new(0)).collect(),
            backoff_sum_micros: AtomicU64::new(0),
            backoff_count: AtomicU64::new(0),
        }
    }

    /// Record a completed request by status code
    pub fn record_request(&self, status: u16) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match status / 100 {
            2 => self.status_2xx.fetch_add(1, Ordering::Relaxed),
            3 => self.status_3xx.fetch_add(1, Ordering::Relaxed),
            4 => self.status_4xx.fetch_add(1, Ordering::Relaxed),
            5 => self.status_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Record an admitted request
    pub fn record_rate_limit_allowed(&self) {
        self.rate_limit_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a denied request and the backoff it was given
    pub fn record_rate_limit_denied(&self, backoff: Duration) {
        self.rate_limit_denied.fetch_add(1, Ordering::Relaxed);

        let secs = backoff.as_secs_f64();
        for (i, bound) in BACKOFF_BUCKETS.iter().enumerate() {
            if secs <= *bound {
                self.backoff_bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.backoff_sum_micros
            .fetch_add(backoff.as_micros() as u64, Ordering::Relaxed);
        self.backoff_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected by the auth middleware
    pub fn record_auth_rejected(&self) {
        self.auth_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unreachable backend or docs upstream
    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total requests
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get admitted / denied counts
    pub fn rate_limit_counts(&self) -> (u64, u64) {
        (
            self.rate_limit_allowed.load(Ordering::Relaxed),
            self.rate_limit_denied.load(Ordering::Relaxed),
        )
    }

    /// Render metrics in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP gateway_requests_total Total number of requests\n");
        output.push_str("# TYPE gateway_requests_total counter\n");
        output.push_str(&format!(
            "gateway_requests_total {}\n",
            self.total_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP gateway_responses_total Total responses by status class\n");
        output.push_str("# TYPE gateway_responses_total counter\n");
        for (class, counter) in [
            ("2xx", &self.status_2xx),
            ("3xx", &self.status_3xx),
            ("4xx", &self.status_4xx),
            ("5xx", &self.status_5xx),
        ] {
            output.push_str(&format!(
                "gateway_responses_total{{status_class=\"{}\"}} {}\n",
                class,
                counter.load(Ordering::Relaxed)
            ));
        }

        output.push_str("# HELP gateway_ratelimit_requests_total Rate limiter decisions\n");
        output.push_str("# TYPE gateway_ratelimit_requests_total counter\n");
        output.push_str(&format!(
            "gateway_ratelimit_requests_total{{decision=\"allowed\"}} {}\n",
            self.rate_limit_allowed.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "gateway_ratelimit_requests_total{{decision=\"denied\"}} {}\n",
            self.rate_limit_denied.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP gateway_auth_rejected_total Requests rejected by authentication\n");
        output.push_str("# TYPE gateway_auth_rejected_total counter\n");
        output.push_str(&format!(
            "gateway_auth_rejected_total {}\n",
            self.auth_rejected.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP gateway_upstream_errors_total Unreachable backends and docs upstreams\n");
        output.push_str("# TYPE gateway_upstream_errors_total counter\n");
        output.push_str(&format!(
            "gateway_upstream_errors_total {}\n",
            self.upstream_errors.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP gateway_ratelimit_backoff_seconds Backoff assigned to denied requests\n",
        );
        output.push_str("# TYPE gateway_ratelimit_backoff_seconds histogram\n");
        for (i, bound) in BACKOFF_BUCKETS.iter().enumerate() {
            output.push_str(&format!(
                "gateway_ratelimit_backoff_seconds_bucket{{le=\"{}\"}} {}\n",
                bound,
                self.backoff_bucket_counts[i].load(Ordering::Relaxed)
            ));
        }
        let count = self.backoff_count.load(Ordering::Relaxed);
        output.push_str(&format!(
            "gateway_ratelimit_backoff_seconds_bucket{{le=\"+Inf\"}} {}\n",
            count
        ));
        output.push_str(&format!(
            "gateway_ratelimit_backoff_seconds_sum {}\n",
            self.backoff_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "gateway_ratelimit_backoff_seconds_count {}\n",
            count
        ));

        output
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
