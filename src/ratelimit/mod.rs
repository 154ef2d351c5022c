//! Rate limiting — per-client token buckets with offender penalties
//!
//! The middleware keys buckets on `client_ip:path`, picks the limiter for
//! the request path (exact endpoint policy, first wildcard match, then the
//! default), and annotates every response with `X-RateLimit-*` headers.

pub mod limiter;
pub mod store;

pub use limiter::{BackoffPolicy, BucketMetrics, Decision, Policy, RateLimiter};
pub use store::{Bucket, BucketStore};

use crate::config::{self, RateLimitConfig};
use crate::error::{GatewayError, Result};
use crate::middleware::{Middleware, RateLimitHeaders, RequestContext};
use crate::observability::metrics::GatewayMetrics;
use crate::pattern::{normalize, PathPattern};
use async_trait::async_trait;
use http::Response;
use std::collections::HashMap;
use std::sync::Arc;

/// Rate-limit middleware
pub struct RateLimitMiddleware {
    enabled: bool,
    store: Arc<BucketStore>,
    /// Exact-path policies for O(1) lookup
    exact: HashMap<String, Arc<RateLimiter>>,
    /// Wildcard policies in declared order; first match wins
    wildcard: Vec<(PathPattern, Arc<RateLimiter>)>,
    default: Option<Arc<RateLimiter>>,
    metrics: Arc<GatewayMetrics>,
}

impl RateLimitMiddleware {
    /// Build the middleware from configuration.
    ///
    /// All limiters share one bucket store, so a single sweeper covers
    /// every policy. Duration fields are parsed here; failure is fatal.
    pub fn new(config: &RateLimitConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let store = Arc::new(BucketStore::new());
        let backoff = parse_backoff(config)?;

        let mut exact = HashMap::new();
        let mut wildcard = Vec::new();
        for (pattern, policy) in config.endpoints.iter() {
            let limiter = Arc::new(RateLimiter::new(
                store.clone(),
                parse_policy(policy)?,
                backoff.clone(),
            ));
            if pattern.contains('*') {
                wildcard.push((PathPattern::new(pattern), limiter));
            } else {
                exact.insert(normalize(pattern), limiter);
            }
        }

        let default = config
            .default
            .as_ref()
            .map(|policy| {
                Ok::<_, GatewayError>(Arc::new(RateLimiter::new(
                    store.clone(),
                    parse_policy(policy)?,
                    backoff.clone(),
                )))
            })
            .transpose()?;

        Ok(Self {
            enabled: config.enabled,
            store,
            exact,
            wildcard,
            default,
            metrics,
        })
    }

    /// The shared bucket store, for the sweeper and for tests
    pub fn store(&self) -> Arc<BucketStore> {
        self.store.clone()
    }

    /// Select the limiter for a normalized path
    fn limiter_for(&self, path: &str) -> Option<&Arc<RateLimiter>> {
        if let Some(limiter) = self.exact.get(path) {
            return Some(limiter);
        }
        for (pattern, limiter) in &self.wildcard {
            if pattern.matches(path) {
                return Some(limiter);
            }
        }
        self.default.as_ref()
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        if !self.enabled {
            return Ok(None);
        }

        let path = normalize(req.uri.path());
        let Some(limiter) = self.limiter_for(&path) else {
            return Ok(None);
        };

        let client_ip = client_ip(&req.headers, &ctx.remote_ip);
        let key = format!("{}:{}", client_ip, path);
        let decision = limiter.allow(&key);

        let reset = chrono::Utc::now().timestamp() + decision.reset_after.as_secs() as i64;
        req.extensions.insert(RateLimitHeaders {
            limit: decision.limit,
            remaining: decision.remaining,
            reset,
        });

        if decision.allowed {
            self.metrics.record_rate_limit_allowed();
            return Ok(None);
        }

        self.metrics.record_rate_limit_denied(decision.retry_after);
        tracing::warn!(
            client_ip,
            path,
            violations = decision.violations,
            retry_after_secs = decision.retry_after.as_secs_f64(),
            "Rate limit exceeded"
        );

        let retry_secs = decision.retry_after.as_secs_f64().ceil() as u64;
        let body = format!(
            r#"{{"error":"rate limit exceeded","retry_after_seconds":{}}}"#,
            retry_secs
        );
        let response = Response::builder()
            .status(429)
            .header("Content-Type", "application/json")
            .header("Retry-After", retry_secs.to_string())
            .body(body.into_bytes())
            .unwrap();
        Ok(Some(response))
    }

    fn name(&self) -> &str {
        "rate-limit"
    }
}

/// Derive the client identity for bucket keying.
///
/// `X-Forwarded-For` is trusted as-is (first element); the deployment's
/// edge is responsible for stripping it from untrusted traffic.
pub fn client_ip(headers: &http::HeaderMap, remote: &str) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    strip_port(remote).to_string()
}

/// Strip a trailing `:port` from an address, leaving IPv6 literals intact
fn strip_port(addr: &str) -> &str {
    if let Some(bracket_end) = addr.rfind(']') {
        // [::1]:8080 → [::1]
        return &addr[..=bracket_end];
    }
    match addr.rfind(':') {
        // Bare IPv6 addresses contain multiple colons; leave them alone.
        Some(idx) if addr[..idx].contains(':') => addr,
        Some(idx) => &addr[..idx],
        None => addr,
    }
}

fn parse_policy(config: &config::PolicyConfig) -> Result<Policy> {
    Ok(Policy {
        requests: config.requests,
        window: config::parse_duration(&config.window)?,
        burst: config.burst,
    })
}

fn parse_backoff(config: &RateLimitConfig) -> Result<BackoffPolicy> {
    if !config.backoff.enabled {
        return Ok(BackoffPolicy {
            enabled: false,
            ..BackoffPolicy::default()
        });
    }
    Ok(BackoffPolicy {
        enabled: true,
        base: config::parse_duration(&config.backoff.base_duration)?,
        max: config::parse_duration(&config.backoff.max_duration)?,
        multiplier: config.backoff.multiplier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn middleware(toml: &str) -> RateLimitMiddleware {
        let config = GatewayConfig::from_toml(toml).unwrap();
        RateLimitMiddleware::new(&config.ratelimit, Arc::new(GatewayMetrics::new())).unwrap()
    }

    fn request(path: &str, headers: &[(&str, &str)]) -> http::request::Parts {
        let mut builder = http::Request::builder().uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn ctx(remote: &str) -> RequestContext {
        RequestContext {
            remote_ip: remote.to_string(),
            path: String::new(),
        }
    }

    const BASIC: &str = r#"
        [ratelimit]
        enabled = true
        [ratelimit.default]
        requests = 2
        window = "60s"
    "#;

    // --- client_ip ---

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let parts = request(
            "/x",
            &[("X-Forwarded-For", "203.0.113.7, 10.0.0.1"), ("X-Real-IP", "10.9.9.9")],
        );
        assert_eq!(client_ip(&parts.headers, "127.0.0.1"), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip() {
        let parts = request("/x", &[("X-Real-IP", "198.51.100.4")]);
        assert_eq!(client_ip(&parts.headers, "127.0.0.1"), "198.51.100.4");
    }

    #[test]
    fn test_client_ip_uses_remote_without_port() {
        let parts = request("/x", &[]);
        assert_eq!(client_ip(&parts.headers, "192.0.2.8:51544"), "192.0.2.8");
        assert_eq!(client_ip(&parts.headers, "192.0.2.8"), "192.0.2.8");
    }

    #[test]
    fn test_strip_port_ipv6() {
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("::1"), "::1");
    }

    // --- limiter selection ---

    #[tokio::test(start_paused = true)]
    async fn test_exact_policy_wins_over_wildcard_and_default() {
        let mw = middleware(
            r#"
            [ratelimit]
            enabled = true
            [ratelimit.default]
            requests = 100
            window = "60s"
            [ratelimit.endpoints."/rest/user/*"]
            requests = 200
            window = "60s"
            [ratelimit.endpoints."/rest/user/profile"]
            requests = 7
            window = "60s"
        "#,
        );
        let limiter = mw.limiter_for("/rest/user/profile").unwrap();
        assert_eq!(limiter.policy().requests, 7);
        let limiter = mw.limiter_for("/rest/user/backoffice/x").unwrap();
        assert_eq!(limiter.policy().requests, 200);
        let limiter = mw.limiter_for("/rest/auth/other").unwrap();
        assert_eq!(limiter.policy().requests, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_wildcard_in_declared_order_wins() {
        let mw = middleware(
            r#"
            [ratelimit]
            enabled = true
            [ratelimit.endpoints."/rest/user/*"]
            requests = 10
            window = "60s"
            [ratelimit.endpoints."/rest/*"]
            requests = 20
            window = "60s"
        "#,
        );
        assert_eq!(mw.limiter_for("/rest/user/x").unwrap().policy().requests, 10);
        assert_eq!(mw.limiter_for("/rest/other").unwrap().policy().requests, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_policy_passes_through() {
        let mw = middleware(
            r#"
            [ratelimit]
            enabled = true
        "#,
        );
        let mut parts = request("/rest/user/profile", &[]);
        let result = mw
            .handle_request(&mut parts, &ctx("127.0.0.1"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(parts.extensions.get::<RateLimitHeaders>().is_none());
    }

    // --- admission flow ---

    #[tokio::test(start_paused = true)]
    async fn test_admit_records_headers_in_extensions() {
        let mw = middleware(BASIC);
        let mut parts = request("/rest/user/profile", &[]);
        let result = mw
            .handle_request(&mut parts, &ctx("127.0.0.1"))
            .await
            .unwrap();
        assert!(result.is_none());
        let headers = parts.extensions.get::<RateLimitHeaders>().unwrap();
        assert_eq!(headers.limit, 2);
        assert_eq!(headers.remaining, 1);
        assert!(headers.reset > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_returns_429_with_retry_after() {
        let mw = middleware(BASIC);
        let ctx = ctx("127.0.0.1");
        for _ in 0..2 {
            let mut parts = request("/rest/user/profile", &[]);
            assert!(mw.handle_request(&mut parts, &ctx).await.unwrap().is_none());
        }

        let mut parts = request("/rest/user/profile", &[]);
        let response = mw
            .handle_request(&mut parts, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), 429);
        assert!(response.headers().contains_key("Retry-After"));
        let body = String::from_utf8(response.body().clone()).unwrap();
        assert!(body.contains(r#""error":"rate limit exceeded""#));
        assert!(body.contains("retry_after_seconds"));
        let headers = parts.extensions.get::<RateLimitHeaders>().unwrap();
        assert_eq!(headers.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_clients_have_distinct_buckets() {
        let mw = middleware(BASIC);
        for _ in 0..2 {
            let mut parts = request("/rest/user/profile", &[]);
            mw.handle_request(&mut parts, &ctx("10.0.0.1")).await.unwrap();
        }
        // The other client is untouched.
        let mut parts = request("/rest/user/profile", &[]);
        let result = mw
            .handle_request(&mut parts, &ctx("10.0.0.2"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_paths_have_distinct_buckets() {
        let mw = middleware(BASIC);
        for _ in 0..2 {
            let mut parts = request("/rest/user/profile", &[]);
            mw.handle_request(&mut parts, &ctx("10.0.0.1")).await.unwrap();
        }
        let mut parts = request("/rest/user/settings", &[]);
        let result = mw
            .handle_request(&mut parts, &ctx("10.0.0.1"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_passes_through() {
        let mw = middleware(
            r#"
            [ratelimit]
            enabled = false
            [ratelimit.default]
            requests = 1
            window = "60s"
        "#,
        );
        for _ in 0..5 {
            let mut parts = request("/rest/user/profile", &[]);
            let result = mw
                .handle_request(&mut parts, &ctx("127.0.0.1"))
                .await
                .unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn test_bad_duration_is_fatal() {
        let config = GatewayConfig::from_toml(
            r#"
            [ratelimit]
            enabled = true
            [ratelimit.default]
            requests = 1
            window = "sixty seconds"
        "#,
        )
        .unwrap();
        let result = RateLimitMiddleware::new(&config.ratelimit, Arc::new(GatewayMetrics::new()));
        assert!(result.is_err());
    }
}
