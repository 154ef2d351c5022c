//! Middleware pipeline — ordered request policies
//!
//! Middlewares run in a fixed order before the request reaches the
//! translator. Each one either passes the request through (optionally
//! mutating headers and extensions) or short-circuits with an immediate
//! response.

use crate::error::Result;
use async_trait::async_trait;
use http::Response;
use std::sync::Arc;

/// Request context passed through the middleware pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Remote address of the connection, without port
    pub remote_ip: String,
    /// Normalized request path
    pub path: String,
}

/// Rate-limit header values computed for the current request.
///
/// Stored in the request extensions by the rate-limit middleware and copied
/// onto whatever response the gateway ends up writing.
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    /// Policy requests per window
    pub limit: u32,
    /// Tokens remaining after this request
    pub remaining: u32,
    /// Unix seconds at which the window resets
    pub reset: i64,
}

/// Middleware trait — process a request and optionally short-circuit
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request. Return Ok(None) to continue the pipeline,
    /// or Ok(Some(response)) to short-circuit with an immediate response.
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>>;

    /// Middleware name for logging
    fn name(&self) -> &str;
}

/// Ordered middleware pipeline
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// Build a pipeline from middlewares, applied in the given order
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    /// Create an empty pipeline
    pub fn empty() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Execute the request through all middlewares.
    /// Returns Some(response) if any middleware short-circuits.
    pub async fn process_request(
        &self,
        parts: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        for mw in &self.middlewares {
            if let Some(response) = mw.handle_request(parts, ctx).await? {
                tracing::debug!(middleware = mw.name(), path = ctx.path, "Middleware short-circuited request");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Number of middlewares in the pipeline
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the pipeline is empty
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Build a JSON error response with the given status
pub(crate) fn json_error(status: u16, message: &str) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(format!(r#"{{"error":"{}"}}"#, message).into_bytes())
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str, bool);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle_request(
            &self,
            req: &mut http::request::Parts,
            _ctx: &RequestContext,
        ) -> Result<Option<Response<Vec<u8>>>> {
            req.headers
                .append("x-seen", self.0.parse().unwrap());
            if self.1 {
                Ok(Some(json_error(403, "stopped")))
            } else {
                Ok(None)
            }
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            remote_ip: "127.0.0.1".to_string(),
            path: "/rest/test".to_string(),
        }
    }

    fn parts() -> http::request::Parts {
        let (parts, _) = http::Request::builder()
            .uri("/rest/test")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_empty_pipeline_passthrough() {
        let pipeline = Pipeline::empty();
        let mut parts = parts();
        let result = pipeline.process_request(&mut parts, &ctx()).await.unwrap();
        assert!(result.is_none());
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_runs_in_order() {
        let pipeline = Pipeline::new(vec![
            Arc::new(Tag("first", false)),
            Arc::new(Tag("second", false)),
        ]);
        let mut parts = parts();
        let result = pipeline.process_request(&mut parts, &ctx()).await.unwrap();
        assert!(result.is_none());
        let seen: Vec<_> = parts.headers.get_all("x-seen").iter().collect();
        assert_eq!(seen, vec!["first", "second"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_pipeline_short_circuit_skips_rest() {
        let pipeline = Pipeline::new(vec![
            Arc::new(Tag("first", true)),
            Arc::new(Tag("second", false)),
        ]);
        let mut parts = parts();
        let result = pipeline.process_request(&mut parts, &ctx()).await.unwrap();
        let response = result.unwrap();
        assert_eq!(response.status(), 403);
        let seen: Vec<_> = parts.headers.get_all("x-seen").iter().collect();
        assert_eq!(seen, vec!["first"]);
    }

    #[test]
    fn test_json_error_shape() {
        let resp = json_error(401, "missing authorization header");
        assert_eq!(resp.status(), 401);
        assert_eq!(
            resp.body().as_slice(),
            br#"{"error":"missing authorization header"}"#
        );
    }
}
