//! Docs reverse proxy — per-service API documentation
//!
//! Serves a synthesized index at `/docs` and forwards swagger-ui and
//! swagger.json requests to the owning service with the path rewritten to
//! that service's local docs layout. The rewriter is not a general URL
//! router; its contract is exactly the two mappings below.

use crate::error::{GatewayError, Result};
use crate::observability::metrics::GatewayMetrics;
use bytes::Bytes;
use http::Response;
use std::sync::Arc;
use std::time::Duration;

/// Docs reverse proxy
pub struct DocsProxy {
    enabled: bool,
    /// (name, base_url) pairs sorted by name for a stable index page
    services: Vec<(String, String)>,
    client: reqwest::Client,
    metrics: Arc<GatewayMetrics>,
}

/// What a docs path resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
enum DocsRoute {
    Index,
    SwaggerUi { service: String },
    SwaggerJson { service: String },
    NotFound,
}

impl DocsProxy {
    /// Build the proxy from configured services
    pub fn new(
        enabled: bool,
        services: impl IntoIterator<Item = (String, String)>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let mut services: Vec<(String, String)> = services
            .into_iter()
            .map(|(name, url)| (name, url.trim_end_matches('/').to_string()))
            .collect();
        services.sort_by(|a, b| a.0.cmp(&b.0));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            enabled,
            services,
            client,
            metrics,
        }
    }

    /// Whether this proxy owns the given request path
    pub fn handles(&self, path: &str) -> bool {
        self.enabled && (path == "/docs" || path.starts_with("/docs/"))
    }

    /// Handle a docs request
    pub async fn handle(&self, path: &str, headers: &http::HeaderMap) -> Response<Vec<u8>> {
        match self.route(path) {
            DocsRoute::Index => self.index_page(),
            DocsRoute::SwaggerUi { service } => {
                self.forward(&service, "/docs/swagger-ui/", headers).await
            }
            DocsRoute::SwaggerJson { service } => {
                let upstream_path = format!("/docs/{}.swagger.json", service);
                self.forward(&service, &upstream_path, headers).await
            }
            DocsRoute::NotFound => Response::builder()
                .status(404)
                .header("Content-Type", "application/json")
                .body(br#"{"error":"unknown docs service"}"#.to_vec())
                .unwrap(),
        }
    }

    fn route(&self, path: &str) -> DocsRoute {
        if path == "/docs" || path == "/docs/" {
            return DocsRoute::Index;
        }

        let Some(rest) = path.strip_prefix("/docs/") else {
            return DocsRoute::NotFound;
        };
        let Some((service, tail)) = rest.split_once('/') else {
            return DocsRoute::NotFound;
        };

        if !self.services.iter().any(|(name, _)| name == service) {
            return DocsRoute::NotFound;
        }

        if tail == "swagger.json" {
            DocsRoute::SwaggerJson {
                service: service.to_string(),
            }
        } else if tail == "swagger-ui" || tail.starts_with("swagger-ui/") {
            DocsRoute::SwaggerUi {
                service: service.to_string(),
            }
        } else {
            DocsRoute::NotFound
        }
    }

    /// Forward a rewritten request to the owning service
    async fn forward(
        &self,
        service: &str,
        upstream_path: &str,
        headers: &http::HeaderMap,
    ) -> Response<Vec<u8>> {
        match self.do_forward(service, upstream_path, headers).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_upstream_error();
                tracing::error!(service, error = %e, "Docs upstream request failed");
                Response::builder()
                    .status(502)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(format!("docs service '{}' is unavailable", service).into_bytes())
                    .unwrap()
            }
        }
    }

    async fn do_forward(
        &self,
        service: &str,
        upstream_path: &str,
        headers: &http::HeaderMap,
    ) -> Result<Response<Vec<u8>>> {
        let base_url = self
            .services
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, url)| url.as_str())
            .ok_or_else(|| GatewayError::DocsUpstream(service.to_string()))?;

        let url = format!("{}{}", base_url, upstream_path);
        let mut request = self.client.get(&url);

        // Forward end-to-end headers; Host is rewritten to the upstream by
        // the client from the URL.
        for (key, value) in headers.iter() {
            if !is_hop_by_hop(key.as_str()) && key != http::header::HOST {
                request = request.header(key.clone(), value.clone());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::DocsUpstream(format!("{}: {}", service, e)))?;

        let status = response.status();
        let resp_headers = response.headers().clone();
        let body: Bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::DocsUpstream(format!("{}: {}", service, e)))?;

        let mut builder = Response::builder().status(status.as_u16());
        for (key, value) in resp_headers.iter() {
            if !is_hop_by_hop(key.as_str()) {
                builder = builder.header(key, value);
            }
        }
        Ok(builder.body(body.to_vec()).unwrap())
    }

    /// Synthesize the HTML index listing every documented service
    fn index_page(&self) -> Response<Vec<u8>> {
        let mut items = String::new();
        for (name, _) in &self.services {
            items.push_str(&format!(
                "    <li><strong>{name}</strong> — \
<a href=\"/docs/{name}/swagger-ui\">swagger-ui</a> · \
<a href=\"/docs/{name}/swagger.json\">swagger.json</a></li>\n",
            ));
        }

        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>API Documentation</title></head>\n\
<body>\n  <h1>API Documentation</h1>\n  <ul>\n{}  </ul>\n</body>\n</html>\n",
            items
        );

        Response::builder()
            .status(200)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(body.into_bytes())
            .unwrap()
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(services: &[(&str, &str)]) -> DocsProxy {
        DocsProxy::new(
            true,
            services
                .iter()
                .map(|(n, u)| (n.to_string(), u.to_string())),
            Arc::new(GatewayMetrics::new()),
        )
    }

    // --- routing ---

    #[test]
    fn test_handles_docs_paths_only() {
        let p = proxy(&[("auth", "http://upstream")]);
        assert!(p.handles("/docs"));
        assert!(p.handles("/docs/"));
        assert!(p.handles("/docs/auth/swagger.json"));
        assert!(!p.handles("/rest/auth"));
        assert!(!p.handles("/docsx"));
    }

    #[test]
    fn test_disabled_handles_nothing() {
        let p = DocsProxy::new(false, Vec::new(), Arc::new(GatewayMetrics::new()));
        assert!(!p.handles("/docs"));
    }

    #[test]
    fn test_route_index() {
        let p = proxy(&[("auth", "http://upstream")]);
        assert_eq!(p.route("/docs"), DocsRoute::Index);
        assert_eq!(p.route("/docs/"), DocsRoute::Index);
    }

    #[test]
    fn test_route_swagger_json() {
        let p = proxy(&[("auth", "http://upstream")]);
        assert_eq!(
            p.route("/docs/auth/swagger.json"),
            DocsRoute::SwaggerJson {
                service: "auth".to_string()
            }
        );
    }

    #[test]
    fn test_route_swagger_ui_with_and_without_tail() {
        let p = proxy(&[("auth", "http://upstream")]);
        for path in [
            "/docs/auth/swagger-ui",
            "/docs/auth/swagger-ui/",
            "/docs/auth/swagger-ui/index.css",
        ] {
            assert_eq!(
                p.route(path),
                DocsRoute::SwaggerUi {
                    service: "auth".to_string()
                },
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_route_unknown_service_is_not_found() {
        let p = proxy(&[("auth", "http://upstream")]);
        assert_eq!(p.route("/docs/nope/swagger.json"), DocsRoute::NotFound);
        assert_eq!(p.route("/docs/nope/swagger-ui"), DocsRoute::NotFound);
    }

    #[test]
    fn test_route_unknown_tail_is_not_found() {
        let p = proxy(&[("auth", "http://upstream")]);
        assert_eq!(p.route("/docs/auth/openapi.yaml"), DocsRoute::NotFound);
        assert_eq!(p.route("/docs/auth"), DocsRoute::NotFound);
    }

    // --- index page ---

    #[tokio::test]
    async fn test_index_lists_services_with_links() {
        let p = proxy(&[
            ("user-dashboard", "http://dash"),
            ("auth", "http://auth"),
        ]);
        let response = p.handle("/docs", &http::HeaderMap::new()).await;
        assert_eq!(response.status(), 200);
        let body = String::from_utf8(response.into_body()).unwrap();
        assert!(body.contains("auth"));
        assert!(body.contains("user-dashboard"));
        assert!(body.contains("/docs/auth/swagger-ui"));
        assert!(body.contains("/docs/auth/swagger.json"));
        // Sorted output: auth before user-dashboard.
        assert!(body.find("auth").unwrap() < body.find("user-dashboard").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_service_404() {
        let p = proxy(&[("auth", "http://upstream")]);
        let response = p
            .handle("/docs/ghost/swagger.json", &http::HeaderMap::new())
            .await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_502() {
        // Nothing listens on this port.
        let p = proxy(&[("auth", "http://127.0.0.1:1")]);
        let response = p
            .handle("/docs/auth/swagger.json", &http::HeaderMap::new())
            .await;
        assert_eq!(response.status(), 502);
        let body = String::from_utf8(response.into_body()).unwrap();
        assert!(body.contains("auth"));
    }

    // --- hop-by-hop ---

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Accept"));
    }
}
