//! HTTP↔gRPC translator
//!
//! Bridges the REST surface under `/rest/` to the configured gRPC
//! backends. Each backend contributes a method-binding table (HTTP method
//! and path → gRPC method); the tables of all configured backends are
//! compiled into one route table at startup.
//!
//! The platform's services register gRPC's JSON codec alongside protobuf,
//! so the translator carries no generated message types: the client's JSON
//! body is framed and sent as `application/grpc+json`, and the response
//! frame is returned as JSON. Identity and language metadata travel as
//! gRPC metadata (HTTP/2 headers).

pub mod codec;

use crate::auth::{USER_ID_HEADER, USER_MOBILE_HEADER};
use crate::error::{GatewayError, Result};
use crate::observability::metrics::GatewayMetrics;
use crate::pattern::{normalize, PathPattern};
use bytes::Bytes;
use codec::{decode_frame, encode_frame, GrpcStatus};
use http::{Method, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// URL prefix under which all translated routes live
pub const REST_PREFIX: &str = "/rest/";

/// Metadata header mirroring the client's language preference
pub const ACCEPT_LANGUAGE_HEADER: &str = "accept-language";

/// How long the startup reachability probe waits per backend
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One HTTP binding of a gRPC method
#[derive(Debug, Clone)]
pub struct MethodBinding {
    /// HTTP method the binding answers to
    pub http_method: Method,
    /// Path under `/rest/`; fixed segments only
    pub path: &'static str,
    /// Full gRPC method path, `/package.Service/Method`
    pub grpc_path: &'static str,
}

impl MethodBinding {
    const fn new(http_method: Method, path: &'static str, grpc_path: &'static str) -> Self {
        Self {
            http_method,
            path,
            grpc_path,
        }
    }
}

/// The binding table a backend service contributes to the gateway.
///
/// Request parameters travel in the JSON body and identity in metadata, so
/// bindings are fixed paths without parameters.
fn service_bindings(service: &str) -> Option<Vec<MethodBinding>> {
    let bindings = match service {
        "auth" => vec![
            MethodBinding::new(
                Method::POST,
                "/rest/auth/otp/authenticate",
                "/auth.AuthService/AuthenticateWithOTP",
            ),
            MethodBinding::new(Method::POST, "/rest/auth/otp/verify", "/auth.AuthService/VerifyOTP"),
            MethodBinding::new(Method::POST, "/rest/auth/users", "/auth.AuthService/NewUser"),
            MethodBinding::new(Method::GET, "/rest/auth/user", "/auth.AuthService/GetUser"),
        ],
        "user" => vec![
            MethodBinding::new(Method::GET, "/rest/user/profile", "/user.UserService/GetProfile"),
            MethodBinding::new(
                Method::POST,
                "/rest/user/shahkar/verify",
                "/user.UserService/IsShahkarValid",
            ),
        ],
        "user-dashboard" => vec![MethodBinding::new(
            Method::GET,
            "/rest/user/dashboard",
            "/userdashboard.UserDashboardService/GetDashboard",
        )],
        "user-backoffice" => vec![
            MethodBinding::new(
                Method::GET,
                "/rest/user/backoffice/users",
                "/userbackoffice.UserBackofficeService/ListUsers",
            ),
            MethodBinding::new(
                Method::POST,
                "/rest/user/backoffice/users/block",
                "/userbackoffice.UserBackofficeService/BlockUser",
            ),
        ],
        "notification" => vec![MethodBinding::new(
            Method::POST,
            "/rest/notification/sms",
            "/notification.NotificationService/SendSMS",
        )],
        "customer" => vec![
            MethodBinding::new(
                Method::GET,
                "/rest/customer/online-businesses",
                "/customer.CustomerService/ListOnlineBusinesses",
            ),
            MethodBinding::new(
                Method::POST,
                "/rest/customer/online-businesses",
                "/customer.CustomerService/NewOnlineBusiness",
            ),
        ],
        _ => return None,
    };
    Some(bindings)
}

/// A compiled route: binding plus the backend that owns it
#[derive(Debug)]
struct Route {
    service: String,
    base_url: String,
    pattern: PathPattern,
    binding: MethodBinding,
}

/// HTTP↔gRPC translator with a compiled route table
#[derive(Debug)]
pub struct Translator {
    routes: Vec<Route>,
    client: reqwest::Client,
    metrics: Arc<GatewayMetrics>,
}

impl Translator {
    /// Compile the route table from configured backends and probe each
    /// endpoint once. An unknown service name or an unreachable backend
    /// is fatal.
    pub async fn from_config(
        clients: &HashMap<String, crate::config::ClientConfig>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let mut routes = Vec::new();

        for (name, client) in clients {
            let bindings = service_bindings(name).ok_or_else(|| {
                GatewayError::Config(format!("No gRPC bindings registered for service '{}'", name))
            })?;

            let (base_url, authority) = endpoint_parts(&client.address);
            probe_backend(name, &authority).await?;
            tracing::info!(service = name, endpoint = base_url, methods = bindings.len(), "Registered backend");

            for binding in bindings {
                routes.push(Route {
                    service: name.clone(),
                    base_url: base_url.clone(),
                    pattern: PathPattern::new(binding.path),
                    binding,
                });
            }
        }

        // gRPC requires HTTP/2; backends listen on cleartext h2c.
        let client = reqwest::Client::builder()
            .http2_prior_knowledge()
            .pool_max_idle_per_host(50)
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            routes,
            client,
            metrics,
        })
    }

    /// Whether this translator owns the given request path
    pub fn handles(path: &str) -> bool {
        path.starts_with(REST_PREFIX)
    }

    /// Number of compiled routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the route table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Translate one HTTP request into a backend gRPC call.
    ///
    /// Cancellation propagates by dropping the returned future: the
    /// in-flight HTTP/2 stream to the backend is reset with it.
    pub async fn translate(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
    ) -> Response<Vec<u8>> {
        let path = normalize(parts.uri.path());
        let Some(route) = self.route_for(&parts.method, &path) else {
            return json_response(404, r#"{"error":"not found"}"#.to_string());
        };

        let message = if body.is_empty() {
            Bytes::from_static(b"{}")
        } else {
            body
        };
        if serde_json::from_slice::<serde::de::IgnoredAny>(&message).is_err() {
            return json_response(400, r#"{"error":"invalid request body"}"#.to_string());
        }

        match self.call_backend(route, parts, message).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_upstream_error();
                tracing::error!(
                    service = route.service,
                    method = route.binding.grpc_path,
                    error = %e,
                    "Backend call failed"
                );
                Response::builder()
                    .status(502)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(format!("upstream service '{}' is unavailable", route.service).into_bytes())
                    .unwrap()
            }
        }
    }

    fn route_for(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.binding.http_method == *method && r.pattern.matches(path))
    }

    async fn call_backend(
        &self,
        route: &Route,
        parts: &http::request::Parts,
        message: Bytes,
    ) -> Result<Response<Vec<u8>>> {
        let url = format!("{}{}", route.base_url, route.binding.grpc_path);

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/grpc+json")
            .header("te", "trailers")
            .header("grpc-accept-encoding", "identity");

        // Outbound metadata: identity injected by the auth middleware plus
        // the client's language preference.
        for header in [USER_ID_HEADER, USER_MOBILE_HEADER, ACCEPT_LANGUAGE_HEADER] {
            if let Some(value) = parts.headers.get(header) {
                request = request.header(header, value.clone());
            }
        }

        let response = request.body(encode_frame(&message).to_vec()).send().await?;

        let grpc_status = response
            .headers()
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);
        let grpc_message = response
            .headers()
            .get("grpc-message")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if grpc_status != 0 {
            let status = GrpcStatus::from_code(grpc_status)
                .map(|s| s.http_status())
                .unwrap_or(500);
            let body = serde_json::json!({
                "error": grpc_message,
                "code": grpc_status,
            });
            return Ok(json_response(status, body.to_string()));
        }

        let frame = response.bytes().await?;
        let payload = decode_frame(&frame).map_err(|e| GatewayError::InvalidGrpcResponse {
            service: route.service.clone(),
            reason: e.to_string(),
        })?;

        Ok(Response::builder()
            .status(200)
            .header("Content-Type", "application/json")
            .body(payload.to_vec())
            .unwrap())
    }
}

fn json_response(status: u16, body: String) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body.into_bytes())
        .unwrap()
}

/// Split a configured endpoint into (base_url, authority)
fn endpoint_parts(address: &str) -> (String, String) {
    let trimmed = address.trim_end_matches('/');
    let authority = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("h2c://"))
        .or_else(|| trimmed.strip_prefix("grpc://"))
        .unwrap_or(trimmed);
    (format!("http://{}", authority), authority.to_string())
}

/// Check a backend accepts TCP connections. Failure is fatal at startup.
async fn probe_backend(service: &str, authority: &str) -> Result<()> {
    match tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(authority)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::BackendUnavailable(format!(
            "{} at {}: {}",
            service, authority, e
        ))),
        Err(_) => Err(GatewayError::BackendUnavailable(format!(
            "{} at {}: connect timed out",
            service, authority
        ))),
    }
}
