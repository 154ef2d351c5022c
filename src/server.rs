//! HTTP listener and request dispatch
//!
//! One listener accepts all traffic. Built-in routes (health, metrics) and
//! docs routes are answered directly; everything under `/rest/` runs the
//! middleware chain (rate-limit, then auth) before reaching the
//! translator.

use crate::docs::DocsProxy;
use crate::error::{GatewayError, Result};
use crate::middleware::{Pipeline, RateLimitHeaders, RequestContext};
use crate::observability::access_log::AccessLog;
use crate::observability::metrics::GatewayMetrics;
use crate::translator::Translator;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Everything a request handler needs
pub struct ServerState {
    pub pipeline: Pipeline,
    pub translator: Translator,
    pub docs: DocsProxy,
    pub metrics: Arc<GatewayMetrics>,
    pub access_log: Arc<AccessLog>,
}

/// Bind the listener. Failure aborts startup.
pub async fn bind(address: &str) -> Result<TcpListener> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| GatewayError::Config(format!("Invalid listen address '{}': {}", address, e)))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Other(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(address = %addr, "HTTP listener bound");
    Ok(listener)
}

/// Accept connections until the shutdown signal fires, then drain
/// in-flight connections within `shutdown_timeout`.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
    shutdown_timeout: Duration,
) {
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let state = state.clone();
                connections.spawn(async move {
                    let io = TokioIo::new(stream);
                    let served = http1::Builder::new()
                        .serve_connection(
                            io,
                            service_fn(move |req| {
                                handle_request(req, remote_addr, state.clone())
                            }),
                        )
                        .await;
                    if let Err(e) = served {
                        tracing::debug!(error = %e, remote = %remote_addr, "Connection ended with error");
                    }
                });

                // Reap finished connection tasks as we go.
                while connections.try_join_next().is_some() {}
            }
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    tracing::info!(in_flight = connections.len(), "Draining connections");

    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        tracing::warn!("Shutdown deadline reached, aborting remaining connections");
        connections.abort_all();
    }
}

/// Handle one HTTP exchange
async fn handle_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> std::result::Result<hyper::Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body_bytes = match http_body_util::BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let tracker = state.access_log.start_request();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let user_agent = parts
        .headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let client_ip = crate::ratelimit::client_ip(&parts.headers, &remote_addr.ip().to_string());

    let response = dispatch(parts, body_bytes, remote_addr, &state).await;

    state.metrics.record_request(response.status().as_u16());
    state.access_log.record(&tracker.build_entry(
        client_ip,
        method,
        path,
        response.status().as_u16(),
        None,
        user_agent,
    ));

    let (parts, body) = response.into_parts();
    Ok(hyper::Response::from_parts(parts, Full::new(Bytes::from(body))))
}

/// Route the request to built-ins, docs, or the translated REST surface
async fn dispatch(
    mut parts: http::request::Parts,
    body: Bytes,
    remote_addr: SocketAddr,
    state: &ServerState,
) -> http::Response<Vec<u8>> {
    let path = parts.uri.path().to_string();

    match path.as_str() {
        "/health" | "/readiness" | "/liveness" => {
            return json_response(200, r#"{"ok":1}"#.to_string());
        }
        "/metrics" => {
            return http::Response::builder()
                .status(200)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(state.metrics.render_prometheus().into_bytes())
                .unwrap();
        }
        _ => {}
    }

    // Docs routes are registered ahead of the middleware chain and bypass
    // rate limiting and authentication.
    if state.docs.handles(&path) {
        return state.docs.handle(&path, &parts.headers).await;
    }

    if Translator::handles(&path) {
        let ctx = RequestContext {
            remote_ip: remote_addr.ip().to_string(),
            path: path.clone(),
        };

        let response = match state.pipeline.process_request(&mut parts, &ctx).await {
            Ok(Some(short_circuit)) => short_circuit,
            Ok(None) => state.translator.translate(&parts, body).await,
            Err(e) => {
                // Internal middleware failures degrade to rejection.
                tracing::error!(error = %e, path, client = ctx.remote_ip, "Middleware error");
                json_response(500, r#"{"error":"internal error"}"#.to_string())
            }
        };

        return with_rate_limit_headers(response, &parts);
    }

    json_response(404, r#"{"error":"not found"}"#.to_string())
}

/// Copy the rate-limit header values computed by the middleware onto the
/// response, whatever the outcome of the request was.
fn with_rate_limit_headers(
    mut response: http::Response<Vec<u8>>,
    parts: &http::request::Parts,
) -> http::Response<Vec<u8>> {
    if let Some(rl) = parts.extensions.get::<RateLimitHeaders>() {
        let headers = response.headers_mut();
        if let Ok(v) = rl.limit.to_string().parse() {
            headers.insert("X-RateLimit-Limit", v);
        }
        if let Ok(v) = rl.remaining.to_string().parse() {
            headers.insert("X-RateLimit-Remaining", v);
        }
        if let Ok(v) = rl.reset.to_string().parse() {
            headers.insert("X-RateLimit-Reset", v);
        }
    }
    response
}

fn json_response(status: u16, body: String) -> http::Response<Vec<u8>> {
    http::Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body.into_bytes())
        .unwrap()
}
