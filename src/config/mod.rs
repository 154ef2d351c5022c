//! Gateway configuration
//!
//! Loads a TOML document with the platform's standard sections
//! (`http`, `clients`, `auth`, `ratelimit`, `docs`), applies environment
//! variable overrides, and validates the result. The configuration is
//! immutable after load.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Top-level gateway configuration
///
/// # Example
///
/// ```toml
/// [http]
/// address = "0.0.0.0:8080"
///
/// [clients.auth]
/// address = "http://127.0.0.1:50051"
///
/// [auth]
/// enabled = true
/// jwt_secret = "change-me"
/// jwt_algorithm = "HS256"
/// public_routes = ["/rest/auth/otp/*"]
///
/// [ratelimit]
/// enabled = true
/// [ratelimit.default]
/// requests = 100
/// window = "60s"
/// burst = 20
/// ```
///
/// Any nested field can be overridden by an environment variable whose name
/// is the uppercased, underscore-joined path of the field, e.g.
/// `AUTH_JWT_SECRET` or `RATELIMIT_DEFAULT_REQUESTS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Backend gRPC services, by logical name
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,

    /// Bearer-token authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-client rate limiting
    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    /// Per-service API documentation proxy
    #[serde(default)]
    pub docs: DocsConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. "0.0.0.0:8080"
    #[serde(default = "default_http_address")]
    pub address: String,

    /// Seconds to wait for in-flight requests during shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: default_http_address(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// A backend gRPC endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// gRPC endpoint, e.g. "http://127.0.0.1:50051"
    pub address: String,
}

/// Bearer-token authentication settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether the auth middleware is active
    #[serde(default)]
    pub enabled: bool,

    /// HMAC secret (HS*) or PEM-encoded public key (RS*)
    #[serde(default)]
    pub jwt_secret: String,

    /// Signing algorithm: HS256/HS384/HS512/RS256/RS384/RS512
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    /// Path patterns that bypass authentication, in declared order
    #[serde(default)]
    pub public_routes: Vec<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

/// Rate limiting settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether the rate-limit middleware is active
    #[serde(default)]
    pub enabled: bool,

    /// Fallback policy for paths without an endpoint policy
    #[serde(default)]
    pub default: Option<PolicyConfig>,

    /// Per-endpoint policies keyed by path pattern, in declared order
    #[serde(default)]
    pub endpoints: EndpointPolicies,

    /// Exponential penalty for repeat offenders
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// A single admission policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests admitted per window
    pub requests: u32,

    /// Window length, e.g. "60s"
    pub window: String,

    /// Extra tokens admitted above `requests`
    #[serde(default)]
    pub burst: u32,
}

/// Exponential backoff settings for repeat offenders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Whether offender penalties are applied
    #[serde(default)]
    pub enabled: bool,

    /// First penalty duration, e.g. "2s"
    #[serde(default = "default_backoff_base")]
    pub base_duration: String,

    /// Penalty ceiling, e.g. "10s"
    #[serde(default = "default_backoff_max")]
    pub max_duration: String,

    /// Penalty growth factor per consecutive violation
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_backoff_base() -> String {
    "1s".to_string()
}

fn default_backoff_max() -> String {
    "60s".to_string()
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_duration: default_backoff_base(),
            max_duration: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// Docs proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocsConfig {
    /// Whether docs routes are registered
    #[serde(default)]
    pub enabled: bool,

    /// Documented services by name
    #[serde(default)]
    pub services: HashMap<String, DocsServiceConfig>,
}

/// A single documented service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsServiceConfig {
    /// Base URL of the service's HTTP listener
    pub url: String,
}

/// Ordered `pattern → policy` entries.
///
/// Declared order matters: the first matching wildcard pattern wins, so the
/// entries are kept as a vector instead of a map.
#[derive(Debug, Clone, Default)]
pub struct EndpointPolicies(pub Vec<(String, PolicyConfig)>);

impl EndpointPolicies {
    /// Iterate entries in declared order
    pub fn iter(&self) -> impl Iterator<Item = &(String, PolicyConfig)> {
        self.0.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EndpointPolicies {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (pattern, policy) in &self.0 {
            map.serialize_entry(pattern, policy)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EndpointPolicies {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = EndpointPolicies;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of path pattern to policy")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((pattern, policy)) =
                    access.next_entry::<String, PolicyConfig>()?
                {
                    entries.push((pattern, policy));
                }
                Ok(EndpointPolicies(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Algorithms accepted for `auth.jwt_algorithm`
pub const SUPPORTED_JWT_ALGORITHMS: &[&str] =
    &["HS256", "HS384", "HS512", "RS256", "RS384", "RS512"];

impl GatewayConfig {
    /// Load configuration from a TOML file, applying environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string, applying environment overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut table: toml::Table = content
            .parse()
            .map_err(|e| GatewayError::Config(format!("Failed to parse TOML config: {}", e)))?;
        apply_env_overrides(&mut table, &[]);
        table
            .try_into()
            .map_err(|e| GatewayError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled {
            if self.auth.jwt_secret.is_empty() {
                return Err(GatewayError::Config(
                    "auth.jwt_secret must be set when auth is enabled".to_string(),
                ));
            }
            if !SUPPORTED_JWT_ALGORITHMS.contains(&self.auth.jwt_algorithm.as_str()) {
                return Err(GatewayError::Config(format!(
                    "Unsupported auth.jwt_algorithm '{}'",
                    self.auth.jwt_algorithm
                )));
            }
        }

        if let Some(policy) = &self.ratelimit.default {
            validate_policy("ratelimit.default", policy)?;
        }
        for (pattern, policy) in self.ratelimit.endpoints.iter() {
            validate_policy(&format!("ratelimit.endpoints.\"{}\"", pattern), policy)?;
        }
        if self.ratelimit.backoff.enabled {
            parse_duration(&self.ratelimit.backoff.base_duration)
                .map_err(|e| GatewayError::Config(format!("ratelimit.backoff.base_duration: {}", e)))?;
            parse_duration(&self.ratelimit.backoff.max_duration)
                .map_err(|e| GatewayError::Config(format!("ratelimit.backoff.max_duration: {}", e)))?;
            if self.ratelimit.backoff.multiplier < 1.0 {
                return Err(GatewayError::Config(
                    "ratelimit.backoff.multiplier must be >= 1".to_string(),
                ));
            }
        }

        for (name, client) in &self.clients {
            if client.address.is_empty() {
                return Err(GatewayError::Config(format!(
                    "clients.{}.address must not be empty",
                    name
                )));
            }
        }

        for (name, svc) in &self.docs.services {
            if svc.url.is_empty() {
                return Err(GatewayError::Config(format!(
                    "docs.services.{}.url must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

fn validate_policy(context: &str, policy: &PolicyConfig) -> Result<()> {
    if policy.requests == 0 {
        return Err(GatewayError::Config(format!(
            "{}: requests must be >= 1",
            context
        )));
    }
    let window = parse_duration(&policy.window)
        .map_err(|e| GatewayError::Config(format!("{}: window: {}", context, e)))?;
    if window.is_zero() {
        return Err(GatewayError::Config(format!(
            "{}: window must be > 0",
            context
        )));
    }
    Ok(())
}

/// Parse a duration string like "10s", "500ms", "2m", "1h".
///
/// A bare number is taken as seconds. Malformed input is an error; startup
/// fails rather than guessing.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (number, scale_ms) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1u64)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60 * 1000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 60 * 60 * 1000)
    } else {
        (s, 1000)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("invalid duration '{}'", s)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(GatewayError::Config(format!("invalid duration '{}'", s)));
    }
    Ok(Duration::from_millis((value * scale_ms as f64).round() as u64))
}

/// Override leaf values in the parsed TOML tree from environment variables.
///
/// The variable name for a field is its path joined with underscores and
/// uppercased, with non-alphanumeric characters in keys mapped to
/// underscores. Values are parsed according to the field's existing type.
fn apply_env_overrides(table: &mut toml::Table, path: &[String]) {
    for (key, value) in table.iter_mut() {
        let mut child_path = path.to_vec();
        child_path.push(sanitize_env_segment(key));

        match value {
            toml::Value::Table(inner) => apply_env_overrides(inner, &child_path),
            _ => {
                let var = child_path.join("_");
                if let Ok(raw) = std::env::var(&var) {
                    if let Some(parsed) = parse_override(&raw, value) {
                        tracing::debug!(var, "Applying environment override");
                        *value = parsed;
                    } else {
                        tracing::warn!(var, "Ignoring unparsable environment override");
                    }
                }
            }
        }
    }
}

fn sanitize_env_segment(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse an override string according to the type of the value it replaces.
fn parse_override(raw: &str, current: &toml::Value) -> Option<toml::Value> {
    match current {
        toml::Value::String(_) => Some(toml::Value::String(raw.to_string())),
        toml::Value::Integer(_) => raw.parse().ok().map(toml::Value::Integer),
        toml::Value::Float(_) => raw.parse().ok().map(toml::Value::Float),
        toml::Value::Boolean(_) => raw.parse().ok().map(toml::Value::Boolean),
        toml::Value::Array(_) => Some(toml::Value::Array(
            raw.split(',')
                .map(|v| toml::Value::String(v.trim().to_string()))
                .collect(),
        )),
        _ => None,
    }
}
