//! Bearer-token authentication
//!
//! Public routes bypass validation entirely; everything else must present
//! `Authorization: Bearer <token>`. On success the validated identity is
//! attached to the request as outbound gRPC metadata headers.

pub mod validator;

pub use validator::{Claims, JwtValidator, TokenValidator, ValidationError};

use crate::config::AuthConfig;
use crate::error::Result;
use crate::middleware::{json_error, Middleware, RequestContext};
use crate::observability::metrics::GatewayMetrics;
use crate::pattern::PatternSet;
use async_trait::async_trait;
use http::Response;
use std::sync::Arc;

/// Metadata header carrying the authenticated user id to backends
pub const USER_ID_HEADER: &str = "user-id";
/// Metadata header carrying the authenticated mobile number to backends
pub const USER_MOBILE_HEADER: &str = "user-mobile";

/// Authentication middleware
pub struct AuthMiddleware {
    enabled: bool,
    validator: Arc<dyn TokenValidator>,
    public_routes: PatternSet,
    metrics: Arc<GatewayMetrics>,
}

impl AuthMiddleware {
    /// Build the middleware from configuration. Validator construction
    /// failures (bad algorithm, empty secret, malformed key) are fatal.
    pub fn new(config: &AuthConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let validator: Arc<dyn TokenValidator> = if config.enabled {
            Arc::new(JwtValidator::new(&config.jwt_algorithm, &config.jwt_secret)?)
        } else {
            Arc::new(DisabledValidator)
        };

        Ok(Self {
            enabled: config.enabled,
            validator,
            public_routes: PatternSet::new(&config.public_routes),
            metrics,
        })
    }

    /// Build with a caller-supplied validator (used by tests and by
    /// deployments with alternative token schemes)
    pub fn with_validator(
        enabled: bool,
        validator: Arc<dyn TokenValidator>,
        public_routes: PatternSet,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            enabled,
            validator,
            public_routes,
            metrics,
        }
    }

    fn reject(&self, ctx: &RequestContext, message: &str) -> Response<Vec<u8>> {
        self.metrics.record_auth_rejected();
        tracing::warn!(path = ctx.path, client = ctx.remote_ip, reason = message, "Request rejected");
        json_error(401, message)
    }
}

/// Never called: the middleware passes everything through when disabled.
struct DisabledValidator;

impl TokenValidator for DisabledValidator {
    fn validate(&self, _token: &str) -> std::result::Result<Claims, ValidationError> {
        Err(ValidationError::InvalidToken)
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        if !self.enabled {
            return Ok(None);
        }

        // Identity metadata is set by this middleware only; drop anything
        // the client tried to smuggle in.
        req.headers.remove(USER_ID_HEADER);
        req.headers.remove(USER_MOBILE_HEADER);

        if self.public_routes.matches_any(req.uri.path()) {
            return Ok(None);
        }

        let Some(header) = req.headers.get(http::header::AUTHORIZATION) else {
            return Ok(Some(self.reject(ctx, "missing authorization header")));
        };

        let Ok(value) = header.to_str() else {
            return Ok(Some(self.reject(ctx, "invalid authorization header format")));
        };

        let token = match value.split_once(' ') {
            Some((scheme, token))
                if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
            {
                token.trim()
            }
            _ => {
                return Ok(Some(self.reject(ctx, "invalid authorization header format")));
            }
        };

        let claims = match self.validator.validate(token) {
            Ok(claims) => claims,
            Err(ValidationError::ExpiredToken) => {
                return Ok(Some(self.reject(ctx, "token has expired")));
            }
            Err(ValidationError::InvalidClaims) => {
                return Ok(Some(self.reject(ctx, "invalid token claims")));
            }
            Err(_) => {
                return Ok(Some(self.reject(ctx, "invalid token")));
            }
        };

        if let Ok(value) = claims.user_id.parse() {
            req.headers.insert(USER_ID_HEADER, value);
        } else {
            // A user id that cannot be carried as metadata is unusable.
            return Ok(Some(self.reject(ctx, "invalid token claims")));
        }
        if let Some(mobile) = &claims.mobile {
            if let Ok(value) = mobile.parse() {
                req.headers.insert(USER_MOBILE_HEADER, value);
            }
        }

        Ok(None)
    }

    fn name(&self) -> &str {
        "auth"
    }
}
