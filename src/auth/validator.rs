//! Token validation — contract and JWT implementation
//!
//! The middleware depends only on [`TokenValidator`], so alternative
//! schemes (opaque-token introspection, mTLS identities) can replace the
//! JWT validator without touching middleware logic.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::error::{GatewayError, Result};

/// Validation failures, each mapped to a distinct client-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The token could not be parsed or its signature did not verify
    #[error("invalid token")]
    InvalidToken,
    /// The token was valid but its `exp` is in the past
    #[error("token has expired")]
    ExpiredToken,
    /// The token verified but its claims are missing or malformed
    #[error("invalid token claims")]
    InvalidClaims,
}

/// Identity extracted from a validated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Authenticated user id; never empty
    pub user_id: String,
    /// Mobile number, when the token carries one
    pub mobile: Option<String>,
    /// Expiry as unix seconds; always in the future at validation time
    pub expires_at: u64,
}

/// Validates a bearer token and extracts identity claims.
///
/// Implementations must be deterministic, stateless, and safe for
/// concurrent use.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> std::result::Result<Claims, ValidationError>;
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    mobile: Option<String>,
    exp: u64,
}

/// JWT validator pinned to a single configured algorithm
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Build a validator for the configured algorithm and key material.
    ///
    /// HS* algorithms take the raw shared secret; RS* algorithms take a
    /// PEM-encoded RSA public key.
    pub fn new(algorithm: &str, secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(GatewayError::Config(
                "JWT secret cannot be empty".to_string(),
            ));
        }

        let algorithm = match algorithm {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            "RS256" => Algorithm::RS256,
            "RS384" => Algorithm::RS384,
            "RS512" => Algorithm::RS512,
            other => {
                return Err(GatewayError::Config(format!(
                    "Unsupported JWT algorithm '{}'",
                    other
                )));
            }
        };

        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(secret.as_bytes())
            }
            _ => DecodingKey::from_rsa_pem(secret.as_bytes()).map_err(|e| {
                GatewayError::Config(format!("Invalid RSA public key: {}", e))
            })?,
        };

        // Pinning the algorithm rejects `none` and downgrade attempts.
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = ["exp"].iter().map(|s| s.to_string()).collect();

        Ok(Self {
            decoding_key,
            validation,
        })
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> std::result::Result<Claims, ValidationError> {
        let data = decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ValidationError::ExpiredToken
                }
                jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
                | jsonwebtoken::errors::ErrorKind::Json(_) => ValidationError::InvalidClaims,
                _ => ValidationError::InvalidToken,
            })?;

        let raw = data.claims;
        if raw.user_id.is_empty() {
            return Err(ValidationError::InvalidClaims);
        }

        Ok(Claims {
            user_id: raw.user_id,
            mobile: raw.mobile.filter(|m| !m.is_empty()),
            expires_at: raw.exp,
        })
    }
}
