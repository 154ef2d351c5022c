//! Centralized error types for the gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration file parsing or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend gRPC service could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A docs upstream could not be reached
    #[error("Docs upstream unavailable: {0}")]
    DocsUpstream(String),

    /// The translated gRPC response could not be decoded
    #[error("Invalid gRPC response from {service}: {reason}")]
    InvalidGrpcResponse { service: String, reason: String },

    /// HTTP request or response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Middleware rejected the request
    #[error("Middleware rejected: {0}")]
    MiddlewareRejected(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
