//! # platform-gateway
//!
//! HTTP front door for the platform's gRPC backend services.
//!
//! ## Architecture
//!
//! ```text
//! Listener → Rate Limit → Auth → Translator (HTTP/JSON ↔ gRPC) → Backend
//!                 └── docs/health/metrics routes bypass the chain
//! ```
//!
//! ## Core Features
//!
//! - **Rate limiting**: per-`client_ip:path` token buckets with
//!   exponential penalties for repeat offenders
//! - **Authentication**: pluggable bearer-token validation (JWT built in)
//!   with public-route whitelisting
//! - **Translation**: `/rest/**` routes compiled from per-backend method
//!   bindings, carried over persistent h2c connections
//! - **Docs proxy**: per-service swagger-ui and swagger.json with path
//!   rewriting and a synthesized index
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use platform_gateway::{config::GatewayConfig, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> platform_gateway::Result<()> {
//!     let config = GatewayConfig::from_file("gateway.toml").await?;
//!     let gateway = Gateway::new(config)?;
//!     gateway.start().await?;
//!     gateway.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod docs;
pub mod error;
pub mod gateway;
pub(crate) mod middleware;
pub mod observability;
pub mod pattern;
pub mod ratelimit;
pub(crate) mod server;
pub mod translator;

// Re-export main types
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

/// Gateway runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GatewayState {
    /// Gateway has been created but not yet started
    #[default]
    Created,
    /// Gateway is initializing components and binding the listener
    Starting,
    /// Gateway is actively accepting requests
    Running,
    /// Gateway is draining connections and shutting down
    Stopping,
    /// Gateway has fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
