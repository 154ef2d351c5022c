//! Gateway assembly — wires configuration into running components
//!
//! Startup order: configuration → observability → backend translators
//! (unreachable backend is fatal) → rate-limit middleware (bad durations
//! are fatal) → auth middleware (validator init failure is fatal) → docs
//! routes → listener. Shutdown stops accepting, drains in-flight
//! handlers within the configured deadline, and stops the bucket sweeper.

use crate::auth::AuthMiddleware;
use crate::config::GatewayConfig;
use crate::docs::DocsProxy;
use crate::error::Result;
use crate::middleware::Pipeline;
use crate::observability::access_log::AccessLog;
use crate::observability::metrics::GatewayMetrics;
use crate::ratelimit::RateLimitMiddleware;
use crate::server::{self, ServerState};
use crate::translator::Translator;
use crate::GatewayState;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// The main gateway — owns every component and their lifecycle
pub struct Gateway {
    config: GatewayConfig,
    state: RwLock<GatewayState>,
    metrics: Arc<GatewayMetrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Gateway {
    /// Validate configuration and create the gateway
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            state: RwLock::new(GatewayState::Created),
            metrics: Arc::new(GatewayMetrics::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the gateway — builds all components and binds the listener
    pub async fn start(&self) -> Result<()> {
        self.set_state(GatewayState::Starting);

        let access_log = Arc::new(AccessLog::new());

        let translator =
            Translator::from_config(&self.config.clients, self.metrics.clone()).await?;
        tracing::info!(routes = translator.len(), "Translator route table compiled");

        let rate_limit = RateLimitMiddleware::new(&self.config.ratelimit, self.metrics.clone())?;
        let store = rate_limit.store();

        let auth = AuthMiddleware::new(&self.config.auth, self.metrics.clone())?;

        // Rate limiting runs before auth: denying floods must not cost a
        // signature verification.
        let pipeline = Pipeline::new(vec![Arc::new(rate_limit), Arc::new(auth)]);

        let docs = DocsProxy::new(
            self.config.docs.enabled,
            self.config
                .docs
                .services
                .iter()
                .map(|(name, svc)| (name.clone(), svc.url.clone())),
            self.metrics.clone(),
        );

        let listener = server::bind(&self.config.http.address).await?;

        let state = Arc::new(ServerState {
            pipeline,
            translator,
            docs,
            metrics: self.metrics.clone(),
            access_log,
        });

        let sweeper = {
            let rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move { store.run_sweeper(rx).await })
        };

        let server = {
            let rx = self.shutdown_tx.subscribe();
            let timeout = Duration::from_secs(self.config.http.shutdown_timeout_secs);
            tokio::spawn(async move { server::serve(listener, state, rx, timeout).await })
        };

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(server);
            tasks.push(sweeper);
        }

        self.set_state(GatewayState::Running);
        tracing::info!("Gateway is running");
        Ok(())
    }

    /// Initiate graceful shutdown and wait for tasks to finish
    pub async fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            return; // Already shutting down
        }

        self.set_state(GatewayState::Stopping);
        tracing::info!("Gateway shutting down");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        self.set_state(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }

    /// Wait for a shutdown signal (Ctrl+C), then shut down
    pub async fn wait_for_shutdown(&self) {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        self.shutdown().await;
    }

    /// Get the current gateway state
    pub fn state(&self) -> GatewayState {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Get the configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Check if the gateway is running
    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    fn set_state(&self, new_state: GatewayState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}
