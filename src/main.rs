use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Platform gateway — HTTP front door for the gRPC backend services
#[derive(Parser)]
#[command(name = "platform-gateway", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: String,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("platform-gateway v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!(config = cli.config, "Loading configuration");
    let mut config = platform_gateway::config::GatewayConfig::from_file(&cli.config).await?;

    if let Some(listen) = cli.listen {
        config.http.address = listen;
    }

    let gateway = platform_gateway::Gateway::new(config)?;
    gateway.start().await?;

    tracing::info!("Gateway ready — press Ctrl+C to stop");
    gateway.wait_for_shutdown().await;

    Ok(())
}
