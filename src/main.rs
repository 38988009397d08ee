//! Gatehouse - identity-propagating API gateway

use clap::Parser;
use gatehouse::{config::Config, metrics::server::MetricsServer, server::GatewayServer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Gatehouse - verifies bearer tokens and forwards a trusted user identity upstream
#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    if args.check {
        gatehouse::server::Gateway::from_config(&config)?;
        println!("Configuration OK: {} route(s)", config.routes.len());
        return Ok(());
    }

    info!("Starting Gatehouse v{}", gatehouse::VERSION);

    let metrics = if config.metrics.enabled {
        let address = format!("0.0.0.0:{}", config.metrics.port);
        Some(MetricsServer::bind(&address).await?.spawn())
    } else {
        None
    };

    let server = GatewayServer::new(config).await?;
    server.run().await?;

    if let Some(metrics) = metrics {
        metrics.shutdown().await;
    }

    Ok(())
}
