//! gRPC bootstrap - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use grpc_bootstrap::{Runtime, Tracer, config::Config, metrics, telemetry};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "grpc-bootstrap")]
#[command(about = "gRPC and debug HTTP on one multiplexed listener", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address (host:port or :port)
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config)?;

    // CLI overrides
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    config.validate()?;

    // Tracer first so the subscriber can bridge spans into it
    let tracer = Tracer::new(&config.tracing).context("Failed to create tracer")?;
    telemetry::init_logging(&cli.log_level, &cli.log_format, &tracer)
        .context("Failed to initialize logging")?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        domains = ?config.domains,
        classify_timeout_ms = config.classify_timeout_ms,
        shutdown_grace_secs = config.shutdown_grace_secs,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Process-wide provider for any rustls config built without one
    let _ = rustls::crypto::ring::default_provider().install_default();

    let runtime =
        Runtime::new(config, tracer, prometheus_handle).context("Failed to initialize runtime")?;

    runtime
        .serve(CancellationToken::new())
        .await
        .context("Server error")?;

    Ok(())
}
