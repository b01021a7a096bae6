//! # Event Relay
//!
//! Entry point of a relay process. Without a sub-command it serves until
//! Ctrl-C; `generate-secret` prints a fresh shared secret and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_runtime::{resolve_secret, RelayConfig, RelayRuntime};
use relay_telemetry::{init_telemetry, TelemetryConfig};
use relay_types::SharedSecret;
use std::time::Duration;
use tracing::{error, info};

const SERVER_DRAIN: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "relay-runtime")]
#[command(about = "Signed event relay and WebSocket fan-out server")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Print a new random shared secret (32 bytes, hex)
    GenerateSecret,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::GenerateSecret => {
            println!("{}", SharedSecret::generate().expose());
            Ok(())
        }
        Command::Serve => serve().await,
    }
}

async fn serve() -> Result<()> {
    let _telemetry = init_telemetry(&TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    let config = RelayConfig::from_env().context("Invalid configuration")?;
    let (secret, source) = resolve_secret().context("Shared secret unavailable")?;
    info!(source = %source, "Shared secret loaded");

    let bind_addr = config.bind_addr;
    let runtime = RelayRuntime::connect(config, &secret).await?;
    let app = runtime.start().await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Relay listening. Press Ctrl+C to stop.");

    let shutdown = runtime.shutdown_signal();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    match tokio::time::timeout(SERVER_DRAIN, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
        Err(_) => error!("HTTP server did not drain in time"),
    }
    Ok(())
}
