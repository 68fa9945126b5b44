//! Tandem server binary.
//!
//! # Usage
//!
//! ```bash
//! # WebSocket broker on the default port
//! tandem-server --bind 0.0.0.0:8080
//!
//! # With a liveness probe and faster escalation
//! tandem-server --health-bind 127.0.0.1:8081 --broaden-after-secs 4 --expire-after-secs 6
//!
//! # Only accept browsers served from these origins
//! tandem-server --allowed-origin https://tandem.example --allowed-origin http://localhost:3000
//! ```

use std::time::Duration;

use clap::Parser;
use tandem_core::EscalationConfig;
use tandem_server::{BrokerConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tandem matchmaking broker
#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "Anonymous chat matchmaking broker")]
#[command(version)]
struct Args {
    /// Address to bind the WebSocket listener to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Address to serve the HTTP liveness probe on
    #[arg(long)]
    health_bind: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Seconds an interest search waits before broadening
    #[arg(long, default_value = "8")]
    broaden_after_secs: u64,

    /// Seconds an interest search waits before giving up
    #[arg(long, default_value = "10")]
    expire_after_secs: u64,

    /// Largest accepted inbound frame, in bytes
    #[arg(long, default_value = "65536")]
    max_frame_len: usize,

    /// Browser origin allowed to connect (repeatable; none allows any)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Deployment name shown by the health probe
    #[arg(long, default_value = "development")]
    environment: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn runtime_config(&self) -> ServerRuntimeConfig {
        ServerRuntimeConfig {
            bind_address: self.bind.clone(),
            health_address: self.health_bind.clone(),
            max_frame_len: self.max_frame_len,
            allowed_origins: self.allowed_origins.clone(),
            environment: self.environment.clone(),
            broker: BrokerConfig {
                max_connections: self.max_connections,
                escalation: EscalationConfig {
                    broaden_after: Duration::from_secs(self.broaden_after_secs),
                    expire_after: Duration::from_secs(self.expire_after_secs),
                },
            },
            ..ServerRuntimeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Tandem server starting");
    tracing::info!("Binding to {}", args.bind);

    let server = Server::bind(args.runtime_config()).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);
    if let Some(addr) = server.health_addr() {
        tracing::info!("Health probe listening on {}", addr?);
    }

    server.run_until(shutdown_signal()).await?;

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
                    _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                }
            },
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("SIGINT received");
            },
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C received");
    }
}
