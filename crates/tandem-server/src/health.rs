//! Liveness probe.
//!
//! A bare HTTP/1.1 listener that answers every request with `200 OK` and a
//! small JSON report. The request itself is not parsed; any path works.
//! Counts come from the broker task's [`BrokerStats`] watch channel, so the
//! probe never touches matching state.

use std::{net::SocketAddr, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
};

use crate::{broker_task::BrokerStats, error::ServerError};

/// Body of a probe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Always `"ok"` while the process serves requests
    pub status: &'static str,
    /// Application name
    pub app: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Deployment name, e.g. `production`
    pub environment: String,
    /// Seconds since the server started
    pub uptime_secs: u64,
    /// When the report was produced (RFC 3339)
    pub timestamp: DateTime<Utc>,
    /// Open connections
    pub connections: usize,
    /// Joined clients
    pub clients: usize,
}

impl HealthReport {
    /// Report for the given counts, taken at `now`.
    pub fn new(
        stats: BrokerStats,
        started: Instant,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: "ok",
            app: "tandem",
            version: env!("CARGO_PKG_VERSION"),
            environment: environment.to_string(),
            uptime_secs: started.elapsed().as_secs(),
            timestamp: now,
            connections: stats.connections,
            clients: stats.clients,
        }
    }
}

/// HTTP listener for liveness checks.
pub struct HealthProbe {
    listener: TcpListener,
    stats: watch::Receiver<BrokerStats>,
    started: Instant,
    environment: String,
}

impl HealthProbe {
    /// Bind the probe on `address`.
    pub async fn bind(
        address: &str,
        stats: watch::Receiver<BrokerStats>,
        started: Instant,
        environment: String,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid health address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind health probe: {e}")))?;

        tracing::info!("health probe bound to {}", addr);

        Ok(Self { listener, stats, started, environment })
    }

    /// Local address the probe is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve probe requests until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let stats = *self.stats.borrow();
                    let report =
                        HealthReport::new(stats, self.started, &self.environment, Utc::now());
                    tokio::spawn(async move {
                        if let Err(e) = respond(stream, &report).await {
                            tracing::debug!("health probe response failed: {}", e);
                        }
                    });
                },
                Err(e) => tracing::warn!("health probe accept error: {}", e),
            }
        }
    }
}

async fn respond(mut stream: TcpStream, report: &HealthReport) -> Result<(), ServerError> {
    // Drain whatever request line and headers arrived; the content is ignored.
    let mut buf = [0u8; 1024];
    let read = stream.read(&mut buf).await?;
    tracing::trace!("health probe request ({} bytes)", read);

    let body = serde_json::to_string(report)
        .map_err(|e| ServerError::Internal(format!("failed to encode health report: {e}")))?;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n{}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
