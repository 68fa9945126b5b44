//! Tandem production server.
//!
//! Runs the matchmaking broker behind a WebSocket listener, using tokio for
//! the async runtime and the system clock with OS randomness.
//!
//! # Architecture
//!
//! This crate is the I/O shell around [`tandem_core`]. The [`Broker`] follows
//! the Sans-IO pattern; [`Server`] owns the sockets and executes the broker's
//! actions. One broker task serializes every state change, and one task per
//! connection handles WebSocket reads and writes.
//!
//! # Components
//!
//! - [`Server`]: accept loop, broker task and optional health probe
//! - [`WebSocketTransport`]: TCP listener + WebSocket handshake
//! - [`BrokerHandle`]: mailbox into the broker task
//! - [`HealthProbe`]: plain-HTTP liveness endpoint
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker_task;
mod error;
mod health;
mod system_env;
mod transport;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Instant};

pub use broker_task::{BrokerHandle, BrokerStats, Command, OUTBOUND_CAPACITY, Outbound};
pub use error::ServerError;
pub use health::{HealthProbe, HealthReport};
pub use system_env::SystemEnv;
use tandem_core::{Broker, MAX_ESCALATION_DELAY};
pub use tandem_core::BrokerConfig;
use tandem_proto::{ClientId, DEFAULT_MAX_FRAME_LEN};
use transport::ConnectionPolicy;
pub use transport::{TRANSPORT_LIMIT_FACTOR, WebSocketTransport};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind the WebSocket listener to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Address for the liveness probe; disabled when `None`
    pub health_address: Option<String>,
    /// Largest accepted inbound text frame, in bytes
    pub max_frame_len: usize,
    /// Capacity of the broker task's mailbox
    pub mailbox_capacity: usize,
    /// Browser origins allowed to open a WebSocket; empty allows any
    pub allowed_origins: Vec<String>,
    /// Deployment name reported by the health probe
    pub environment: String,
    /// Broker configuration (limits, escalation timing)
    pub broker: BrokerConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            health_address: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            mailbox_capacity: 1024,
            allowed_origins: Vec::new(),
            environment: "development".to_string(),
            broker: BrokerConfig::default(),
        }
    }
}

impl ServerRuntimeConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let escalation = &self.broker.escalation;
        if escalation.expire_after > MAX_ESCALATION_DELAY {
            return Err(ServerError::Config(format!(
                "expire_after ({:?}) exceeds the maximum of {:?}",
                escalation.expire_after, MAX_ESCALATION_DELAY
            )));
        }

        if !escalation.is_valid() {
            return Err(ServerError::Config(format!(
                "expire_after ({:?}) must be greater than broaden_after ({:?})",
                escalation.expire_after, escalation.broaden_after
            )));
        }

        if self.max_frame_len == 0 {
            return Err(ServerError::Config("max_frame_len must be non-zero".to_string()));
        }

        if self.mailbox_capacity == 0 {
            return Err(ServerError::Config("mailbox_capacity must be non-zero".to_string()));
        }

        if self.broker.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Production Tandem server.
pub struct Server {
    /// WebSocket listener
    transport: WebSocketTransport,
    /// Liveness probe, bound but not yet serving
    health: Option<HealthProbe>,
    /// Handle into the broker task
    broker: BrokerHandle,
    /// Broker task
    broker_task: tokio::task::JoinHandle<()>,
    /// Runtime configuration
    config: ServerRuntimeConfig,
}

impl Server {
    /// Validate `config`, bind the listeners and start the broker task.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let started = Instant::now();
        let broker = Broker::new(SystemEnv::new(), config.broker);
        let (handle, stats, broker_task) = broker_task::spawn(broker, config.mailbox_capacity);

        let transport = WebSocketTransport::bind(&config.bind_address).await?;
        let health = match &config.health_address {
            Some(address) => {
                let environment = config.environment.clone();
                Some(HealthProbe::bind(address, stats, started, environment).await?)
            },
            None => None,
        };

        Ok(Self { transport, health, broker: handle, broker_task, config })
    }

    /// Local address of the WebSocket listener.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Local address of the health probe, if enabled.
    pub fn health_addr(&self) -> Option<Result<SocketAddr, ServerError>> {
        self.health.as_ref().map(HealthProbe::local_addr)
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then stop the broker
    /// task. Open connections end when their next frame finds the broker
    /// mailbox closed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Self { transport: listener, health, broker, broker_task, config } = self;

        tracing::info!("server listening on {}", listener.local_addr()?);

        let health_task = health.map(|probe| tokio::spawn(probe.run()));
        let policy = ConnectionPolicy {
            max_frame_len: config.max_frame_len,
            allowed_origins: Arc::from(config.allowed_origins),
        };
        let mut next_id: u64 = 1;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    break;
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let client_id = ClientId(next_id);
                        next_id += 1;

                        let broker = broker.clone();
                        let policy = policy.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transport::handle_connection(
                                stream,
                                addr,
                                client_id,
                                broker,
                                policy,
                            )
                            .await
                            {
                                tracing::debug!("connection {} ended with error: {}", client_id, e);
                            }
                        });
                    },
                    Err(e) => tracing::error!("accept error: {}", e),
                },
            }
        }

        broker.shutdown().await;
        if let Err(e) = broker_task.await {
            return Err(ServerError::Internal(format!("broker task failed: {e}")));
        }

        if let Some(task) = health_task {
            task.abort();
        }

        tracing::info!("server stopped");
        Ok(())
    }
}
