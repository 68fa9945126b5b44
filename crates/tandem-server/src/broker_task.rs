//! Broker task.
//!
//! A single tokio task owns the [`Broker`] and is the only code that mutates
//! matching state. Connection tasks talk to it through a bounded mailbox
//! ([`BrokerHandle`]); it answers through one bounded outbound channel per
//! connection. Delivery never waits: a connection whose queue is full is
//! dropped and reported to the broker as closed, so a slow socket neither
//! stalls matching nor grows memory without limit.
//!
//! Escalation timers are not separate tasks. Between commands the broker
//! task sleeps until [`Broker::next_deadline`] and then processes a
//! [`BrokerEvent::Tick`], which keeps timer handling on the same serialized
//! path as every other event.

use std::collections::HashMap;

use tandem_core::{Broker, BrokerAction, BrokerEvent, LogLevel};
use tandem_proto::ClientId;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};

use crate::{error::ServerError, system_env::SystemEnv};

/// Frames a connection may have queued before it is dropped.
pub const OUTBOUND_CAPACITY: usize = 256;

const QUEUE_FULL_REASON: &str = "outbound queue full";

/// Frames queued for one connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame
    Text(String),
    /// Close the socket with a reason
    Close(String),
}

/// Counts published after every processed event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Open connections
    pub connections: usize,
    /// Joined clients
    pub clients: usize,
}

/// Mailbox messages for the broker task.
#[derive(Debug)]
pub enum Command {
    /// A connection finished its handshake
    Connect {
        /// Handle assigned by the accept loop
        client_id: ClientId,
        /// Writer channel for this connection
        outbound: mpsc::Sender<Outbound>,
    },
    /// Any other broker event
    Event(BrokerEvent),
    /// Stop processing and drop every connection's writer channel
    Shutdown,
}

/// Cloneable sender side of the broker mailbox.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<Command>,
}

impl BrokerHandle {
    /// Register a connection and its writer channel.
    pub async fn connect(
        &self,
        client_id: ClientId,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<(), ServerError> {
        self.send(Command::Connect { client_id, outbound }).await
    }

    /// Deliver an event to the broker.
    pub async fn send_event(&self, event: BrokerEvent) -> Result<(), ServerError> {
        self.send(Command::Event(event)).await
    }

    /// Ask the broker task to stop. No-op if it already has.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), ServerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::Internal("broker task has stopped".to_string()))
    }
}

/// Spawn the broker task.
///
/// Returns the mailbox handle, a receiver for published counts, and the
/// task's join handle.
pub fn spawn(
    broker: Broker<SystemEnv>,
    mailbox_capacity: usize,
) -> (BrokerHandle, watch::Receiver<BrokerStats>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let (stats_tx, stats_rx) = watch::channel(BrokerStats::default());

    let task = BrokerTask {
        broker,
        mailbox: rx,
        outbound: HashMap::new(),
        overflowed: Vec::new(),
        stats: stats_tx,
    };
    let join = tokio::spawn(task.run());

    (BrokerHandle { tx }, stats_rx, join)
}

struct BrokerTask {
    broker: Broker<SystemEnv>,
    mailbox: mpsc::Receiver<Command>,
    outbound: HashMap<ClientId, mpsc::Sender<Outbound>>,
    /// Connections dropped during the current event, not yet reported
    overflowed: Vec<ClientId>,
    stats: watch::Sender<BrokerStats>,
}

impl BrokerTask {
    async fn run(mut self) {
        tracing::debug!("broker task started");

        loop {
            let deadline = self.broker.next_deadline();

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(Command::Connect { client_id, outbound }) => {
                        self.outbound.insert(client_id, outbound);
                        self.process(BrokerEvent::ConnectionAccepted { client_id });
                    },
                    Some(Command::Event(event)) => {
                        let closed = match &event {
                            BrokerEvent::ConnectionClosed { client_id, .. } => Some(*client_id),
                            _ => None,
                        };
                        self.process(event);
                        if let Some(client_id) = closed {
                            self.outbound.remove(&client_id);
                        }
                    },
                    Some(Command::Shutdown) | None => break,
                },
                () = sleep_until(deadline) => self.process(BrokerEvent::Tick),
            }
        }

        tracing::info!("broker task stopped with {} open connections", self.outbound.len());
    }

    fn process(&mut self, event: BrokerEvent) {
        self.apply(event);
        while let Some(client_id) = self.overflowed.pop() {
            let reason = QUEUE_FULL_REASON.to_string();
            self.apply(BrokerEvent::ConnectionClosed { client_id, reason });
        }

        self.stats.send_replace(BrokerStats {
            connections: self.broker.connection_count(),
            clients: self.broker.client_count(),
        });
    }

    fn apply(&mut self, event: BrokerEvent) {
        match self.broker.process_event(event) {
            Ok(actions) => self.execute(actions),
            Err(e) if e.is_bug() => tracing::error!("broker state corrupted: {}", e),
            Err(e) => tracing::warn!("broker rejected event: {}", e),
        }
    }

    fn execute(&mut self, actions: Vec<BrokerAction<std::time::Instant>>) {
        for action in actions {
            match action {
                BrokerAction::Emit { client_id, message } => match message.encode() {
                    Ok(text) => self.deliver(client_id, Outbound::Text(text)),
                    Err(e) => tracing::error!("failed to encode {}: {}", message.event_name(), e),
                },

                BrokerAction::CloseConnection { client_id, reason } => {
                    tracing::info!("closing connection {}: {}", client_id, reason);
                    if let Some(tx) = self.outbound.remove(&client_id) {
                        let _ = tx.try_send(Outbound::Close(reason));
                    }
                },

                BrokerAction::Log { level, message, .. } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                    LogLevel::Error => tracing::error!("{}", message),
                },
            }
        }
    }

    fn deliver(&mut self, client_id: ClientId, frame: Outbound) {
        let Some(tx) = self.outbound.get(&client_id) else {
            tracing::debug!("no writer registered for {}", client_id);
            return;
        };

        match tx.try_send(frame) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                tracing::warn!("dropping connection {}: {}", client_id, QUEUE_FULL_REASON);
                // Dropping the only sender ends the writer once it drains.
                self.outbound.remove(&client_id);
                self.overflowed.push(client_id);
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("writer for {} already gone", client_id);
            },
        }
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
