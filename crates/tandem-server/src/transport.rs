//! WebSocket transport.
//!
//! Accepts TCP connections, performs the WebSocket handshake and runs one
//! task per connection. Each connection task is split in two:
//!
//! - a writer that drains the connection's [`Outbound`] channel into the
//!   socket, and
//! - a reader that decodes text frames into [`ClientMessage`]s and forwards
//!   them to the broker task.
//!
//! Frames that fail to decode never reach the broker. The client gets the
//! generic `error` notice and the connection stays open. Messages larger than
//! [`TRANSPORT_LIMIT_FACTOR`] times the codec limit are refused by the
//! WebSocket layer itself and end the connection.
//!
//! When an origin allowlist is configured, handshakes whose `Origin` header
//! is not on it are answered with `403 Forbidden`. Requests without an
//! `Origin` header (non-browser clients) are accepted.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use tandem_core::BrokerEvent;
use tandem_proto::{ClientId, ClientMessage, GENERIC_ERROR_DESCRIPTION, ServerMessage};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::{
    Message,
    handshake::server::{ErrorResponse, Request, Response},
    http::{StatusCode, header::ORIGIN},
    protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
};

use crate::{
    broker_task::{BrokerHandle, OUTBOUND_CAPACITY, Outbound},
    error::ServerError,
};

/// WebSocket message ceiling as a multiple of the codec's frame limit.
pub const TRANSPORT_LIMIT_FACTOR: usize = 4;

/// Per-connection settings shared by every connection task.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionPolicy {
    /// Largest text frame the codec accepts
    pub max_frame_len: usize,
    /// Accepted `Origin` values; empty accepts any
    pub allowed_origins: Arc<[String]>,
}

impl ConnectionPolicy {
    fn websocket_config(&self) -> WebSocketConfig {
        let limit = self.max_frame_len.saturating_mul(TRANSPORT_LIMIT_FACTOR);
        WebSocketConfig {
            max_message_size: Some(limit),
            max_frame_size: Some(limit),
            ..WebSocketConfig::default()
        }
    }

    fn check_origin(&self, request: &Request) -> Result<(), ErrorResponse> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }

        let Some(origin) = request.headers().get(ORIGIN) else {
            return Ok(());
        };

        match origin.to_str() {
            Ok(origin) if self.allowed_origins.iter().any(|allowed| allowed == origin) => Ok(()),
            _ => {
                let mut response = ErrorResponse::new(Some("origin not allowed".to_string()));
                *response.status_mut() = StatusCode::FORBIDDEN;
                Err(response)
            },
        }
    }
}

/// WebSocket listener.
pub struct WebSocketTransport {
    /// Bound TCP listener
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Bind a listener on `address` (e.g. `"0.0.0.0:8080"`).
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("WebSocket transport bound to {}", addr);

        Ok(Self { listener })
    }

    /// Accept the next TCP connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        Ok(self.listener.accept().await?)
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Serve one connection until either side closes it.
///
/// Registers with the broker after the handshake and always reports the
/// close, whatever ended the read loop.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: ClientId,
    broker: BrokerHandle,
    policy: ConnectionPolicy,
) -> Result<(), ServerError> {
    let config = policy.websocket_config();
    let checker = policy.clone();
    let ws = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match checker.check_origin(request) {
                Ok(()) => Ok(response),
                Err(rejection) => {
                    tracing::info!("rejected handshake from {}: origin not allowed", addr);
                    Err(rejection)
                },
            }
        },
        Some(config),
    )
    .await?;
    tracing::debug!("handshake complete for {} from {}", client_id, addr);

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    // The broker holds the only strong sender, so dropping it ends the writer.
    let notices = tx.downgrade();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                },
                Outbound::Close(reason) => {
                    let close = CloseFrame { code: CloseCode::Policy, reason: reason.into() };
                    let _ = sink.send(Message::Close(Some(close))).await;
                    break;
                },
            }
        }
        let _ = sink.close().await;
    });

    broker.connect(client_id, tx).await?;

    let mut writer_done = false;
    let reason = loop {
        let frame = tokio::select! {
            frame = source.next() => frame,
            _ = &mut writer => {
                writer_done = true;
                break "writer stopped".to_string();
            },
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                match ClientMessage::decode(&text, policy.max_frame_len) {
                    Ok(message) => {
                        let event = BrokerEvent::Inbound { client_id, message };
                        if let Err(e) = broker.send_event(event).await {
                            break e.to_string();
                        }
                    },
                    Err(e) => {
                        let error = ServerError::from(e);
                        tracing::debug!("rejected frame from {}: {}", client_id, error);
                        send_error_notice(notices.upgrade().as_ref());
                    },
                }
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!("rejected binary frame from {}", client_id);
                send_error_notice(notices.upgrade().as_ref());
            },
            Some(Ok(Message::Close(_))) | None => break "closed by peer".to_string(),
            Some(Ok(_)) => {},
            Some(Err(e)) => break e.to_string(),
        }
    };

    broker.send_event(BrokerEvent::ConnectionClosed { client_id, reason }).await?;

    // The writer finishes once the broker drops its sender for this client.
    if !writer_done {
        let _ = writer.await;
    }

    Ok(())
}

fn send_error_notice(tx: Option<&mpsc::Sender<Outbound>>) {
    let Some(tx) = tx else {
        return;
    };

    match ServerMessage::error(GENERIC_ERROR_DESCRIPTION).encode() {
        Ok(text) => {
            let _ = tx.try_send(Outbound::Text(text));
        },
        Err(e) => tracing::error!("failed to encode error notice: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_rejects_invalid_address() {
        let result = WebSocketTransport::bind("not an address").await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    fn policy(allowed: &[&str]) -> ConnectionPolicy {
        ConnectionPolicy {
            max_frame_len: 1024,
            allowed_origins: allowed.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn request(origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn empty_allowlist_accepts_any_origin() {
        let policy = policy(&[]);
        assert!(policy.check_origin(&request(Some("https://anywhere.example"))).is_ok());
        assert!(policy.check_origin(&request(None)).is_ok());
    }

    #[test]
    fn allowlist_rejects_unknown_origin_with_forbidden() {
        let policy = policy(&["https://tandem.example"]);
        assert!(policy.check_origin(&request(Some("https://tandem.example"))).is_ok());
        assert!(policy.check_origin(&request(None)).is_ok());

        let rejection = policy.check_origin(&request(Some("https://evil.example"))).unwrap_err();
        assert_eq!(rejection.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn websocket_limits_follow_frame_len() {
        let config = policy(&[]).websocket_config();
        assert_eq!(config.max_message_size, Some(4096));
        assert_eq!(config.max_frame_size, Some(4096));

        let huge = ConnectionPolicy { max_frame_len: usize::MAX, ..policy(&[]) };
        assert_eq!(huge.websocket_config().max_message_size, Some(usize::MAX));
    }

    #[test]
    fn error_notice_is_generic() {
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        send_error_notice(Some(&tx));

        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        assert_eq!(
            ServerMessage::decode(&text).unwrap(),
            ServerMessage::error("An error occurred. Please try reconnecting.")
        );
    }
}
