//! WebSocket to TCP relay
//!
//! Bridges an upgraded WebSocket to a VM's display socket. Each direction
//! runs as its own task; whichever ends first triggers a shared shutdown
//! that closes both ends exactly once.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Read buffer for the backend socket
pub const RELAY_BUFFER_SIZE: usize = 1024;

/// Close code sent when the backend cannot be dialed
pub const CLOSE_BACKEND_UNAVAILABLE: u16 = 1011;

/// Single-shot shutdown shared by both relay directions
#[derive(Debug, Default)]
pub struct RelayShutdown {
    closed: AtomicBool,
    token: CancellationToken,
}

impl RelayShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown of both ends.
    ///
    /// Returns true only for the first caller.
    pub fn close(&self, origin: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("Relay closing ({} ended)", origin);
        self.token.cancel();
        true
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// Bytes moved during one relay session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub to_client: u64,
    pub to_backend: u64,
}

/// Relay for one public endpoint
pub struct TcpRelay {
    endpoint: String,
    backend: String,
}

impl TcpRelay {
    pub fn new(endpoint: &str, backend: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            backend: backend.to_string(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Bridge an upgraded WebSocket to the backend until either side closes.
    ///
    /// A failed dial closes the WebSocket with [`CLOSE_BACKEND_UNAVAILABLE`].
    pub async fn bridge(self, mut socket: WebSocket) -> anyhow::Result<RelaySummary> {
        let session = Uuid::new_v4();
        debug!("[{}] Connecting {} to {}", session, self.endpoint, self.backend);

        let stream = match TcpStream::connect(&self.backend).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    "[{}] Failed to connect to backend {}: {}",
                    session, self.backend, e
                );
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_BACKEND_UNAVAILABLE,
                        reason: "backend unavailable".into(),
                    })))
                    .await;
                return Err(anyhow::anyhow!("backend {} unavailable: {}", self.backend, e));
            }
        };
        info!("[{}] Relaying {} <-> {}", session, self.endpoint, self.backend);

        let (tcp_read, tcp_write) = stream.into_split();
        let (ws_write, ws_read) = socket.split();
        let shutdown = Arc::new(RelayShutdown::new());

        let to_client = tokio::spawn(forward_backend_to_client(
            tcp_read,
            ws_write,
            shutdown.clone(),
        ));
        let to_backend = tokio::spawn(forward_client_to_backend(
            ws_read,
            tcp_write,
            shutdown.clone(),
        ));

        let (to_client, to_backend) = tokio::join!(to_client, to_backend);
        let summary = RelaySummary {
            to_client: to_client.unwrap_or_else(|e| {
                warn!("[{}] backend->client task failed: {}", session, e);
                0
            }),
            to_backend: to_backend.unwrap_or_else(|e| {
                warn!("[{}] client->backend task failed: {}", session, e);
                0
            }),
        };

        debug!(
            "[{}] Relay ended: {} bytes to client, {} bytes to backend",
            session, summary.to_client, summary.to_backend
        );
        Ok(summary)
    }
}

/// Backend -> client: one binary frame per socket read
async fn forward_backend_to_client(
    mut tcp_read: OwnedReadHalf,
    mut ws_write: SplitSink<WebSocket, Message>,
    shutdown: Arc<RelayShutdown>,
) -> u64 {
    let mut buffer = [0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            _ = shutdown.closed() => break,
            read = tcp_read.read(&mut buffer) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("Backend closed connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Reading from backend failed: {}", e);
                break;
            }
        };

        trace!("backend->client: {} bytes", n);
        if let Err(e) = ws_write.send(Message::Binary(buffer[..n].to_vec())).await {
            debug!("Writing to WebSocket failed: {}", e);
            break;
        }
        total += n as u64;
    }

    shutdown.close("backend->client");
    let _ = ws_write.close().await;
    total
}

/// Client -> backend: each message payload is one socket write
async fn forward_client_to_backend(
    mut ws_read: SplitStream<WebSocket>,
    mut tcp_write: OwnedWriteHalf,
    shutdown: Arc<RelayShutdown>,
) -> u64 {
    let mut total = 0u64;

    loop {
        let msg = tokio::select! {
            _ = shutdown.closed() => break,
            msg = ws_read.next() => msg,
        };

        let payload = match msg {
            Some(Ok(Message::Binary(data))) => data,
            // some clients send the RFB version string as text
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!("WebSocket closed by client");
                break;
            }
            Some(Err(e)) => {
                debug!("Reading from WebSocket failed: {}", e);
                break;
            }
        };

        trace!("client->backend: {} bytes", payload.len());
        if let Err(e) = tcp_write.write_all(&payload).await {
            debug!("Writing to backend failed: {}", e);
            break;
        }
        total += payload.len() as u64;
    }

    shutdown.close("client->backend");
    let _ = tcp_write.shutdown().await;
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_creation() {
        let relay = TcpRelay::new("ws1", "127.0.0.1:5900");
        assert_eq!(relay.endpoint, "ws1");
        assert_eq!(relay.backend(), "127.0.0.1:5900");
    }

    #[tokio::test]
    async fn test_shutdown_fires_once() {
        let shutdown = Arc::new(RelayShutdown::new());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.closed().await })
        };

        assert!(shutdown.close("a"));
        assert!(!shutdown.close("b"));
        waiter.await.unwrap();
    }
}
