//! Per-connection workers.
//!
//! - [`websocket`]: HTTP upgrade, then WebSocket frames
//! - [`line`]: newline-delimited text, with an info page for HTTP clients
//!
//! Both share the same registry and broadcaster, so line peers and
//! WebSocket peers see each other's messages.

pub mod line;
pub mod websocket;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionKind};
use crate::deadline::ReadDeadline;
use crate::errors::SessionError;
use crate::registry::Registry;

/// Everything a connection worker needs from the server.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Shared connection registry.
    pub registry: Registry,
    /// Fan-out over `registry`.
    pub broadcaster: Broadcaster,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Cancelled when the server shuts down; every connection closes with it.
    pub shutdown: CancellationToken,
}

impl SessionContext {
    /// Build a context around an existing registry.
    pub fn new(registry: Registry, config: Arc<ServerConfig>) -> Self {
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie every connection served with this context to `shutdown`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Create a connection that closes on server shutdown.
    pub fn connection(
        &self,
        peer: SocketAddr,
        kind: ConnectionKind,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        Connection::with_shutdown(peer, kind, self.config.max_send_queue, &self.shutdown)
    }
}

/// Why an open connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame.
    PeerClosed,
    /// The peer's stream ended or errored.
    PeerDisconnected,
    /// The peer sent framing the relay does not accept.
    ProtocolViolation,
    /// Nothing arrived within the read deadline.
    ReadTimeout,
    /// A line exceeded the maximum length.
    LineTooLong,
    /// The relay closed the connection (failed write or shutdown).
    ServerClosed,
}

impl CloseReason {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::PeerDisconnected => "peer_disconnected",
            Self::ProtocolViolation => "protocol_violation",
            Self::ReadTimeout => "read_timeout",
            Self::LineTooLong => "line_too_long",
            Self::ServerClosed => "server_closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SessionError> for CloseReason {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::ClosedDuringHandshake | SessionError::Io(_) => Self::PeerDisconnected,
            SessionError::LineTooLong => Self::LineTooLong,
            SessionError::DeadlineElapsed(_) => Self::ReadTimeout,
            SessionError::InvalidTransition { .. } => Self::ServerClosed,
            SessionError::Protocol(e) if e.is_disconnect() => Self::PeerDisconnected,
            SessionError::Protocol(_) => Self::ProtocolViolation,
        }
    }
}

/// Read one line under the deadline. `Ok(None)` at end of stream.
pub(crate) async fn read_line<S, E>(
    lines: &mut S,
    deadline: ReadDeadline,
) -> Result<Option<String>, SessionError>
where
    S: Stream<Item = Result<String, E>> + Unpin,
    SessionError: From<E>,
{
    Ok(deadline.next(lines).await?.transpose()?)
}

/// Write a complete response and shut the write side down.
pub(crate) async fn respond_and_close<W>(writer: &mut W, response: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await
}

/// Tear down an open connection: stop its writer, leave the registry and
/// release the socket.
pub(crate) async fn leave(
    conn: &Arc<Connection>,
    writer: JoinHandle<()>,
    ctx: &SessionContext,
    reason: CloseReason,
) {
    conn.close();
    let _ = ctx.registry.remove(&conn.id).await;
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task failed");
    }
    conn.finish();
    let connections = ctx.registry.len().await;
    info!(%reason, connections, "peer left");
}
