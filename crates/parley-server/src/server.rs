//! `RelayServer`: TCP listeners and the accept loops feeding the sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::ConnectionKind;
use crate::errors::ServerError;
use crate::registry::Registry;
use crate::session::{self, SessionContext};
use crate::shutdown::ShutdownCoordinator;

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Addresses the server actually bound.
#[derive(Clone, Copy, Debug)]
pub struct ListenHandle {
    /// WebSocket listener address.
    pub websocket_addr: SocketAddr,
    /// Line listener address, when enabled.
    pub line_addr: Option<SocketAddr>,
}

/// The relay server.
pub struct RelayServer {
    ctx: SessionContext,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RelayServer {
    /// Create a server. Must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let ctx = SessionContext::new(Registry::spawn(), Arc::new(config))
            .with_shutdown(shutdown.token());
        Self { ctx, shutdown }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    /// Get the broadcaster.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.ctx.broadcaster
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind every configured listener and start accepting.
    ///
    /// All listeners are bound before any accept loop starts, so a bind
    /// failure leaves nothing running.
    pub async fn listen(&self) -> Result<ListenHandle, ServerError> {
        let websocket = bind(&self.config().websocket_addr()).await?;
        let line = match self.config().line_addr() {
            Some(addr) => Some(bind(&addr).await?),
            None => None,
        };

        let websocket_addr = websocket.local_addr()?;
        let line_addr = line.as_ref().map(TcpListener::local_addr).transpose()?;

        info!(addr = %websocket_addr, "websocket relay listening");
        let _ = self.shutdown.spawn(accept_loop(
            websocket,
            ConnectionKind::WebSocket,
            self.ctx.clone(),
            Arc::clone(&self.shutdown),
        ));
        if let (Some(listener), Some(addr)) = (line, line_addr) {
            info!(%addr, "line relay listening");
            let _ = self.shutdown.spawn(accept_loop(
                listener,
                ConnectionKind::Line,
                self.ctx.clone(),
                Arc::clone(&self.shutdown),
            ));
        }

        Ok(ListenHandle {
            websocket_addr,
            line_addr,
        })
    }

    /// Stop accepting, close every connection and wait up to `timeout` for
    /// the connection tasks to finish.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        let connections = self.ctx.registry.len().await;
        info!(connections, "shutting down relay");
        self.shutdown.graceful_shutdown(timeout).await
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

async fn accept_loop(
    listener: TcpListener,
    kind: ConnectionKind,
    ctx: SessionContext,
    shutdown: Arc<ShutdownCoordinator>,
) {
    let token = shutdown.token();
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%kind, error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };
        debug!(%kind, %peer, "accepted connection");
        let _ = shutdown.spawn(handle_stream(stream, peer, kind, ctx.clone()));
    }
    info!(%kind, "listener stopped");
}

async fn handle_stream(
    stream: TcpStream,
    peer: SocketAddr,
    kind: ConnectionKind,
    ctx: SessionContext,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    match kind {
        ConnectionKind::WebSocket => {
            let (reader, writer) = stream.into_split();
            session::websocket::serve(reader, writer, peer, ctx).await;
        }
        ConnectionKind::Line => {
            let local = match stream.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    debug!(%peer, error = %e, "connection lost before serving");
                    return;
                }
            };
            let (reader, writer) = stream.into_split();
            session::line::serve(reader, writer, peer, local, ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn server_with_default_config() {
        let server = RelayServer::new(ServerConfig::default());
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.registry().len().await, 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn listen_binds_auto_ports() {
        let server = RelayServer::new(ServerConfig {
            line_port: Some(0),
            ..ServerConfig::default()
        });
        let handle = server.listen().await.unwrap();
        assert_ne!(handle.websocket_addr.port(), 0);
        let line_addr = handle.line_addr.unwrap();
        assert_ne!(line_addr.port(), 0);
        assert_ne!(line_addr.port(), handle.websocket_addr.port());
        assert!(server.stop(Some(Duration::from_secs(1))).await);
    }

    #[tokio::test]
    async fn no_line_listener_by_default() {
        let server = RelayServer::new(ServerConfig::default());
        let handle = server.listen().await.unwrap();
        assert!(handle.line_addr.is_none());
        assert!(server.stop(Some(Duration::from_secs(1))).await);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = RelayServer::new(ServerConfig {
            port,
            ..ServerConfig::default()
        });
        let err = server.listen().await.unwrap_err();
        assert_matches!(err, ServerError::Bind { ref addr, .. } if addr.ends_with(&port.to_string()));
    }

    #[tokio::test]
    async fn stop_stops_accepting() {
        let server = RelayServer::new(ServerConfig::default());
        let handle = server.listen().await.unwrap();
        assert!(server.stop(Some(Duration::from_secs(1))).await);
        assert!(server.shutdown().is_shutting_down());
        assert_eq!(server.shutdown().task_count(), 0);

        // The listener socket is dropped with its accept loop.
        assert!(TcpStream::connect(handle.websocket_addr).await.is_err());
    }
}
