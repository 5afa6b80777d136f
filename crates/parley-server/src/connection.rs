//! Connection identity, lifecycle state and outbound queue.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::SessionError;

/// Unique identifier for a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which listener a connection arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    /// WebSocket peer (or a plain HTTP client on the WebSocket port).
    WebSocket,
    /// Newline-delimited text peer.
    Line,
}

impl ConnectionKind {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Line => "line",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a connection.
///
/// `Accepted -> Handshaking -> Open -> Closing -> Closed`, with `Closed`
/// reachable from every state. Nothing re-enters `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP accepted, nothing read yet.
    Accepted,
    /// Reading the request or first line.
    Handshaking,
    /// Registered and relaying.
    Open,
    /// Leaving the registry; no more sends are queued.
    Closing,
    /// Socket released.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Accepted, Self::Handshaking)
                | (Self::Handshaking, Self::Open)
                | (Self::Open, Self::Closing)
                | (_, Self::Closed)
        )
    }
}

/// Result of queueing a message on a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the connection's writer.
    Queued,
    /// Queue full. The peer is not keeping up and must be disconnected.
    Overflowed,
    /// The writer is gone or the connection is closing.
    Closed,
}

/// A single peer connection, shared between its worker, its writer and the
/// registry.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Remote address.
    pub peer: SocketAddr,
    /// Listener the connection arrived on.
    pub kind: ConnectionKind,
    /// When the TCP connection was accepted.
    pub connected_at: Instant,
    state: Mutex<ConnectionState>,
    /// Outbound queue drained by the writer task.
    tx: mpsc::Sender<Arc<str>>,
    /// Cancelled once the connection starts closing.
    closed: CancellationToken,
    overflows: AtomicU64,
}

impl Connection {
    /// Create an `Accepted` connection and the receiving end of its queue.
    pub fn new(
        peer: SocketAddr,
        kind: ConnectionKind,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        Self::build(peer, kind, queue_capacity, CancellationToken::new())
    }

    /// Like [`new`](Self::new), but the connection also starts closing when
    /// `shutdown` is cancelled.
    pub fn with_shutdown(
        peer: SocketAddr,
        kind: ConnectionKind,
        queue_capacity: usize,
        shutdown: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        Self::build(peer, kind, queue_capacity, shutdown.child_token())
    }

    fn build(
        peer: SocketAddr,
        kind: ConnectionKind,
        queue_capacity: usize,
        closed: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer,
            kind,
            connected_at: Instant::now(),
            state: Mutex::new(ConnectionState::Accepted),
            tx,
            closed,
            overflows: AtomicU64::new(0),
        });
        (conn, rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection is `Open`.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, SessionError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: Arc<str>) -> SendStatus {
        if self.closed.is_cancelled() {
            return SendStatus::Closed;
        }
        match self.tx.try_send(message) {
            Ok(()) => SendStatus::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.overflows.fetch_add(1, Ordering::Relaxed);
                SendStatus::Overflowed
            }
            Err(TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }

    /// Messages refused because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Begin closing: `Open` becomes `Closing` and the writer is told to stop.
    /// Safe to call from any task, any number of times.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
            }
        }
        self.closed.cancel();
    }

    /// Mark the socket released.
    pub fn finish(&self) {
        self.closed.cancel();
        *self.state.lock() = ConnectionState::Closed;
    }

    /// Whether [`close`](Self::close) or [`finish`](Self::finish) has run.
    pub fn is_closing(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Token cancelled when the connection starts closing.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn make_connection(capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        Connection::new(peer(), ConnectionKind::WebSocket, capacity)
    }

    fn open(conn: &Connection) {
        let _ = conn.transition(ConnectionState::Handshaking).unwrap();
        let _ = conn.transition(ConnectionState::Open).unwrap();
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
        assert_eq!(a.to_string(), a.as_str());
    }

    #[test]
    fn new_connection_is_accepted() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.state(), ConnectionState::Accepted);
        assert!(!conn.is_open());
        assert!(!conn.is_closing());
        assert_eq!(conn.kind, ConnectionKind::WebSocket);
    }

    #[test]
    fn full_lifecycle() {
        let (conn, _rx) = make_connection(4);
        open(&conn);
        assert!(conn.is_open());
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.is_closing());
        conn.finish();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn handshake_failure_goes_straight_to_closed() {
        let (conn, _rx) = make_connection(4);
        let _ = conn.transition(ConnectionState::Handshaking).unwrap();
        conn.finish();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn open_cannot_be_reentered() {
        let (conn, _rx) = make_connection(4);
        open(&conn);
        conn.close();
        let err = conn.transition(ConnectionState::Open).unwrap_err();
        assert_matches!(
            err,
            SessionError::InvalidTransition {
                from: ConnectionState::Closing,
                to: ConnectionState::Open
            }
        );
        conn.finish();
        assert!(conn.transition(ConnectionState::Open).is_err());
    }

    #[test]
    fn skipping_handshake_is_rejected() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.transition(ConnectionState::Open).is_err());
        assert_eq!(conn.state(), ConnectionState::Accepted);
    }

    #[test]
    fn close_before_open_leaves_state_alone() {
        let (conn, _rx) = make_connection(4);
        let _ = conn.transition(ConnectionState::Handshaking).unwrap();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Handshaking);
        assert!(conn.is_closing());
    }

    #[tokio::test]
    async fn send_queues_message() {
        let (conn, mut rx) = make_connection(4);
        assert_eq!(conn.send(Arc::from("hello")), SendStatus::Queued);
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_overflows_and_counts() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.send(Arc::from("one")), SendStatus::Queued);
        assert_eq!(conn.send(Arc::from("two")), SendStatus::Overflowed);
        assert_eq!(conn.send(Arc::from("three")), SendStatus::Overflowed);
        assert_eq!(conn.overflow_count(), 2);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Arc::from("hello")), SendStatus::Closed);
        assert_eq!(conn.overflow_count(), 0);
    }

    #[test]
    fn closing_connection_refuses_sends() {
        let (conn, _rx) = make_connection(4);
        open(&conn);
        conn.close();
        assert_eq!(conn.send(Arc::from("late")), SendStatus::Closed);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (conn, _rx) = make_connection(0);
        assert_eq!(conn.send(Arc::from("x")), SendStatus::Queued);
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (conn, _rx) = make_connection(4);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        waiter.await.unwrap();
    }

    #[test]
    fn shutdown_token_closes_connection() {
        let shutdown = CancellationToken::new();
        let (conn, _rx) =
            Connection::with_shutdown(peer(), ConnectionKind::Line, 4, &shutdown);
        assert!(!conn.is_closing());
        shutdown.cancel();
        assert!(conn.is_closing());
        assert_eq!(conn.send(Arc::from("late")), SendStatus::Closed);
    }

    #[test]
    fn finishing_one_connection_leaves_shutdown_alone() {
        let shutdown = CancellationToken::new();
        let (conn, _rx) =
            Connection::with_shutdown(peer(), ConnectionKind::Line, 4, &shutdown);
        conn.finish();
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn debug_includes_state() {
        let (conn, _rx) = make_connection(4);
        let rendered = format!("{conn:?}");
        assert!(rendered.contains("Accepted"));
        assert!(rendered.contains("127.0.0.1:40000"));
    }
}
