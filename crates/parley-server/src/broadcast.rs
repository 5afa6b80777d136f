//! Message fan-out to every registered connection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{Connection, SendStatus};
use crate::registry::Registry;

/// Per-call delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Messages queued for a writer.
    pub delivered: usize,
    /// Recipients removed because their queue was full.
    pub overflowed: usize,
    /// Recipients found closed and removed from the registry.
    pub failed: usize,
}

/// Sends one message to every connection registered at call time.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Queue `text` for every registered connection, the sender included.
    ///
    /// Works from a registry snapshot, so joins and leaves during the call do
    /// not affect who receives it. A recipient that cannot take the message,
    /// because its writer is gone or its queue is full, is removed and closed;
    /// the rest still receive it. Never fails.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let message: Arc<str> = Arc::from(text);
        let recipients = self.registry.snapshot().await;
        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };

        for conn in &recipients {
            match conn.send(Arc::clone(&message)) {
                SendStatus::Queued => report.delivered += 1,
                SendStatus::Overflowed => {
                    report.overflowed += 1;
                    self.evict(conn, "send queue full").await;
                }
                SendStatus::Closed => {
                    report.failed += 1;
                    self.evict(conn, "recipient unreachable").await;
                }
            }
        }

        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            overflowed = report.overflowed,
            failed = report.failed,
            "broadcast message"
        );
        report
    }

    async fn evict(&self, conn: &Arc<Connection>, cause: &str) {
        warn!(conn_id = %conn.id, peer = %conn.peer, cause, "removing recipient");
        let _ = self.registry.remove(&conn.id).await;
        conn.close();
    }
}
