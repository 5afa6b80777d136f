//! Per-connection writer task.
//!
//! Each connection's write half is owned by exactly one task, which drains
//! the connection's outbound queue through a codec. Nothing else writes to
//! the socket once the connection is open.

use std::fmt::Display;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedWrite};
use tracing::{debug, warn};

use crate::connection::Connection;

/// Spawn the writer for `conn`.
///
/// Runs until the connection starts closing, the queue's senders are gone,
/// or a write fails. A failed write closes the connection so its worker
/// deregisters it.
pub fn spawn_writer<W, C>(
    conn: Arc<Connection>,
    mut sink: FramedWrite<W, C>,
    mut outbound: mpsc::Receiver<Arc<str>>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
    C: Encoder<Arc<str>> + Send + 'static,
    C::Error: Display + Send,
{
    tokio::spawn(async move {
        let closed = conn.close_token();
        loop {
            tokio::select! {
                () = closed.cancelled() => break,
                message = outbound.recv() => {
                    let Some(text) = message else { break };
                    if let Err(e) = sink.send(text).await {
                        warn!(conn_id = %conn.id, error = %e, "write failed, closing connection");
                        conn.close();
                        break;
                    }
                }
            }
        }
        debug!(conn_id = %conn.id, "writer stopped");
    })
}
