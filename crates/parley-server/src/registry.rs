//! Registry of open connections.
//!
//! A single actor task owns the connection map. Every mutation and every
//! snapshot is a [`RegistryCommand`] processed in order, so `add`, `remove`
//! and `snapshot` are linearizable without any lock shared across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};

/// Pending commands buffered before callers start waiting on the actor.
const COMMAND_BUFFER: usize = 1024;

/// Commands processed by the registry actor.
#[derive(Debug)]
enum RegistryCommand {
    /// Insert an `Open` connection.
    Add {
        conn: Arc<Connection>,
        reply_tx: oneshot::Sender<bool>,
    },
    /// Remove a connection by ID.
    Remove {
        id: ConnectionId,
        reply_tx: oneshot::Sender<Option<Arc<Connection>>>,
    },
    /// Copy out every member.
    Snapshot {
        reply_tx: oneshot::Sender<Vec<Arc<Connection>>>,
    },
    /// Count members.
    Len { reply_tx: oneshot::Sender<usize> },
}

/// Handle to the registry actor. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Registry {
    cmd_tx: mpsc::Sender<RegistryCommand>,
}

impl Registry {
    /// Spawn the actor on the current runtime. It stops once every handle is
    /// dropped.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let _ = tokio::spawn(run_actor(cmd_rx));
        Self { cmd_tx }
    }

    /// Register an `Open` connection.
    ///
    /// Returns `false` if the connection is not `Open` or already present.
    pub async fn add(&self, conn: Arc<Connection>) -> bool {
        self.request(|reply_tx| RegistryCommand::Add { conn, reply_tx })
            .await
            .unwrap_or(false)
    }

    /// Deregister a connection. Removing an absent ID is a no-op returning
    /// `None`.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let id = id.clone();
        self.request(|reply_tx| RegistryCommand::Remove { id, reply_tx })
            .await
            .flatten()
    }

    /// Point-in-time copy of the members. Later changes do not affect it.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.request(|reply_tx| RegistryCommand::Snapshot { reply_tx })
            .await
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.request(|reply_tx| RegistryCommand::Len { reply_tx })
            .await
            .unwrap_or(0)
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(command(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

async fn run_actor(mut cmd_rx: mpsc::Receiver<RegistryCommand>) {
    let mut connections: HashMap<ConnectionId, Arc<Connection>> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RegistryCommand::Add { conn, reply_tx } => {
                let added = if !conn.is_open() {
                    warn!(conn_id = %conn.id, state = ?conn.state(), "refusing to register connection that is not open");
                    false
                } else if connections.contains_key(&conn.id) {
                    warn!(conn_id = %conn.id, "connection already registered");
                    false
                } else {
                    let _ = connections.insert(conn.id.clone(), conn);
                    true
                };
                let _ = reply_tx.send(added);
            }
            RegistryCommand::Remove { id, reply_tx } => {
                let removed = connections.remove(&id);
                if removed.is_some() {
                    debug!(conn_id = %id, connections = connections.len(), "connection deregistered");
                }
                let _ = reply_tx.send(removed);
            }
            RegistryCommand::Snapshot { reply_tx } => {
                let _ = reply_tx.send(connections.values().cloned().collect());
            }
            RegistryCommand::Len { reply_tx } => {
                let _ = reply_tx.send(connections.len());
            }
        }
    }

    debug!("registry actor stopped");
}
