//! # parley-server
//!
//! Relays every peer's text to every connected peer.
//!
//! - [`server`]: the acceptor; one task per accepted TCP connection
//! - [`session`]: per-connection workers for WebSocket and line peers
//! - [`registry`]: actor-owned set of open connections
//! - [`broadcast`]: fan-out of one message to a registry snapshot
//! - [`writer`]: the single writer task that owns each socket's write half
//! - [`connection`]: connection identity, lifecycle state and send queue
//! - [`deadline`]: optional read deadline wrapped around every socket read

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod errors;
pub mod pages;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod writer;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionKind, ConnectionState, SendStatus};
pub use errors::{ServerError, SessionError};
pub use registry::Registry;
pub use server::{ListenHandle, RelayServer};
pub use session::{CloseReason, SessionContext};
pub use shutdown::ShutdownCoordinator;
