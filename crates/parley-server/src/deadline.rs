//! Read deadlines.
//!
//! Every socket read in a session goes through [`ReadDeadline::next`], so a
//! configured timeout covers the handshake, frame headers and payloads alike.
//! With no timeout the read simply waits for the peer.

use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::errors::SessionError;

/// Optional per-read deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadDeadline {
    timeout: Option<Duration>,
}

impl ReadDeadline {
    /// A deadline of `timeout` per read, or none.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Reads wait indefinitely.
    pub fn none() -> Self {
        Self::default()
    }

    /// The configured per-read timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Pull the next item, failing with [`SessionError::DeadlineElapsed`]
    /// if the deadline passes first.
    pub async fn next<S>(&self, stream: &mut S) -> Result<Option<S::Item>, SessionError>
    where
        S: Stream + Unpin,
    {
        match self.timeout {
            None => Ok(stream.next().await),
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| SessionError::DeadlineElapsed(limit)),
        }
    }
}
