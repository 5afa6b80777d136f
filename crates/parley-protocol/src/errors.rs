//! Frame codec error types.

use thiserror::Error;

/// Errors raised while decoding or encoding frames.
///
/// Every variant is fatal to the connection that produced it; the relay
/// never attempts partial recovery.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte stream ended in the middle of a frame.
    #[error("frame truncated: stream ended with {buffered} byte(s) of an incomplete frame")]
    Truncated {
        /// Bytes of the partial frame that were received.
        buffered: usize,
    },
    /// The peer used the 64-bit extended payload length marker (127).
    #[error("64-bit extended payload length is not supported")]
    UnsupportedLength,
    /// An outbound payload does not fit the 32-bit length field.
    #[error("payload of {0} bytes exceeds the 32-bit frame length limit")]
    PayloadTooLarge(usize),
    /// Underlying transport failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error means the peer simply went away rather than
    /// violating the protocol.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::Io(_))
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
