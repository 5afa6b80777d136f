//! WebSocket frame types.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |   Masking-key, if MASK set    |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```

use bytes::Bytes;

/// First header byte of every outbound frame: FIN set, RSV clear, text opcode.
pub const TEXT_FRAME_HEAD: u8 = 0x81;

/// Largest outbound header: 2 base bytes + 8 extended length bytes.
pub const MAX_HEAD_SIZE: usize = 10;

/// Frame operation code.
///
/// Opcodes outside the RFC 6455 set are kept as `Reserved` so the decoder can
/// pass them through instead of rejecting the frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text (0x1).
    Text,
    /// Binary data (0x2).
    Binary,
    /// Connection close (0x8).
    Close,
    /// Ping (0x9).
    Ping,
    /// Pong (0xA).
    Pong,
    /// Any other 4-bit value.
    Reserved(u8),
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl From<u8> for OpCode {
    /// Interprets the low four bits of `value`.
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(code) => code & 0x0F,
        }
    }
}

/// One decoded WebSocket frame.
///
/// `payload` is always unmasked; `mask` records the key the peer used, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Operation code.
    pub opcode: OpCode,
    /// Masking key from the wire, present iff the MASK bit was set.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from its parts.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: Bytes) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload,
        }
    }

    /// A final, unmasked text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload.into())
    }

    /// A final, unmasked close frame with an empty body.
    pub fn close() -> Self {
        Self::new(true, OpCode::Close, None, Bytes::new())
    }

    /// Whether the MASK bit was set.
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of payload bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Reduce the frame to what the relay acts on.
    ///
    /// Only `Close` is interpreted. Every other opcode, including binary,
    /// ping and continuation, is relayed as text decoded lossily from UTF-8.
    pub fn into_message(self) -> Message {
        match self.opcode {
            OpCode::Close => Message::Close,
            _ => Message::Text(String::from_utf8_lossy(&self.payload).into_owned()),
        }
    }
}

/// The closed set of inbound messages the relay distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text to broadcast.
    Text(String),
    /// The peer asked to close.
    Close,
}
