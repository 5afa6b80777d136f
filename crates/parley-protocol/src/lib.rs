//! # parley-protocol
//!
//! The wire layer of the parley relay, with no sockets attached.
//!
//! - [`codec`]: `tokio_util` codec that decodes inbound WebSocket frames and
//!   encodes outbound server-to-client text frames
//! - [`frame`]: frame and opcode types
//! - [`handshake`]: HTTP upgrade request parsing and accept-key derivation
//! - [`mask`]: client-to-server payload masking
//!
//! Supported subset of RFC 6455: single unfragmented frames, 7-bit and 16-bit
//! inbound payload lengths, outbound lengths up to `u32::MAX`. There is no
//! ping/pong handling and no continuation reassembly.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod handshake;
pub mod mask;

pub use codec::{FrameCodec, encode_text};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, Message, OpCode};
pub use handshake::{HandshakeRequest, Method, Negotiation, accept_key};
