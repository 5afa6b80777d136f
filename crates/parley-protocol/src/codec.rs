//! # codec
//!
//! Byte-level framing for the relay, as a `tokio_util` codec.
//!
//! Decoding (client → server):
//! - 2 header bytes: FIN + opcode, MASK + 7-bit length
//! - length 126 ⇒ 16-bit big-endian extended length follows
//! - length 127 ⇒ rejected with [`ProtocolError::UnsupportedLength`]
//! - MASK set ⇒ 4-byte key follows and the payload is unmasked
//! - a close opcode is returned as soon as its two header bytes arrive; the
//!   connection is torn down, so the rest of that frame is never read
//!
//! Encoding (server → client): one final, unmasked text frame per message.
//! Lengths ≥ 65536 use the 127 marker with the high 32 bits zeroed, which caps
//! an outbound payload at `u32::MAX` bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{ProtocolError, Result};
use crate::frame::{Frame, MAX_HEAD_SIZE, OpCode, TEXT_FRAME_HEAD};
use crate::mask::apply_mask;

/// Header fields of a frame whose payload has not fully arrived yet.
#[derive(Debug, Clone, Copy)]
struct FrameHead {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Decoder for inbound frames and encoder for outbound text frames.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Parsed header waiting for its payload.
    pending: Option<FrameHead>,
}

impl FrameCodec {
    /// Create a codec with no partial frame state.
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_head(src: &mut BytesMut) -> Result<Option<FrameHead>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        let opcode = OpCode::from(src[0]);
        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;

        if opcode == OpCode::Close {
            src.advance(2);
            return Ok(Some(FrameHead {
                fin,
                opcode,
                mask: None,
                payload_len: 0,
            }));
        }

        let extra = match length_code {
            126 => 2,
            127 => return Err(ProtocolError::UnsupportedLength),
            _ => 0,
        };
        let header_size = 2 + extra + if masked { 4 } else { 0 };
        if src.len() < header_size {
            src.reserve(header_size - src.len());
            return Ok(None);
        }

        src.advance(2);
        let payload_len = if extra == 2 {
            usize::from(src.get_u16())
        } else {
            usize::from(length_code)
        };
        let mask = masked.then(|| src.get_u32().to_be_bytes());

        Ok(Some(FrameHead {
            fin,
            opcode,
            mask,
            payload_len,
        }))
    }

    fn decode_payload(&mut self, head: FrameHead, src: &mut BytesMut) -> Option<Frame> {
        if src.len() < head.payload_len {
            src.reserve(head.payload_len - src.len());
            self.pending = Some(head);
            return None;
        }

        let mut payload = src.split_to(head.payload_len);
        if let Some(mask) = head.mask {
            apply_mask(&mut payload, mask);
        }
        Some(Frame::new(head.fin, head.opcode, head.mask, payload.freeze()))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let head = match self.pending.take() {
            Some(head) => head,
            None => match Self::decode_head(src)? {
                Some(head) => head,
                None => return Ok(None),
            },
        };
        Ok(self.decode_payload(head, src))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() && self.pending.is_none() {
            Ok(None)
        } else {
            Err(ProtocolError::Truncated {
                buffered: buf.len(),
            })
        }
    }
}

impl<T> Encoder<T> for FrameCodec
where
    T: AsRef<str>,
{
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        write_text_frame(item.as_ref().as_bytes(), dst)
    }
}

/// Encode `text` as a single server-to-client text frame.
pub fn encode_text(text: &str) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_text_frame(text.as_bytes(), &mut dst)?;
    Ok(dst.freeze())
}

fn write_text_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = payload.len();
    let len32 = u32::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge(len))?;

    dst.reserve(MAX_HEAD_SIZE + len);
    dst.put_u8(TEXT_FRAME_HEAD);
    match (u8::try_from(len), u16::try_from(len)) {
        (Ok(short), _) if short < 126 => dst.put_u8(short),
        (_, Ok(medium)) => {
            dst.put_u8(126);
            dst.put_u16(medium);
        }
        _ => {
            dst.put_u8(127);
            dst.put_u32(0);
            dst.put_u32(len32);
        }
    }
    dst.extend_from_slice(payload);
    Ok(())
}
