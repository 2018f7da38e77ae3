//! Frame parsing and serialization (RFC 6455 Section 5).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK is set)                  |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::OpCode;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// A single WebSocket frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1, used by permessage-deflate.
    pub rsv1: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

/// A frame decoded from the front of a buffer.
#[derive(Debug)]
pub struct Parsed {
    /// The decoded frame.
    pub frame: Frame,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Number of buffer bytes the frame occupied.
    pub len: usize,
}

impl Frame {
    /// Create a frame without extension bits.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            opcode,
            payload,
        }
    }

    /// Create a close frame. `None` produces an empty payload.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = match close {
            Some(close) => {
                let mut data = close.code.as_u16().to_be_bytes().to_vec();
                if let Some(reason) = &close.reason {
                    // Control payloads are capped at 125 bytes, 2 of which hold the code.
                    let mut end = reason.len().min(MAX_CONTROL_FRAME_PAYLOAD - 2);
                    while !reason.is_char_boundary(end) {
                        end -= 1;
                    }
                    data.extend_from_slice(&reason.as_bytes()[..end]);
                }
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Decode the payload of a close frame.
    ///
    /// An empty payload reports [`CloseCode::NoStatusReceived`].
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] for a one-byte payload or a reserved code
    /// - [`Error::InvalidUtf8`] if the reason is not UTF-8
    pub fn close_payload(payload: &[u8]) -> Result<CloseFrame> {
        match payload.len() {
            0 => Ok(CloseFrame::code(CloseCode::NoStatusReceived)),
            1 => Err(Error::Protocol("close payload of one byte".into())),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                // 1016-2999 are unassigned and must not appear on the wire.
                if code.is_reserved() || matches!(code.as_u16(), 0..=999 | 1016..=2999) {
                    return Err(Error::Protocol(format!("invalid close code {code}")));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(CloseFrame {
                    code,
                    reason: (!reason.is_empty()).then(|| reason.to_owned()),
                })
            }
        }
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. The declared payload
    /// length is checked against `max_payload` before the payload arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] for reserved opcodes, RSV2/RSV3, or malformed
    ///   control frames
    /// - [`Error::FrameTooLarge`] if the payload exceeds `max_payload`
    pub fn parse(buf: &[u8], max_payload: usize) -> Result<Option<Parsed>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let rsv1 = buf[0] & 0x40 != 0;
        if buf[0] & 0x30 != 0 {
            return Err(Error::Protocol("RSV2/RSV3 set".into()));
        }
        let opcode = OpCode::from_u8(buf[0] & 0x0F)?;
        let masked = buf[1] & 0x80 != 0;

        let (payload_len, mut offset) = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            len => (u64::from(len), 2),
        };

        let payload_len = usize::try_from(payload_len).unwrap_or(usize::MAX);
        if payload_len > max_payload {
            return Err(Error::FrameTooLarge {
                size: payload_len,
                max: max_payload,
            });
        }

        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("fragmented control frame".into()));
            }
            if payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "control frame payload of {payload_len} bytes"
                )));
            }
        }

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        if buf.len() - offset < payload_len {
            return Ok(None);
        }

        let mut payload = buf[offset..offset + payload_len].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Parsed {
            frame: Frame {
                fin,
                rsv1,
                opcode,
                payload,
            },
            masked,
            len: offset + payload_len,
        }))
    }

    /// Append the wire encoding of this frame to `out`.
    pub fn encode(&self, mask: Option<[u8; 4]>, out: &mut Vec<u8>) {
        let len = self.payload.len();
        out.reserve(len + 14);

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        out.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if len <= 125 {
            out.push(mask_bit | len as u8);
        } else if let Ok(len) = u16::try_from(len) {
            out.push(mask_bit | 126);
            out.extend_from_slice(&len.to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
    }
}

/// XOR `data` with the 4-byte masking key.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}
