use bytes::{Buf, BytesMut};
use tracing::trace;

use super::{Codec, Event, Outgoing};
use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::handshake::{
    HandshakeRequest, HandshakeResponse, compute_accept_key, find_head_end,
};
use crate::protocol::{Frame, MAX_CONTROL_FRAME_PAYLOAD, OpCode};

#[cfg(feature = "compression")]
use crate::protocol::deflate;

/// Random seed for mask generation.
fn random_mask_seed() -> Result<u32> {
    let mut buf = [0u8; 4];
    getrandom::getrandom(&mut buf).map_err(|e| Error::Io(e.to_string()))?;
    Ok(u32::from_le_bytes(buf))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// Waiting for the peer's handshake head.
    Handshake,
    /// Server parsed a request and owes an answer for this key.
    Pending { key: String, deflate_offered: bool },
    /// Frames flow both ways.
    Open,
    /// A rejection was sent or received; nothing more is decoded.
    Done,
}

/// A data message whose final frame has not arrived yet.
#[derive(Debug, Clone)]
struct Partial {
    text: bool,
    /// Compressed payload collected until the final frame, when RSV1 was set.
    deflated: Option<Vec<u8>>,
}

/// RFC 6455 codec.
///
/// Outgoing messages are always sent as a single frame. Incoming messages
/// are surfaced one fragment at a time; text fragments are split on
/// character boundaries, carrying an incomplete trailing code point over to
/// the next fragment. Compressed messages surface as one final fragment once
/// they are fully inflated.
#[derive(Debug, Clone)]
pub struct WsCodec {
    role: Role,
    limits: Limits,
    phase: Phase,
    read_buf: BytesMut,
    mask_counter: u32,
    /// Sec-WebSocket-Accept the client expects back.
    expected_accept: Option<String>,
    #[cfg_attr(not(feature = "compression"), allow(dead_code))]
    deflate_offered: bool,
    deflate: bool,
    partial: Option<Partial>,
    utf8_carry: Vec<u8>,
    close_sent: bool,
    /// Bound on an inflated message.
    #[cfg_attr(not(feature = "compression"), allow(dead_code))]
    max_message_size: Option<usize>,
}

impl WsCodec {
    /// Create a codec for `role`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the random source for mask keys is unavailable.
    pub fn new(role: Role, limits: Limits) -> Result<Self> {
        Ok(Self {
            role,
            limits,
            phase: Phase::Handshake,
            read_buf: BytesMut::with_capacity(4096),
            mask_counter: random_mask_seed()?,
            expected_accept: None,
            deflate_offered: false,
            deflate: false,
            partial: None,
            utf8_carry: Vec::new(),
            close_sent: false,
            max_message_size: None,
        })
    }

    /// Stop inflating a compressed message once it grows past `max` bytes.
    ///
    /// Uncompressed messages are bounded by [`Limits::max_frame_size`] per
    /// frame; assembling them is left to the connection.
    #[must_use]
    pub const fn with_max_message_size(mut self, max: Option<usize>) -> Self {
        self.max_message_size = max;
        self
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Returns `true` if permessage-deflate was negotiated.
    #[must_use]
    pub const fn compression(&self) -> bool {
        self.deflate
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }

    fn encode_frame(&mut self, frame: &Frame) -> Vec<u8> {
        let mask = self.role.must_mask().then(|| self.generate_mask());
        let mut out = Vec::with_capacity(frame.payload.len() + 14);
        frame.encode(mask, &mut out);
        out
    }

    fn encode_message(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>> {
        if self.phase != Phase::Open {
            return Err(Error::Protocol("handshake not complete".into()));
        }
        if self.close_sent {
            return Err(Error::closed(None));
        }

        #[cfg(feature = "compression")]
        if self.deflate {
            let mut frame = Frame::new(true, opcode, deflate::compress(payload)?);
            frame.rsv1 = true;
            return Ok(self.encode_frame(&frame));
        }

        Ok(self.encode_frame(&Frame::new(true, opcode, payload.to_vec())))
    }

    fn encode_control(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!(
                "control frame payload of {} bytes",
                payload.len()
            )));
        }
        Ok(self.encode_frame(&Frame::new(true, opcode, payload.to_vec())))
    }

    fn take_head(&mut self) -> Result<Option<Vec<u8>>> {
        match find_head_end(&self.read_buf) {
            Some(len) => {
                self.limits.check_handshake_size(len)?;
                Ok(Some(self.read_buf.split_to(len).to_vec()))
            }
            None => {
                self.limits.check_handshake_size(self.read_buf.len())?;
                Ok(None)
            }
        }
    }

    fn on_request_head(&mut self, head: &[u8]) -> Result<Event> {
        let request = HandshakeRequest::parse(head)?;
        request.validate()?;
        trace!(path = %request.path, "upgrade request");

        #[cfg(feature = "compression")]
        let deflate_offered = deflate::is_offered(&request.extensions);
        #[cfg(not(feature = "compression"))]
        let deflate_offered = false;

        self.phase = Phase::Pending {
            key: request.key,
            deflate_offered,
        };
        Ok(Event::Request {
            path: request.path,
            subprotocols: request.protocols,
            extensions: request.extensions,
        })
    }

    fn on_response_head(&mut self, head: &[u8]) -> Result<Event> {
        let response = HandshakeResponse::parse(head)?;
        if response.status != 101 {
            self.phase = Phase::Done;
            return Ok(Event::Rejected {
                status: response.status,
            });
        }

        if response.accept != self.expected_accept {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match the request key".into(),
            ));
        }

        for extension in &response.extensions {
            let name = extension.split(';').next().unwrap_or_default().trim();
            #[cfg(feature = "compression")]
            if self.deflate_offered && name.eq_ignore_ascii_case(deflate::EXTENSION_NAME) {
                self.deflate = true;
                continue;
            }
            return Err(Error::Extension(format!(
                "server accepted unoffered extension {name}"
            )));
        }

        self.phase = Phase::Open;
        Ok(Event::Accepted {
            subprotocol: response.protocol,
        })
    }

    /// Decode UTF-8 from a text fragment, carrying a split code point over.
    fn decode_text(&mut self, payload: Vec<u8>, fin: bool) -> Result<String> {
        let mut bytes = if self.utf8_carry.is_empty() {
            payload
        } else {
            let mut joined = std::mem::take(&mut self.utf8_carry);
            joined.extend_from_slice(&payload);
            joined
        };

        match std::str::from_utf8(&bytes) {
            Ok(_) => {}
            Err(err) if err.error_len().is_none() && !fin => {
                self.utf8_carry = bytes.split_off(err.valid_up_to());
            }
            Err(_) => return Err(Error::InvalidUtf8),
        }
        String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    fn on_frame(&mut self, frame: Frame) -> Result<Option<Event>> {
        if frame.rsv1
            && (!self.deflate || frame.opcode.is_control() || frame.opcode == OpCode::Continuation)
        {
            return Err(Error::Protocol("unexpected RSV1".into()));
        }

        match frame.opcode {
            OpCode::Ping => Ok(Some(Event::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Event::Pong(frame.payload))),
            OpCode::Close => {
                let close = Frame::close_payload(&frame.payload)?;
                Ok(Some(Event::Close(close)))
            }
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return Err(Error::Protocol(
                        "new message before previous one finished".into(),
                    ));
                }
                let partial = Partial {
                    text: frame.opcode == OpCode::Text,
                    deflated: frame.rsv1.then(Vec::new),
                };
                self.on_data(partial, frame.payload, frame.fin)
            }
            OpCode::Continuation => match self.partial.take() {
                Some(partial) => self.on_data(partial, frame.payload, frame.fin),
                None => Err(Error::Protocol("continuation without a message".into())),
            },
        }
    }

    fn on_data(
        &mut self,
        mut partial: Partial,
        payload: Vec<u8>,
        fin: bool,
    ) -> Result<Option<Event>> {
        let payload = match partial.deflated.as_mut() {
            Some(collected) => {
                collected.extend_from_slice(&payload);
                self.limits.check_frame_size(collected.len())?;
                if !fin {
                    self.partial = Some(partial);
                    return Ok(None);
                }
                inflate(collected, self.max_message_size)?
            }
            None => payload,
        };

        let event = if partial.text {
            Event::Text {
                data: self.decode_text(payload, fin)?,
                fin,
            }
        } else {
            Event::Binary { data: payload, fin }
        };
        if !fin {
            self.partial = Some(partial);
        }
        Ok(Some(event))
    }
}

#[cfg(feature = "compression")]
fn inflate(data: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
    deflate::decompress(data, limit)
}

#[cfg(not(feature = "compression"))]
fn inflate(_data: &[u8], _limit: Option<usize>) -> Result<Vec<u8>> {
    Err(Error::Extension("compressed message without permessage-deflate".into()))
}

impl Codec for WsCodec {
    fn role(&self) -> Role {
        self.role
    }

    fn feed(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.phase {
                Phase::Handshake => {
                    let Some(head) = self.take_head()? else {
                        return Ok(None);
                    };
                    return match self.role {
                        Role::Server => self.on_request_head(&head).map(Some),
                        Role::Client => self.on_response_head(&head).map(Some),
                    };
                }
                Phase::Pending { .. } | Phase::Done => return Ok(None),
                Phase::Open => {}
            }

            let Some(parsed) = Frame::parse(&self.read_buf, self.limits.max_frame_size)? else {
                return Ok(None);
            };
            self.read_buf.advance(parsed.len);

            if parsed.masked != self.role.expects_masked() {
                return Err(Error::Protocol(if parsed.masked {
                    "masked frame from server".into()
                } else {
                    "unmasked frame from client".into()
                }));
            }

            if let Some(event) = self.on_frame(parsed.frame)? {
                return Ok(Some(event));
            }
        }
    }

    fn encode(&mut self, outgoing: Outgoing<'_>) -> Result<Vec<u8>> {
        match outgoing {
            Outgoing::Request(request) => {
                if self.role != Role::Client || self.phase != Phase::Handshake {
                    return Err(Error::Protocol("unexpected upgrade request".into()));
                }
                self.expected_accept = Some(compute_accept_key(&request.key));
                #[cfg(feature = "compression")]
                {
                    self.deflate_offered = deflate::is_offered(&request.extensions);
                }
                let mut out = Vec::new();
                request.write(&mut out);
                Ok(out)
            }
            Outgoing::Accept {
                subprotocol,
                compress,
            } => {
                let Phase::Pending {
                    key,
                    deflate_offered,
                } = std::mem::replace(&mut self.phase, Phase::Open)
                else {
                    return Err(Error::Protocol("no upgrade request to accept".into()));
                };
                self.deflate = compress && deflate_offered;

                #[cfg(feature = "compression")]
                let extensions = if self.deflate {
                    vec![deflate::NEGOTIATED.to_owned()]
                } else {
                    Vec::new()
                };
                #[cfg(not(feature = "compression"))]
                let extensions = Vec::new();

                let response = HandshakeResponse {
                    status: 101,
                    accept: Some(compute_accept_key(&key)),
                    protocol: subprotocol.map(str::to_owned),
                    extensions,
                };
                let mut out = Vec::new();
                response.write(&mut out);
                Ok(out)
            }
            Outgoing::Reject { status } => {
                if !matches!(self.phase, Phase::Pending { .. } | Phase::Handshake) {
                    return Err(Error::Protocol("connection already upgraded".into()));
                }
                self.phase = Phase::Done;
                let mut out = Vec::new();
                HandshakeResponse::reject(status).write(&mut out);
                Ok(out)
            }
            Outgoing::Text(text) => self.encode_message(OpCode::Text, text.as_bytes()),
            Outgoing::Binary(data) => self.encode_message(OpCode::Binary, data),
            Outgoing::Ping(payload) => self.encode_control(OpCode::Ping, payload),
            Outgoing::Pong(payload) => self.encode_control(OpCode::Pong, payload),
            Outgoing::Close(_) if self.close_sent => Ok(Vec::new()),
            Outgoing::Close(close) => {
                self.close_sent = true;
                // 1005 and friends never go on the wire; send an empty payload instead.
                let close = close.filter(|frame| !frame.code.is_reserved());
                Ok(self.encode_frame(&Frame::close(close)))
            }
        }
    }
}
