//! Event handling shared by the blocking and async engines.
//!
//! [`Dispatcher`] owns the fragment accumulator and turns codec events into
//! an [`Outcome`]: bytes to write, completed messages, and whether the
//! background loop should keep running. It performs no I/O.

use tracing::{debug, trace, warn};

use super::Role;
use super::keepalive::Tick;
use crate::codec::{Codec, Event, Outgoing};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::select_subprotocol;

/// Result of the opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Handshake {
    Opened { subprotocol: Option<String> },
    Rejected { status: u16 },
}

/// Everything produced by one batch of events.
#[derive(Debug)]
pub(crate) struct Outcome {
    /// Bytes to write in one go.
    pub(crate) out: Vec<u8>,
    /// Completed messages, oldest first.
    pub(crate) messages: Vec<Message>,
    /// Close frame received from the peer or sent by the loop.
    pub(crate) close: Option<CloseFrame>,
    /// A pong arrived.
    pub(crate) pong: bool,
    pub(crate) handshake: Option<Handshake>,
    pub(crate) keep_going: bool,
}

impl Outcome {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            messages: Vec::new(),
            close: None,
            pong: false,
            handshake: None,
            keep_going: true,
        }
    }

    /// Drop pending output and stop the loop after a protocol error.
    fn abort(mut self, err: &Error) -> Self {
        debug!(error = %err, "protocol error, dropping connection");
        self.out.clear();
        self.keep_going = false;
        self
    }

    /// Send `close` and stop the loop.
    fn close_with<C: Codec>(&mut self, codec: &mut C, close: CloseFrame) -> Result<()> {
        self.out.extend(codec.encode(Outgoing::Close(Some(&close)))?);
        self.close = Some(close);
        self.keep_going = false;
        Ok(())
    }
}

/// Per-connection event handler.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    role: Role,
    max_message_size: Option<usize>,
    /// Subprotocols a server accepts.
    subprotocols: Vec<String>,
    compression: bool,
    /// Fragments of the message in progress.
    partial: Option<Message>,
}

impl Dispatcher {
    pub(crate) fn new(
        role: Role,
        max_message_size: Option<usize>,
        subprotocols: Vec<String>,
        compression: bool,
    ) -> Self {
        Self {
            role,
            max_message_size,
            subprotocols,
            compression,
            partial: None,
        }
    }

    /// Feed inbound bytes and handle every event they complete.
    pub(crate) fn handle<C: Codec>(&mut self, codec: &mut C, data: &[u8]) -> Outcome {
        codec.feed(data);
        let mut outcome = Outcome::new();
        while outcome.keep_going {
            let event = match codec.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(Error::MessageTooBig { size, max }) => {
                    self.partial = None;
                    if let Err(err) = Self::too_big(codec, size, max, &mut outcome) {
                        return outcome.abort(&err);
                    }
                    break;
                }
                Err(err) => return outcome.abort(&err),
            };
            if let Err(err) = self.on_event(codec, event, &mut outcome) {
                return outcome.abort(&err);
            }
        }
        outcome
    }

    /// React to the keepalive deadline.
    pub(crate) fn on_tick<C: Codec>(&mut self, codec: &mut C, tick: Tick) -> Outcome {
        let mut outcome = Outcome::new();
        let result = match tick {
            Tick::Ping => {
                trace!("sending keepalive ping");
                codec
                    .encode(Outgoing::Ping(&[]))
                    .map(|bytes| outcome.out = bytes)
            }
            Tick::TimedOut => {
                warn!("no pong received, closing connection");
                outcome.close_with(
                    codec,
                    CloseFrame::new(CloseCode::PolicyViolation, "Ping/Pong timeout"),
                )
            }
        };
        match result {
            Ok(()) => outcome,
            Err(err) => outcome.abort(&err),
        }
    }

    fn on_event<C: Codec>(
        &mut self,
        codec: &mut C,
        event: Event,
        outcome: &mut Outcome,
    ) -> Result<()> {
        match event {
            Event::Request { subprotocols, .. } => {
                let subprotocol = select_subprotocol(&subprotocols, &self.subprotocols);
                outcome.out.extend(codec.encode(Outgoing::Accept {
                    subprotocol: subprotocol.as_deref(),
                    compress: self.compression,
                })?);
                debug!(?subprotocol, "accepted upgrade request");
                outcome.handshake = Some(Handshake::Opened { subprotocol });
            }
            Event::Accepted { subprotocol } => {
                debug!(?subprotocol, "upgrade accepted by server");
                outcome.handshake = Some(Handshake::Opened { subprotocol });
            }
            Event::Rejected { status } => {
                debug!(status, "upgrade rejected by server");
                outcome.handshake = Some(Handshake::Rejected { status });
                outcome.keep_going = false;
            }
            Event::Close(close) => {
                debug!(code = %close.code, reason = ?close.reason, "close frame received");
                if self.role.echoes_close() {
                    outcome.out.extend(codec.encode(Outgoing::Close(Some(&close)))?);
                }
                outcome.close = Some(close);
                outcome.keep_going = false;
            }
            Event::Ping(payload) => {
                trace!(len = payload.len(), "ping received");
                outcome.out.extend(codec.encode(Outgoing::Pong(&payload))?);
            }
            Event::Pong(_) => {
                trace!("pong received");
                outcome.pong = true;
            }
            Event::Text { data, fin } => {
                self.on_fragment(codec, Message::Text(data), fin, outcome)?;
            }
            Event::Binary { data, fin } => {
                self.on_fragment(codec, Message::Binary(data), fin, outcome)?;
            }
        }
        Ok(())
    }

    fn too_big<C: Codec>(
        codec: &mut C,
        size: usize,
        max: usize,
        outcome: &mut Outcome,
    ) -> Result<()> {
        debug!(size, max, "incoming message too big");
        outcome.close_with(
            codec,
            CloseFrame::new(CloseCode::MessageTooBig, "Message is too big"),
        )
    }

    fn on_fragment<C: Codec>(
        &mut self,
        codec: &mut C,
        fragment: Message,
        fin: bool,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let message = match (self.partial.take(), fragment) {
            (None, fragment) => fragment,
            (Some(Message::Text(mut text)), Message::Text(more)) => {
                text.push_str(&more);
                Message::Text(text)
            }
            (Some(Message::Binary(mut data)), Message::Binary(more)) => {
                data.extend_from_slice(&more);
                Message::Binary(data)
            }
            _ => return Err(Error::Protocol("fragment type changed mid-message".into())),
        };

        if let Some(max) = self.max_message_size {
            if message.len() > max {
                return Self::too_big(codec, message.len(), max, outcome);
            }
        }

        if fin {
            outcome.messages.push(message);
        } else {
            self.partial = Some(message);
        }
        Ok(())
    }
}
