//! Protocol codec contract.
//!
//! A codec turns inbound bytes into [`Event`]s and outgoing actions into
//! bytes. It does no I/O of its own, so the same codec serves the blocking
//! and the async connection engines.

mod ws;

pub use ws::WsCodec;

use crate::connection::Role;
use crate::error::Result;
use crate::message::CloseFrame;
use crate::protocol::HandshakeRequest;

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A client asked to upgrade (server side).
    Request {
        /// Request target.
        path: String,
        /// Subprotocols offered by the client, in order of preference.
        subprotocols: Vec<String>,
        /// Extensions offered by the client.
        extensions: Vec<String>,
    },
    /// The server accepted the upgrade (client side).
    Accepted {
        /// Subprotocol selected by the server.
        subprotocol: Option<String>,
    },
    /// The server answered the upgrade with a non-101 status (client side).
    Rejected {
        /// HTTP status code.
        status: u16,
    },
    /// Ping with its payload.
    Ping(Vec<u8>),
    /// Pong with its payload.
    Pong(Vec<u8>),
    /// The peer started or answered a close handshake.
    Close(CloseFrame),
    /// A piece of a text message.
    Text {
        /// Decoded characters carried by this fragment.
        data: String,
        /// Last fragment of the message.
        fin: bool,
    },
    /// A piece of a binary message.
    Binary {
        /// Bytes carried by this fragment.
        data: Vec<u8>,
        /// Last fragment of the message.
        fin: bool,
    },
}

/// Something to put on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Outgoing<'a> {
    /// Client upgrade request.
    Request(&'a HandshakeRequest),
    /// Accept the pending upgrade request (server side).
    Accept {
        /// Subprotocol to confirm.
        subprotocol: Option<&'a str>,
        /// Enable permessage-deflate if the client offered it.
        compress: bool,
    },
    /// Refuse the pending upgrade request with an HTTP status (server side).
    Reject {
        /// HTTP status code.
        status: u16,
    },
    /// Complete text message.
    Text(&'a str),
    /// Complete binary message.
    Binary(&'a [u8]),
    /// Ping with payload.
    Ping(&'a [u8]),
    /// Pong with payload.
    Pong(&'a [u8]),
    /// Close frame; `None` sends an empty payload.
    Close(Option<&'a CloseFrame>),
}

/// Sans-io WebSocket protocol state machine.
pub trait Codec: Send {
    /// Role this codec speaks for.
    fn role(&self) -> Role;

    /// Append inbound bytes.
    fn feed(&mut self, data: &[u8]);

    /// Decode the next event from the bytes fed so far.
    ///
    /// Returns `Ok(None)` once more input is needed.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the connection: the peer violated the protocol
    /// or a configured limit.
    fn next_event(&mut self) -> Result<Option<Event>>;

    /// Serialize an outgoing action.
    ///
    /// # Errors
    ///
    /// Fails if the action is not valid in the current state, for example a
    /// message before the handshake or an oversized control payload.
    fn encode(&mut self, outgoing: Outgoing<'_>) -> Result<Vec<u8>>;

    /// Iterate over the events currently decodable.
    fn events(&mut self) -> Events<'_, Self>
    where
        Self: Sized,
    {
        Events { codec: self }
    }
}

/// Iterator returned by [`Codec::events`].
#[derive(Debug)]
pub struct Events<'a, C> {
    codec: &'a mut C,
}

impl<C: Codec> Iterator for Events<'_, C> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.codec.next_event().transpose()
    }
}
