//! Hand-driven WebSocket peers for exercising the connection engines.
//!
//! A peer speaks the protocol through a bare [`WsCodec`] so tests can send
//! frames the engines never produce themselves (fragments, raw pings, early
//! closes) and observe exactly what comes back.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use simple_websocket::protocol::handshake::generate_key;
use simple_websocket::protocol::{Frame, HandshakeRequest};
use simple_websocket::{Codec, Event, Limits, Outgoing, Role, WsCodec};

pub const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

/// Route library logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn upgrade_request(protocols: &[&str]) -> HandshakeRequest {
    HandshakeRequest {
        path: "/".into(),
        host: "localhost".into(),
        key: generate_key().unwrap(),
        version: 13,
        protocols: protocols.iter().map(|p| (*p).to_owned()).collect(),
        extensions: Vec::new(),
        headers: Vec::new(),
    }
}

/// Blocking peer over a TCP stream.
pub struct Peer {
    pub stream: TcpStream,
    pub codec: WsCodec,
}

impl Peer {
    fn new(stream: TcpStream, role: Role) -> Self {
        init_tracing();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            codec: WsCodec::new(role, Limits::default()).unwrap(),
        }
    }

    /// Client peer that sends an upgrade request and waits for the answer.
    pub fn connect(stream: TcpStream, protocols: &[&str]) -> (Self, Event) {
        let mut peer = Self::new(stream, Role::Client);
        peer.send(Outgoing::Request(&upgrade_request(protocols)));
        let answer = peer.next_event().expect("handshake answer");
        (peer, answer)
    }

    /// Server peer that accepts the next upgrade request.
    pub fn accept(stream: TcpStream, subprotocol: Option<&str>) -> Self {
        let mut peer = Self::new(stream, Role::Server);
        match peer.next_event() {
            Some(Event::Request { .. }) => {}
            other => panic!("expected upgrade request, got {other:?}"),
        }
        peer.send(Outgoing::Accept {
            subprotocol,
            compress: false,
        });
        peer
    }

    pub fn send(&mut self, outgoing: Outgoing<'_>) {
        let bytes = self.codec.encode(outgoing).unwrap();
        self.stream.write_all(&bytes).unwrap();
    }

    /// Write a frame as is, masked when this peer is a client.
    pub fn write_frame(&mut self, frame: &Frame) {
        let mask = (self.codec.role() == Role::Client).then_some(MASK);
        let mut out = Vec::new();
        frame.encode(mask, &mut out);
        self.stream.write_all(&out).unwrap();
    }

    /// Next decoded event; `None` once the other side closed the stream.
    pub fn next_event(&mut self) -> Option<Event> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(event) = self.codec.next_event().unwrap() {
                return Some(event);
            }
            match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.codec.feed(&buf[..n]),
            }
        }
    }
}

/// Async peer over any tokio stream.
pub struct AsyncPeer<S> {
    pub stream: S,
    pub codec: WsCodec,
}

impl<S> AsyncPeer<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn new(stream: S, role: Role) -> Self {
        init_tracing();
        Self {
            stream,
            codec: WsCodec::new(role, Limits::default()).unwrap(),
        }
    }

    pub async fn accept(stream: S, subprotocol: Option<&str>) -> Self {
        let mut peer = Self::new(stream, Role::Server);
        match peer.next_event().await {
            Some(Event::Request { .. }) => {}
            other => panic!("expected upgrade request, got {other:?}"),
        }
        peer.send(Outgoing::Accept {
            subprotocol,
            compress: false,
        })
        .await;
        peer
    }

    pub async fn connect(stream: S, protocols: &[&str]) -> (Self, Event) {
        let mut peer = Self::new(stream, Role::Client);
        peer.send(Outgoing::Request(&upgrade_request(protocols))).await;
        let answer = peer.next_event().await.expect("handshake answer");
        (peer, answer)
    }

    pub async fn send(&mut self, outgoing: Outgoing<'_>) {
        use tokio::io::AsyncWriteExt;
        let bytes = self.codec.encode(outgoing).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn write_frame(&mut self, frame: &Frame) {
        use tokio::io::AsyncWriteExt;
        let mask = (self.codec.role() == Role::Client).then_some(MASK);
        let mut out = Vec::new();
        frame.encode(mask, &mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 4096];
        loop {
            if let Some(event) = self.codec.next_event().unwrap() {
                return Some(event);
            }
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.codec.feed(&buf[..n]),
            }
        }
    }
}
