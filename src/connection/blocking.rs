//! Thread-based connection engine.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::dispatch::{Dispatcher, Handshake, Outcome};
use super::keepalive::Keepalive;
use super::state::Status;
use super::{ConnectionState, Role, dispatcher_for, local_close, settle};
use crate::codec::{Codec, Outgoing, WsCodec};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::transport::Socket;

/// Codec plus the write half of the socket. Locked as one so frames from the
/// caller and from the background thread never interleave.
struct Wire<C> {
    codec: C,
    writer: Box<dyn Socket>,
}

struct Shared<C> {
    status: Mutex<Status>,
    wire: Mutex<Wire<C>>,
}

impl<C> Wire<C> {
    /// Run `step` against the codec and write whatever it produced.
    fn exchange(&mut self, step: impl FnOnce(&mut C) -> Outcome) -> (Outcome, io::Result<()>) {
        let outcome = step(&mut self.codec);
        let written = if outcome.out.is_empty() {
            Ok(())
        } else {
            let writer = &mut self.writer;
            writer.write_all(&outcome.out).and_then(|()| writer.flush())
        };
        (outcome, written)
    }
}

impl<C: Codec> Shared<C> {
    fn exchange(&self, step: impl FnOnce(&mut C) -> Outcome) -> (Outcome, io::Result<()>) {
        self.wire.lock().exchange(step)
    }

    fn step(
        &self,
        step: impl FnOnce(&mut C) -> Outcome,
        keepalive: Option<&mut Keepalive<Instant>>,
        inbound: &Sender<Message>,
    ) -> bool {
        let mut wire = self.wire.lock();
        let (outcome, written) = wire.exchange(step);
        // Settled under the wire lock: once a close is framed, `send` sees it.
        let keep_going = settle(outcome, &self.status, keepalive, |message| {
            // The receiver only goes away together with the connection.
            let _ = inbound.send(message);
        });
        drop(wire);
        match written {
            Ok(()) => keep_going,
            Err(err) => {
                debug!(error = %err, "transport write failed");
                false
            }
        }
    }

    /// Read until the codec reports the outcome of the opening handshake.
    fn handshake(
        &self,
        dispatcher: &mut Dispatcher,
        reader: &mut dyn Socket,
        head: Option<Vec<u8>>,
        receive_bytes: usize,
        inbound: &Sender<Message>,
    ) -> Result<(Option<String>, bool)> {
        let mut buf = vec![0u8; receive_bytes];
        let mut head = head;
        loop {
            let (mut outcome, written) = match head.take() {
                Some(head) => self.exchange(|codec| dispatcher.handle(codec, &head)),
                None => {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        debug!("transport closed during handshake");
                        return Err(Error::Connection { status: None });
                    }
                    self.exchange(|codec| dispatcher.handle(codec, &buf[..n]))
                }
            };
            written?;

            match outcome.handshake.take() {
                Some(Handshake::Opened { subprotocol }) => {
                    self.status.lock().state = ConnectionState::Open;
                    let keep_going = settle::<Instant>(outcome, &self.status, None, |message| {
                        let _ = inbound.send(message);
                    });
                    return Ok((subprotocol, keep_going));
                }
                Some(Handshake::Rejected { status }) => {
                    return Err(Error::Connection {
                        status: Some(status),
                    });
                }
                None if !outcome.keep_going => return Err(self.refuse()),
                None => {}
            }
        }
    }

    /// Answer an unusable upgrade request with 400 (server side).
    fn refuse(&self) -> Error {
        let mut wire = self.wire.lock();
        let Wire { codec, writer } = &mut *wire;
        if codec.role() == Role::Client {
            return Error::Connection { status: None };
        }
        if let Ok(bytes) = codec.encode(Outgoing::Reject { status: 400 }) {
            let _ = writer.write_all(&bytes);
        }
        Error::Connection { status: Some(400) }
    }

    fn run(
        &self,
        mut reader: Box<dyn Socket>,
        mut dispatcher: Dispatcher,
        inbound: Sender<Message>,
        mut keepalive: Option<Keepalive<Instant>>,
        receive_bytes: usize,
        mut keep_going: bool,
    ) {
        let mut buf = vec![0u8; receive_bytes];
        while keep_going {
            if let Some(timer) = keepalive.as_mut() {
                let remaining = timer.deadline().saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    let tick = timer.on_deadline();
                    keep_going = self.step(
                        |codec| dispatcher.on_tick(codec, tick),
                        keepalive.as_mut(),
                        &inbound,
                    );
                    continue;
                }
                if let Err(err) = reader.set_read_timeout(Some(remaining)) {
                    debug!(error = %err, "cannot arm keepalive timer");
                    break;
                }
            }

            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("peer closed the transport");
                    break;
                }
                Ok(n) => {
                    keep_going = self.step(
                        |codec| dispatcher.handle(codec, &buf[..n]),
                        keepalive.as_mut(),
                        &inbound,
                    );
                }
                // Read timeout: the keepalive deadline is due.
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(err) => {
                    debug!(error = %err, "transport read failed");
                    break;
                }
            }
        }

        // Closed must be visible before the queue disconnects.
        self.status.lock().state = ConnectionState::Closed;
        let _ = reader.shutdown();
        drop(inbound);
        debug!("background loop exited");
    }
}

/// A WebSocket connection served by a background thread.
///
/// Created by [`Client::connect`](crate::Client::connect) or
/// [`Server::accept`](crate::Server::accept). All methods take `&self`, so a
/// connection can be shared between a sending and a receiving thread.
///
/// Dropping the connection shuts the socket down and joins the background
/// thread. No close frame is sent; call [`close`](Self::close) first for a
/// clean shutdown.
pub struct Connection<C: Codec = WsCodec> {
    role: Role,
    subprotocol: Option<String>,
    shared: Arc<Shared<C>>,
    inbound: Mutex<Receiver<Message>>,
    control: Box<dyn Socket>,
    thread: Option<JoinHandle<()>>,
}

impl<C: Codec + 'static> Connection<C> {
    /// Complete the opening handshake on `socket` and start the background
    /// thread.
    ///
    /// `head` holds bytes a host already read from the socket, typically the
    /// upgrade request. A client must have written its request before
    /// calling this.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the handshake is rejected or fails
    /// - [`Error::Io`] if the socket cannot be cloned or read
    pub fn open(
        socket: Box<dyn Socket>,
        codec: C,
        config: &Config,
        head: Option<Vec<u8>>,
    ) -> Result<Self> {
        let role = codec.role();
        let mut reader = socket;
        let writer = reader.try_clone()?;
        let control = reader.try_clone()?;

        let shared = Arc::new(Shared {
            status: Mutex::new(Status::default()),
            wire: Mutex::new(Wire { codec, writer }),
        });
        let (tx, rx) = mpsc::channel();
        let mut dispatcher = dispatcher_for(role, config);

        let (subprotocol, keep_going) = match shared.handshake(
            &mut dispatcher,
            &mut *reader,
            head,
            config.receive_bytes,
            &tx,
        ) {
            Ok(opened) => opened,
            Err(err) => {
                let _ = control.shutdown();
                return Err(err);
            }
        };
        debug!(%role, ?subprotocol, "connection open");

        let keepalive = config
            .ping_interval
            .map(|interval| Keepalive::new(Instant::now(), interval));
        let receive_bytes = config.receive_bytes;
        let background = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("websocket-{role}"))
            .spawn(move || {
                background.run(reader, dispatcher, tx, keepalive, receive_bytes, keep_going);
            })?;

        Ok(Self {
            role,
            subprotocol,
            shared,
            inbound: Mutex::new(rx),
            control,
            thread: Some(thread),
        })
    }
}

impl<C: Codec> Connection<C> {
    /// Role of this endpoint.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Subprotocol agreed during the handshake.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    /// The close frame that ended the connection, once there is one.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.shared.status.lock().close.clone()
    }

    fn closed_error(&self) -> Error {
        self.shared.status.lock().closed_error()
    }

    /// Send a complete message as a single frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] with the recorded close code once the
    ///   connection is no longer open
    /// - [`Error::Io`] if the write fails while the connection is still open
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.shared.status.lock().ensure_open()?;
        let message = message.into();

        let mut wire = self.shared.wire.lock();
        // The background loop may have closed while this thread waited for the wire.
        self.shared.status.lock().ensure_open()?;
        let Wire { codec, writer } = &mut *wire;
        let encoded = match &message {
            Message::Text(text) => codec.encode(Outgoing::Text(text)),
            Message::Binary(data) => codec.encode(Outgoing::Binary(data)),
        };
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(err) if err.is_closed() => return Err(self.closed_error()),
            Err(err) => return Err(err),
        };
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|err| {
                let status = self.shared.status.lock();
                if status.state.is_open() {
                    Error::from(err)
                } else {
                    status.closed_error()
                }
            })
    }

    /// Wait for the next message.
    ///
    /// `None` waits until a message arrives or the connection closes;
    /// `Some(Duration::ZERO)` only checks what is already queued. Returns
    /// `Ok(None)` when the timeout elapses first. Messages queued before the
    /// connection closed are still returned.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the connection has left the open
    /// state and nothing is queued.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let inbound = self.inbound.lock();
        match inbound.try_recv() {
            Ok(message) => return Ok(Some(message)),
            Err(TryRecvError::Disconnected) => return Err(self.closed_error()),
            Err(TryRecvError::Empty) => {}
        }
        self.shared.status.lock().ensure_open()?;

        match timeout {
            None => inbound.recv().map(Some).map_err(|_| self.closed_error()),
            Some(timeout) if timeout.is_zero() => Ok(None),
            Some(timeout) => match inbound.recv_timeout(timeout) {
                Ok(message) => Ok(Some(message)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
            },
        }
    }

    /// Start the closing handshake.
    ///
    /// Sends a close frame with `code` (default `1000`) and `reason`. Write
    /// failures are ignored since the peer may already be gone. A client
    /// also shuts its socket down; a server waits for the peer to answer.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection is not open, including
    /// when `close` was already called.
    pub fn close(&self, code: Option<CloseCode>, reason: Option<&str>) -> Result<()> {
        let close = local_close(code, reason);
        {
            let mut status = self.shared.status.lock();
            status.ensure_open()?;
            status.record(close.clone());
            status.closing();
        }
        debug!(code = %close.code, "closing connection");

        {
            let mut wire = self.shared.wire.lock();
            let Wire { codec, writer } = &mut *wire;
            match codec.encode(Outgoing::Close(Some(&close))) {
                Ok(bytes) => {
                    if let Err(err) = writer.write_all(&bytes) {
                        debug!(error = %err, "close frame not delivered");
                    }
                }
                Err(err) => debug!(error = %err, "cannot encode close frame"),
            }
        }

        if self.role == Role::Client {
            let _ = self.control.shutdown();
        }
        Ok(())
    }
}

impl<C: Codec> Drop for Connection<C> {
    fn drop(&mut self) {
        let _ = self.control.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("background thread panicked");
            }
        }
    }
}

impl<C: Codec> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("subprotocol", &self.subprotocol)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
