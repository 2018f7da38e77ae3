//! Task-based connection engine on tokio.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

use super::dispatch::{Dispatcher, Handshake, Outcome};
use super::keepalive::Keepalive;
use super::state::Status;
use super::{ConnectionState, Role, dispatcher_for, local_close, settle};
use crate::codec::{Codec, Outgoing, WsCodec};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Wire<C> {
    codec: C,
    writer: Writer,
}

struct Shared<C> {
    status: Mutex<Status>,
    wire: AsyncMutex<Wire<C>>,
    /// Wakes the background task once a client has sent its close frame.
    stop: Notify,
}

impl<C> Wire<C> {
    async fn exchange(
        &mut self,
        step: impl FnOnce(&mut C) -> Outcome,
    ) -> (Outcome, std::io::Result<()>) {
        let outcome = step(&mut self.codec);
        let written = if outcome.out.is_empty() {
            Ok(())
        } else {
            match self.writer.write_all(&outcome.out).await {
                Ok(()) => self.writer.flush().await,
                Err(err) => Err(err),
            }
        };
        (outcome, written)
    }
}

impl<C: Codec> Shared<C> {
    async fn exchange(
        &self,
        step: impl FnOnce(&mut C) -> Outcome,
    ) -> (Outcome, std::io::Result<()>) {
        self.wire.lock().await.exchange(step).await
    }

    async fn step(
        &self,
        step: impl FnOnce(&mut C) -> Outcome,
        keepalive: Option<&mut Keepalive<Instant>>,
        inbound: &UnboundedSender<Message>,
    ) -> bool {
        let mut wire = self.wire.lock().await;
        let (outcome, written) = wire.exchange(step).await;
        // Settled under the wire lock: once a close is framed, `send` sees it.
        let keep_going = settle(outcome, &self.status, keepalive, |message| {
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

    async fn handshake<R: AsyncRead + Unpin>(
        &self,
        dispatcher: &mut Dispatcher,
        reader: &mut R,
        head: Option<Vec<u8>>,
        receive_bytes: usize,
        inbound: &UnboundedSender<Message>,
    ) -> Result<(Option<String>, bool)> {
        let mut buf = vec![0u8; receive_bytes];
        let mut head = head;
        loop {
            let (mut outcome, written) = match head.take() {
                Some(head) => self.exchange(|codec| dispatcher.handle(codec, &head)).await,
                None => {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        debug!("transport closed during handshake");
                        return Err(Error::Connection { status: None });
                    }
                    self.exchange(|codec| dispatcher.handle(codec, &buf[..n])).await
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
                None if !outcome.keep_going => return Err(self.refuse().await),
                None => {}
            }
        }
    }

    async fn refuse(&self) -> Error {
        let mut wire = self.wire.lock().await;
        let Wire { codec, writer } = &mut *wire;
        if codec.role() == Role::Client {
            return Error::Connection { status: None };
        }
        if let Ok(bytes) = codec.encode(Outgoing::Reject { status: 400 }) {
            let _ = writer.write_all(&bytes).await;
            let _ = writer.shutdown().await;
        }
        Error::Connection { status: Some(400) }
    }

    async fn run<R: AsyncRead + Unpin>(
        self: Arc<Self>,
        mut reader: R,
        mut dispatcher: Dispatcher,
        inbound: UnboundedSender<Message>,
        mut keepalive: Option<Keepalive<Instant>>,
        receive_bytes: usize,
        mut keep_going: bool,
    ) {
        let mut buf = vec![0u8; receive_bytes];
        while keep_going {
            let deadline = keepalive.as_ref().map(Keepalive::deadline);
            let read = tokio::select! {
                () = self.stop.notified() => {
                    debug!("close frame sent, not waiting for the echo");
                    break;
                }
                read = async {
                    match deadline {
                        Some(deadline) => timeout_at(deadline, reader.read(&mut buf)).await.ok(),
                        None => Some(reader.read(&mut buf).await),
                    }
                } => read,
            };

            let Some(read) = read else {
                if let Some(timer) = keepalive.as_mut() {
                    let tick = timer.on_deadline();
                    keep_going = self
                        .step(|codec| dispatcher.on_tick(codec, tick), keepalive.as_mut(), &inbound)
                        .await;
                }
                continue;
            };

            match read {
                Ok(0) => {
                    debug!("peer closed the transport");
                    break;
                }
                Ok(n) => {
                    keep_going = self
                        .step(
                            |codec| dispatcher.handle(codec, &buf[..n]),
                            keepalive.as_mut(),
                            &inbound,
                        )
                        .await;
                }
                Err(err) => {
                    debug!(error = %err, "transport read failed");
                    break;
                }
            }
        }

        self.status.lock().state = ConnectionState::Closed;
        {
            let mut wire = self.wire.lock().await;
            let _ = wire.writer.shutdown().await;
        }
        drop(inbound);
        debug!("background task exited");
    }
}

/// A WebSocket connection served by a tokio task.
///
/// Same behavior as [`Connection`](super::Connection) with async methods.
/// Dropping it aborts the background task and closes the transport.
pub struct AsyncConnection<C: Codec = WsCodec> {
    role: Role,
    subprotocol: Option<String>,
    shared: Arc<Shared<C>>,
    inbound: AsyncMutex<UnboundedReceiver<Message>>,
    task: JoinHandle<()>,
}

impl<C: Codec + 'static> AsyncConnection<C> {
    /// Complete the opening handshake on `stream` and spawn the background
    /// task. Must be called from within a tokio runtime.
    ///
    /// See [`Connection::open`](super::Connection::open) for `head` and the
    /// client's obligations.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the handshake is rejected or fails
    /// - [`Error::Io`] if the transport fails during the handshake
    pub async fn open<S>(
        stream: S,
        codec: C,
        config: &Config,
        head: Option<Vec<u8>>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let role = codec.role();
        let (mut reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            status: Mutex::new(Status::default()),
            wire: AsyncMutex::new(Wire {
                codec,
                writer: Box::new(writer),
            }),
            stop: Notify::new(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = dispatcher_for(role, config);

        let (subprotocol, keep_going) = shared
            .handshake(&mut dispatcher, &mut reader, head, config.receive_bytes, &tx)
            .await?;
        debug!(%role, ?subprotocol, "connection open");

        let keepalive = config
            .ping_interval
            .map(|interval| Keepalive::new(Instant::now(), interval));
        let task = tokio::spawn(Arc::clone(&shared).run(
            reader,
            dispatcher,
            tx,
            keepalive,
            config.receive_bytes,
            keep_going,
        ));

        Ok(Self {
            role,
            subprotocol,
            shared,
            inbound: AsyncMutex::new(rx),
            task,
        })
    }
}

impl<C: Codec> AsyncConnection<C> {
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
    /// [`Error::ConnectionClosed`] once the connection is no longer open,
    /// [`Error::Io`] if the write fails while it still is.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.shared.status.lock().ensure_open()?;
        let message = message.into();

        let mut wire = self.shared.wire.lock().await;
        // The background task may have closed while this call waited for the wire.
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
        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        written.map_err(|err| {
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
    /// Same timeout rules as [`Connection::receive`](super::Connection::receive).
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the connection has left the open
    /// state and nothing is queued.
    pub async fn receive(&self, timeout_after: Option<Duration>) -> Result<Option<Message>> {
        let mut inbound = self.inbound.lock().await;
        match inbound.try_recv() {
            Ok(message) => return Ok(Some(message)),
            Err(TryRecvError::Disconnected) => return Err(self.closed_error()),
            Err(TryRecvError::Empty) => {}
        }
        self.shared.status.lock().ensure_open()?;

        match timeout_after {
            None => inbound.recv().await.map(Some).ok_or_else(|| self.closed_error()),
            Some(duration) if duration.is_zero() => Ok(None),
            Some(duration) => match timeout(duration, inbound.recv()).await {
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(self.closed_error()),
                Err(_elapsed) => Ok(None),
            },
        }
    }

    /// Start the closing handshake.
    ///
    /// Same rules as [`Connection::close`](super::Connection::close).
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection is not open.
    pub async fn close(&self, code: Option<CloseCode>, reason: Option<&str>) -> Result<()> {
        let close = local_close(code, reason);
        {
            let mut status = self.shared.status.lock();
            status.ensure_open()?;
            status.record(close.clone());
            status.closing();
        }
        debug!(code = %close.code, "closing connection");

        let mut wire = self.shared.wire.lock().await;
        let Wire { codec, writer } = &mut *wire;
        match codec.encode(Outgoing::Close(Some(&close))) {
            Ok(bytes) => {
                if let Err(err) = writer.write_all(&bytes).await {
                    debug!(error = %err, "close frame not delivered");
                }
            }
            Err(err) => debug!(error = %err, "cannot encode close frame"),
        }
        if self.role == Role::Client {
            let _ = writer.shutdown().await;
            self.shared.stop.notify_one();
        }
        Ok(())
    }
}

impl<C: Codec> Drop for AsyncConnection<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<C: Codec> std::fmt::Debug for AsyncConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("role", &self.role)
            .field("subprotocol", &self.subprotocol)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
