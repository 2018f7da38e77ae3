//! Connection engine.
//!
//! A connection owns a transport and a [`Codec`](crate::codec::Codec), runs a
//! background loop that pumps inbound bytes and keepalive deadlines through
//! the codec, and exposes `send`, `receive` and `close` to the application.
//!
//! The event handling and keepalive rules live in sans-io pieces
//! ([`dispatch`], [`keepalive`]) shared by two I/O strategies:
//!
//! - [`blocking::Connection`]: a background thread, a socket read timeout as
//!   the keepalive timer, and a `std::sync::mpsc` inbound queue
//! - [`nonblocking::AsyncConnection`]: a tokio task, `timeout_at` as the
//!   keepalive timer, and a `tokio::sync::mpsc` inbound queue
//!
//! ## Lifecycle
//!
//! 1. **Handshaking** - constructor exchanges the upgrade request/response
//! 2. **Open** - messages flow both ways
//! 3. **Closing** - a close frame was sent or received
//! 4. **Closed** - the background loop exited and the transport is shut down

pub mod blocking;
mod dispatch;
mod keepalive;
#[cfg(feature = "async-tokio")]
pub mod nonblocking;
mod role;
mod state;

pub use blocking::Connection;
#[cfg(feature = "async-tokio")]
pub use nonblocking::AsyncConnection;
pub use role::Role;
pub use state::ConnectionState;

use parking_lot::Mutex;
use std::ops::Add;
use std::time::Duration;

use crate::config::Config;
use crate::message::{CloseCode, CloseFrame, Message};
use dispatch::{Dispatcher, Outcome};
use keepalive::Keepalive;
use state::Status;

fn dispatcher_for(role: Role, config: &Config) -> Dispatcher {
    Dispatcher::new(
        role,
        config.max_message_size,
        config.subprotocols.clone(),
        config.compression,
    )
}

/// Close frame sent by `close`, defaulting to a normal closure.
fn local_close(code: Option<CloseCode>, reason: Option<&str>) -> CloseFrame {
    CloseFrame {
        code: code.unwrap_or(CloseCode::Normal),
        reason: reason.map(str::to_owned),
    }
}

/// Apply the parts of an outcome that do not touch the transport.
///
/// Returns whether the background loop should keep running.
fn settle<I>(
    outcome: Outcome,
    status: &Mutex<Status>,
    keepalive: Option<&mut Keepalive<I>>,
    mut deliver: impl FnMut(Message),
) -> bool
where
    I: Copy + Add<Duration, Output = I>,
{
    if outcome.pong {
        if let Some(keepalive) = keepalive {
            keepalive.on_pong();
        }
    }
    for message in outcome.messages {
        deliver(message);
    }
    if let Some(close) = outcome.close {
        let mut status = status.lock();
        status.record(close);
        status.closing();
    }
    outcome.keep_going
}
