//! Ping/pong keepalive timing.
//!
//! The async tests run on a paused clock, so deadlines are exact and the
//! tests finish instantly.

mod common;

use std::time::Duration;

use simple_websocket::{CloseCode, CloseFrame, Config, Error, Event, Message, Outgoing};

const INTERVAL: Duration = Duration::from_secs(10);

fn timeout_close() -> Event {
    Event::Close(CloseFrame::new(CloseCode::PolicyViolation, "Ping/Pong timeout"))
}

#[cfg(feature = "async-tokio")]
mod paused {
    use super::*;
    use crate::common::AsyncPeer;
    use simple_websocket::{AsyncConnection, Limits, Role, WsCodec};
    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    async fn server_with_peer(config: Config) -> (AsyncConnection, AsyncPeer<DuplexStream>) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let codec = WsCodec::new(Role::Server, Limits::default()).unwrap();
        let (server, (peer, _)) = tokio::join!(
            AsyncConnection::open(near, codec, &config, None),
            AsyncPeer::connect(far, &[]),
        );
        (server.unwrap(), peer)
    }

    fn assert_at(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_secs(1),
            "event at {elapsed:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_times_out() {
        let (server, mut peer) = server_with_peer(Config::new().with_ping_interval(INTERVAL)).await;
        let start = Instant::now();

        assert_eq!(peer.next_event().await, Some(Event::Ping(Vec::new())));
        assert_at(start, INTERVAL);

        assert_eq!(peer.next_event().await, Some(timeout_close()));
        assert_at(start, INTERVAL * 2);

        assert_eq!(
            server.receive(None).await.unwrap_err(),
            Error::ConnectionClosed {
                code: CloseCode::PolicyViolation,
                reason: Some("Ping/Pong timeout".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_pings_keep_connection_open() {
        let (server, mut peer) = server_with_peer(Config::new().with_ping_interval(INTERVAL)).await;
        let start = Instant::now();

        for round in 1..=3 {
            assert_eq!(peer.next_event().await, Some(Event::Ping(Vec::new())));
            assert_at(start, INTERVAL * round);
            peer.send(Outgoing::Pong(&[])).await;
        }

        assert!(server.state().is_open());
        peer.send(Outgoing::Text("still here")).await;
        assert_eq!(
            server.receive(None).await.unwrap(),
            Some(Message::text("still here"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_does_not_move_deadline() {
        let (server, mut peer) = server_with_peer(Config::new().with_ping_interval(INTERVAL)).await;
        let start = Instant::now();

        tokio::time::sleep(INTERVAL / 2).await;
        peer.send(Outgoing::Text("tick")).await;
        assert_eq!(server.receive(None).await.unwrap(), Some(Message::text("tick")));

        assert_eq!(peer.next_event().await, Some(Event::Ping(Vec::new())));
        assert_at(start, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pings_without_interval() {
        let (server, mut peer) = server_with_peer(Config::default()).await;

        let idle = tokio::time::timeout(INTERVAL * 10, peer.next_event()).await;
        assert!(idle.is_err(), "unexpected traffic: {idle:?}");
        assert!(server.state().is_open());
    }
}

mod blocking {
    use super::*;
    use crate::common::Peer;
    use simple_websocket::{Connection, Server};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn server_with_peer(config: Config) -> (Connection, Peer) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Server::accept(stream, &config)
        });
        let (peer, _) = Peer::connect(TcpStream::connect(addr).unwrap(), &[]);
        (server.join().unwrap().unwrap(), peer)
    }

    #[test]
    fn test_unanswered_ping_times_out() {
        let interval = Duration::from_millis(100);
        let (server, mut peer) = server_with_peer(Config::new().with_ping_interval(interval));

        assert_eq!(peer.next_event(), Some(Event::Ping(Vec::new())));
        assert_eq!(peer.next_event(), Some(timeout_close()));
        assert!(matches!(
            server.receive(None),
            Err(Error::ConnectionClosed {
                code: CloseCode::PolicyViolation,
                ..
            })
        ));
    }

    #[test]
    fn test_pong_resets_pending_flag() {
        let interval = Duration::from_millis(100);
        let (server, mut peer) = server_with_peer(Config::new().with_ping_interval(interval));

        for _ in 0..3 {
            assert_eq!(peer.next_event(), Some(Event::Ping(Vec::new())));
            peer.send(Outgoing::Pong(&[]));
        }
        assert!(server.state().is_open());
    }
}
