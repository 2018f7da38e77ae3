//! End-to-end tests for the tokio engine.

#![cfg(feature = "async-tokio")]

mod common;

use std::time::Duration;

use common::AsyncPeer;
use simple_websocket::protocol::{Frame, OpCode};
use simple_websocket::{
    AsyncClient, AsyncConnection, AsyncServer, CloseCode, CloseFrame, Config, ConnectionState,
    Error, Event, Limits, Message, Outgoing, Role, WsCodec,
};
use tokio::io::DuplexStream;
use tokio::net::TcpListener;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Server engine over an in-memory pipe, plus a raw client peer.
async fn server_with_peer(config: Config) -> (AsyncConnection, AsyncPeer<DuplexStream>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let codec = WsCodec::new(Role::Server, Limits::default()).unwrap();
    let (server, (peer, answer)) = tokio::join!(
        AsyncConnection::open(near, codec, &config, None),
        AsyncPeer::connect(far, &[]),
    );
    assert!(matches!(answer, Event::Accepted { .. }));
    (server.unwrap(), peer)
}

async fn wait_for_state(conn: &AsyncConnection, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while conn.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_echo_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/echo", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = AsyncServer::accept(stream, &Config::new().with_subprotocols(["echo"]))
            .await
            .unwrap();
        while let Ok(Some(message)) = ws.receive(None).await {
            ws.send(message).await.unwrap();
        }
        ws.close_frame()
    });

    let ws = AsyncClient::connect(&url, &Config::new().with_subprotocols(["x", "echo"]))
        .await
        .unwrap();
    assert_eq!(ws.subprotocol(), Some("echo"));

    for i in 0..10u8 {
        if i % 2 == 0 {
            ws.send(format!("text {i}")).await.unwrap();
        } else {
            ws.send(vec![i; usize::from(i)]).await.unwrap();
        }
    }
    for i in 0..10u8 {
        let expected = if i % 2 == 0 {
            Message::text(format!("text {i}"))
        } else {
            Message::binary(vec![i; usize::from(i)])
        };
        assert_eq!(ws.receive(WAIT).await.unwrap(), Some(expected));
    }

    ws.close(Some(CloseCode::GoingAway), Some("done")).await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        Some(CloseFrame::new(CloseCode::GoingAway, "done"))
    );
}

#[tokio::test]
async fn test_fragments_reassembled() {
    let (server, mut peer) = server_with_peer(Config::default()).await;

    peer.write_frame(&Frame::new(false, OpCode::Text, b"hel".to_vec()))
        .await;
    peer.write_frame(&Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
        .await;

    assert_eq!(server.receive(WAIT).await.unwrap(), Some(Message::text("hello")));
    assert_eq!(server.receive(Some(Duration::ZERO)).await.unwrap(), None);
}

#[tokio::test]
async fn test_message_too_big() {
    let (server, mut peer) = server_with_peer(Config::new().with_max_message_size(5)).await;

    peer.write_frame(&Frame::new(false, OpCode::Text, b"abc".to_vec()))
        .await;
    peer.write_frame(&Frame::new(true, OpCode::Continuation, b"def".to_vec()))
        .await;

    assert_eq!(
        peer.next_event().await,
        Some(Event::Close(CloseFrame::new(
            CloseCode::MessageTooBig,
            "Message is too big"
        )))
    );
    assert!(matches!(
        server.receive(WAIT).await,
        Err(Error::ConnectionClosed {
            code: CloseCode::MessageTooBig,
            ..
        })
    ));
}

#[tokio::test]
async fn test_ping_answered() {
    let (_server, mut peer) = server_with_peer(Config::default()).await;
    peer.send(Outgoing::Ping(b"hey")).await;
    assert_eq!(peer.next_event().await, Some(Event::Pong(b"hey".to_vec())));
}

#[tokio::test]
async fn test_peer_close_echoed() {
    let (server, mut peer) = server_with_peer(Config::default()).await;

    let close = CloseFrame::new(CloseCode::Normal, "bye");
    peer.send(Outgoing::Close(Some(&close))).await;

    assert_eq!(peer.next_event().await, Some(Event::Close(close)));
    wait_for_state(&server, ConnectionState::Closed).await;
    assert_eq!(
        server.send("late").await.unwrap_err(),
        Error::ConnectionClosed {
            code: CloseCode::Normal,
            reason: Some("bye".into()),
        }
    );
}

#[tokio::test]
async fn test_close_twice_fails() {
    let (server, mut peer) = server_with_peer(Config::default()).await;

    server.close(None, None).await.unwrap();
    assert_eq!(server.state(), ConnectionState::Closing);
    assert_eq!(
        peer.next_event().await,
        Some(Event::Close(CloseFrame::code(CloseCode::Normal)))
    );

    let err = server.close(None, None).await.unwrap_err();
    assert_eq!(
        err,
        Error::ConnectionClosed {
            code: CloseCode::Normal,
            reason: None,
        }
    );
    assert!(server.receive(None).await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_receive_timeout_returns_none() {
    let (server, _peer) = server_with_peer(Config::default()).await;
    assert_eq!(server.receive(Some(Duration::ZERO)).await.unwrap(), None);
    assert_eq!(
        server.receive(Some(Duration::from_millis(20))).await.unwrap(),
        None
    );
    assert!(server.state().is_open());
}

#[tokio::test]
async fn test_peer_disconnect_wakes_receiver() {
    let (server, peer) = server_with_peer(Config::default()).await;

    let waiter = async { server.receive(None).await };
    let dropper = async move { drop(peer) };
    let (result, ()) = tokio::join!(waiter, dropper);

    assert_eq!(
        result.unwrap_err(),
        Error::ConnectionClosed {
            code: CloseCode::NoStatusReceived,
            reason: None,
        }
    );
    wait_for_state(&server, ConnectionState::Closed).await;
}

/// Client engine over an in-memory pipe, plus a raw server peer that
/// accepts the `chat` subprotocol.
async fn client_with_peer() -> (AsyncConnection, AsyncPeer<DuplexStream>) {
    use simple_websocket::Codec;
    use tokio::io::AsyncWriteExt;

    let (mut near, far) = tokio::io::duplex(64 * 1024);
    let mut codec = WsCodec::new(Role::Client, Limits::default()).unwrap();
    let request = common::upgrade_request(&["chat"]);
    let bytes = codec.encode(Outgoing::Request(&request)).unwrap();
    near.write_all(&bytes).await.unwrap();

    let config = Config::default();
    let (client, peer) = tokio::join!(
        AsyncConnection::open(near, codec, &config, None),
        AsyncPeer::accept(far, Some("chat")),
    );
    (client.unwrap(), peer)
}

#[tokio::test]
async fn test_client_engine_over_pipe() {
    let (client, mut peer) = client_with_peer().await;
    assert_eq!(client.subprotocol(), Some("chat"));

    client.send(vec![1u8, 2, 3]).await.unwrap();
    assert_eq!(
        peer.next_event().await,
        Some(Event::Binary {
            data: vec![1, 2, 3],
            fin: true
        })
    );

    peer.send(Outgoing::Close(Some(&CloseFrame::new(CloseCode::Normal, "x"))))
        .await;
    assert!(client.receive(WAIT).await.unwrap_err().is_closed());
    // Clients never echo.
    assert_eq!(peer.next_event().await, None);
}

#[tokio::test]
async fn test_client_close_does_not_wait_for_echo() {
    let (client, mut peer) = client_with_peer().await;
    client.close(None, None).await.unwrap();

    // The peer reads the close frame but never answers it.
    assert_eq!(
        peer.next_event().await,
        Some(Event::Close(CloseFrame::code(CloseCode::Normal)))
    );
    wait_for_state(&client, ConnectionState::Closed).await;
    assert_eq!(client.close_frame(), Some(CloseFrame::code(CloseCode::Normal)));
    assert!(client.send("late").await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_rejected_upgrade() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n")
            .await
            .unwrap();
    });

    let err = AsyncClient::connect(&url, &Config::default()).await.unwrap_err();
    assert_eq!(err, Error::Connection { status: Some(401) });
}

#[tokio::test]
async fn test_drop_aborts_background_task() {
    let (server, mut peer) = server_with_peer(Config::default()).await;
    drop(server);
    assert_eq!(peer.next_event().await, None);
}
