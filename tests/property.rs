//! Property-based tests for the codec and message delivery.

mod common;

use proptest::prelude::*;
use simple_websocket::protocol::{Frame, HandshakeRequest, OpCode, apply_mask, select_subprotocol};
use simple_websocket::{Codec, Event, Limits, Outgoing, Role, WsCodec};

/// Codecs of both roles past the opening handshake.
fn open_pair() -> (WsCodec, WsCodec) {
    let mut client = WsCodec::new(Role::Client, Limits::default()).unwrap();
    let mut server = WsCodec::new(Role::Server, Limits::default()).unwrap();
    let request = client
        .encode(Outgoing::Request(&common::upgrade_request(&[])))
        .unwrap();
    server.feed(&request);
    assert!(matches!(server.next_event().unwrap(), Some(Event::Request { .. })));
    let response = server
        .encode(Outgoing::Accept {
            subprotocol: None,
            compress: false,
        })
        .unwrap();
    client.feed(&response);
    assert!(matches!(client.next_event().unwrap(), Some(Event::Accepted { .. })));
    (client, server)
}

fn message_strategy() -> impl Strategy<Value = (bool, Vec<u8>)> {
    prop_oneof![
        ".{0,64}".prop_map(|text: String| (true, text.into_bytes())),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(|data| (false, data)),
    ]
}

/// Join the data events of `events` back into whole messages.
fn reassemble(events: Vec<Event>) -> Vec<(bool, Vec<u8>)> {
    let mut messages = Vec::new();
    let mut partial: Option<(bool, Vec<u8>)> = None;
    for event in events {
        let (is_text, data, fin) = match event {
            Event::Text { data, fin } => (true, data.into_bytes(), fin),
            Event::Binary { data, fin } => (false, data, fin),
            other => panic!("unexpected event {other:?}"),
        };
        let entry = partial.get_or_insert_with(|| (is_text, Vec::new()));
        assert_eq!(entry.0, is_text);
        entry.1.extend_from_slice(&data);
        if fin {
            messages.extend(partial.take());
        }
    }
    assert!(partial.is_none());
    messages
}

proptest! {
    #[test]
    fn test_frame_parse_after_encode(
        fin in any::<bool>(),
        binary in any::<bool>(),
        mask in prop::option::of(any::<[u8; 4]>()),
        payload in prop::collection::vec(any::<u8>(), 0..70_000)
    ) {
        let opcode = if binary { OpCode::Binary } else { OpCode::Text };
        let frame = Frame::new(fin, opcode, payload);
        let mut wire = Vec::new();
        frame.encode(mask, &mut wire);

        let parsed = Frame::parse(&wire, usize::MAX).unwrap().unwrap();
        prop_assert_eq!(parsed.len, wire.len());
        prop_assert_eq!(parsed.masked, mask.is_some());
        prop_assert_eq!(parsed.frame, frame);
    }

    #[test]
    fn test_mask_is_an_involution(
        data in prop::collection::vec(any::<u8>(), 0..512),
        key in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, key);
        apply_mask(&mut masked, key);
        prop_assert_eq!(masked, data);
    }

    #[test]
    fn test_frame_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Frame::parse(&data, 1024);
    }

    #[test]
    fn test_handshake_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = HandshakeRequest::parse(&data);
    }

    /// However the byte stream is chunked, the same messages come out in
    /// the same order with their types intact.
    #[test]
    fn test_chunking_preserves_messages(
        messages in prop::collection::vec(message_strategy(), 1..20),
        chunk in 1usize..97
    ) {
        let (mut client, mut server) = open_pair();
        let mut wire = Vec::new();
        for (is_text, data) in &messages {
            let bytes = if *is_text {
                client.encode(Outgoing::Text(std::str::from_utf8(data).unwrap()))
            } else {
                client.encode(Outgoing::Binary(data))
            };
            wire.extend(bytes.unwrap());
        }

        let mut events = Vec::new();
        for piece in wire.chunks(chunk) {
            server.feed(piece);
            events.extend(server.events().collect::<Result<Vec<_>, _>>().unwrap());
        }
        prop_assert_eq!(reassemble(events), messages);
    }

    /// Text fragmented at arbitrary byte offsets, even inside a code point,
    /// decodes to the same string.
    #[test]
    fn test_text_split_anywhere(
        text in "\\PC{1,40}",
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6)
    ) {
        let (_client, mut server) = open_pair();
        let bytes = text.as_bytes();
        let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(bytes.len())).collect();
        offsets.push(bytes.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut start = 0;
        let mut wire = Vec::new();
        for (i, end) in offsets.iter().copied().enumerate() {
            let opcode = if i == 0 { OpCode::Text } else { OpCode::Continuation };
            let fin = end == bytes.len();
            Frame::new(fin, opcode, bytes[start..end].to_vec())
                .encode(Some(common::MASK), &mut wire);
            start = end;
        }

        server.feed(&wire);
        let events = server.events().collect::<Result<Vec<_>, _>>().unwrap();
        prop_assert_eq!(reassemble(events), vec![(true, text.into_bytes())]);
    }

    #[test]
    fn test_subprotocol_choice(
        offered in prop::collection::vec("[a-d]", 0..5),
        acceptable in prop::collection::vec("[a-d]", 0..5)
    ) {
        let chosen = select_subprotocol(&offered, &acceptable);
        let expected = offered.iter().find(|p| acceptable.contains(p)).cloned();
        prop_assert_eq!(chosen, expected);
    }
}
