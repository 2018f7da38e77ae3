//! RFC 6455 building blocks used by [`WsCodec`](crate::codec::WsCodec).

#[cfg(feature = "compression")]
pub mod deflate;
pub mod frame;
pub mod handshake;
pub mod opcode;

pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD, apply_mask};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key, select_subprotocol,
};
pub use opcode::OpCode;
