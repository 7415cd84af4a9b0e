//! Wire protocol shared by every FlyAgain service.
//!
//! ## Module Structure
//! - `frame` - Length-prefixed TCP framing and the tokio codec
//! - `opcode` - The canonical opcode table
//! - `messages` - Protobuf payload definitions (gateway + DataService RPC)
//! - `udp` - Authenticated UDP datagram layout for world movement

pub mod frame;
pub mod messages;
pub mod opcode;
pub mod udp;

pub use frame::{Frame, FrameCodec, FrameError, FrameEvent, MAX_FRAME_SIZE};
pub use opcode::Opcode;

use prost::Message;

/// Encode a protobuf payload into a frame for the given opcode.
pub fn encode_frame<M: Message>(opcode: Opcode, msg: &M) -> Frame {
    let mut payload = bytes::BytesMut::with_capacity(msg.encoded_len());
    msg.encode(&mut payload)
        .expect("BytesMut grows on demand, encode cannot fail");
    Frame {
        opcode: opcode as u16,
        payload: payload.freeze(),
    }
}

/// Decode a frame payload into the expected protobuf message.
pub fn decode_payload<M: Message + Default>(frame: &Frame) -> Result<M, FrameError> {
    M::decode(frame.payload.clone()).map_err(|_| FrameError::MalformedPayload {
        opcode: frame.opcode,
    })
}
