//! Length-prefixed framing for all TCP traffic.
//!
//! Layout: `[u32 length, big-endian][u16 opcode, big-endian][payload]`.
//! The length field counts the opcode and payload only.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest accepted value of the length field (opcode + payload).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

const LEN_FIELD: usize = 4;
const OPCODE_FIELD: usize = 2;

/// One decoded wire frame. The payload is an undecoded protobuf record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub payload: Bytes,
}

/// What the decoder hands the connection loop. An oversized frame is
/// reported (and its bytes discarded) so the router can answer with a
/// protocol error while the connection keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Frame(Frame),
    Oversized(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {0} exceeds maximum {MAX_FRAME_SIZE}")]
    TooLarge(usize),
    #[error("frame length {0} is shorter than the opcode field")]
    TooShort(usize),
    #[error("malformed payload for opcode {opcode:#06x}")]
    MalformedPayload { opcode: u16 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tokio codec enforcing the frame layout and size cap in both directions.
/// Oversized inbound frames are skipped, not fatal; a length field shorter
/// than the opcode means the stream cannot be resynchronized and errors.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Bytes of an oversized frame still waiting to be discarded.
    discard: usize,
}

impl Decoder for FrameCodec {
    type Item = FrameEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FrameEvent>, FrameError> {
        if self.discard > 0 {
            let n = self.discard.min(src.len());
            src.advance(n);
            self.discard -= n;
            if self.discard > 0 {
                return Ok(None);
            }
        }

        if src.len() < LEN_FIELD {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_FIELD];
        len_bytes.copy_from_slice(&src[..LEN_FIELD]);
        let frame_len = u32::from_be_bytes(len_bytes) as usize;

        if frame_len > MAX_FRAME_SIZE {
            src.advance(LEN_FIELD);
            let n = frame_len.min(src.len());
            src.advance(n);
            self.discard = frame_len - n;
            return Ok(Some(FrameEvent::Oversized(frame_len)));
        }
        if frame_len < OPCODE_FIELD {
            return Err(FrameError::TooShort(frame_len));
        }

        if src.len() < LEN_FIELD + frame_len {
            // Not enough buffered yet; reserve what the full frame needs.
            src.reserve(LEN_FIELD + frame_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_FIELD);
        let opcode = src.get_u16();
        let payload = src.split_to(frame_len - OPCODE_FIELD).freeze();

        Ok(Some(FrameEvent::Frame(Frame { opcode, payload })))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let frame_len = OPCODE_FIELD + frame.payload.len();
        if frame_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(frame_len));
        }

        dst.reserve(LEN_FIELD + frame_len);
        dst.put_u32(frame_len as u32);
        dst.put_u16(frame.opcode);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Frame {
    /// Serialize into a standalone buffer, outside of a codec pipeline.
    /// Used by the world broadcast path which batches frames per connection.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(LEN_FIELD + OPCODE_FIELD + self.payload.len());
        dst.put_u32((OPCODE_FIELD + self.payload.len()) as u32);
        dst.put_u16(self.opcode);
        dst.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_raw(opcode: u16, payload: &[u8]) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame {
                    opcode,
                    payload: Bytes::copy_from_slice(payload),
                },
                &mut buf,
            )
            .unwrap();
        buf
    }

    fn expect_frame(event: Option<FrameEvent>) -> Frame {
        match event {
            Some(FrameEvent::Frame(frame)) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip_is_identity() {
        for (opcode, payload) in [
            (0x0001u16, &b""[..]),
            (0x0101, b"\x00\x01\x02"),
            (0x07FF, b"some error text"),
            (0x1F01, &[0xAAu8; 1024][..]),
        ] {
            let mut codec = FrameCodec::default();
            let mut buf = encode_raw(opcode, payload);
            let frame = expect_frame(codec.decode(&mut buf).unwrap());
            assert_eq!(frame.opcode, opcode);
            assert_eq!(&frame.payload[..], payload);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_partial_input_yields_none() {
        let mut codec = FrameCodec::default();
        let buf = encode_raw(0x0601, b"heartbeat");

        let mut partial = BytesMut::from(&buf[..buf.len() - 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&buf[buf.len() - 3..]);
        let frame = expect_frame(codec.decode(&mut partial).unwrap());
        assert_eq!(&frame.payload[..], b"heartbeat");
    }

    #[test]
    fn test_oversized_frame_skipped_stream_continues() {
        let mut codec = FrameCodec::default();
        let oversized_len = MAX_FRAME_SIZE + 10;

        let mut buf = BytesMut::new();
        buf.put_u32(oversized_len as u32);
        buf.put_slice(&vec![0xEE; oversized_len]);
        // A well-formed frame right behind the oversized one.
        buf.unsplit(encode_raw(0x0601, b"alive"));

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrameEvent::Oversized(oversized_len))
        );
        let frame = expect_frame(codec.decode(&mut buf).unwrap());
        assert_eq!(frame.opcode, 0x0601);
        assert_eq!(&frame.payload[..], b"alive");
    }

    #[test]
    fn test_oversized_frame_discarded_across_reads() {
        let mut codec = FrameCodec::default();
        let oversized_len = MAX_FRAME_SIZE + 1;

        let mut first = BytesMut::new();
        first.put_u32(oversized_len as u32);
        first.put_slice(&vec![0xEE; 100]);
        assert_eq!(
            codec.decode(&mut first).unwrap(),
            Some(FrameEvent::Oversized(oversized_len))
        );
        assert!(codec.decode(&mut first).unwrap().is_none());

        // Remaining garbage arrives later, then a real frame.
        let mut rest = BytesMut::from(&vec![0xEE; oversized_len - 100][..]);
        rest.unsplit(encode_raw(0x0001, b"login"));
        let frame = expect_frame(codec.decode(&mut rest).unwrap());
        assert_eq!(frame.opcode, 0x0001);
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![0u8; MAX_FRAME_SIZE]);
        assert!(matches!(
            codec.encode(
                Frame {
                    opcode: 0x0301,
                    payload
                },
                &mut buf
            ),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn test_length_shorter_than_opcode_rejected() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0xFF);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::TooShort(1))
        ));
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = encode_raw(0x0001, b"x");
        buf.unsplit(encode_raw(0x0002, b"y"));

        assert_eq!(expect_frame(codec.decode(&mut buf).unwrap()).opcode, 0x0001);
        assert_eq!(expect_frame(codec.decode(&mut buf).unwrap()).opcode, 0x0002);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
