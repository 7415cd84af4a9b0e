//! Authenticated UDP datagrams for the world movement channel.
//!
//! Layout: `[u64 sessionToken BE][u64 sequence BE][u16 opcode BE][payload]
//! [32-byte HMAC-SHA256]`. The MAC covers every byte before it, keyed with
//! the session's hmac secret minted at login.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const MAC_LEN: usize = 32;
pub const HEADER_LEN: usize = 8 + 8 + 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UdpError {
    #[error("datagram of {0} bytes is shorter than header + mac")]
    Truncated(usize),
    #[error("authentication failed")]
    BadMac,
    #[error("session id is not a valid token source")]
    BadSessionId,
}

/// A parsed (not yet authenticated) movement datagram.
#[derive(Debug, Clone)]
pub struct UdpFrame {
    pub session_token: u64,
    pub sequence: u64,
    pub opcode: u16,
    pub payload: Bytes,
    covered: Bytes,
    mac: [u8; MAC_LEN],
}

impl UdpFrame {
    /// Split a raw datagram into header, payload and trailing MAC.
    /// Authentication is a separate step; the flood gate runs between them.
    pub fn parse(datagram: &[u8]) -> Result<UdpFrame, UdpError> {
        if datagram.len() < HEADER_LEN + MAC_LEN {
            return Err(UdpError::Truncated(datagram.len()));
        }

        let covered_len = datagram.len() - MAC_LEN;
        let covered = Bytes::copy_from_slice(&datagram[..covered_len]);

        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&datagram[covered_len..]);

        let session_token = u64::from_be_bytes(covered[0..8].try_into().expect("8-byte slice"));
        let sequence = u64::from_be_bytes(covered[8..16].try_into().expect("8-byte slice"));
        let opcode = u16::from_be_bytes(covered[16..18].try_into().expect("2-byte slice"));
        let payload = covered.slice(HEADER_LEN..);

        Ok(UdpFrame {
            session_token,
            sequence,
            opcode,
            payload,
            covered,
            mac,
        })
    }

    /// Check the trailing MAC against the session secret (constant time).
    pub fn verify(&self, secret: &[u8]) -> Result<(), UdpError> {
        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|_| UdpError::BadMac)?;
        mac.update(&self.covered);
        mac.verify_slice(&self.mac).map_err(|_| UdpError::BadMac)
    }

    /// Build a signed datagram. Exercised by tests and client tooling.
    pub fn encode(
        session_token: u64,
        sequence: u64,
        opcode: u16,
        payload: &[u8],
        secret: &[u8],
    ) -> Result<Bytes, UdpError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + MAC_LEN);
        buf.put_u64(session_token);
        buf.put_u64(sequence);
        buf.put_u16(opcode);
        buf.put_slice(payload);

        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|_| UdpError::BadMac)?;
        mac.update(&buf);
        buf.put_slice(&mac.finalize().into_bytes());
        Ok(buf.freeze())
    }
}

/// Derive the numeric UDP session token from a session id: the first 8 raw
/// bytes of the id, big-endian. Session ids encode exactly 8 random bytes.
pub fn session_token(session_id: &str) -> Result<u64, UdpError> {
    let raw = URL_SAFE_NO_PAD
        .decode(session_id)
        .map_err(|_| UdpError::BadSessionId)?;
    if raw.len() < 8 {
        return Err(UdpError::BadSessionId);
    }
    Ok(u64::from_be_bytes(raw[..8].try_into().expect("8-byte slice")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_encode_parse_verify() {
        let datagram =
            UdpFrame::encode(0xDEAD_BEEF_CAFE_F00D, 17, 0x0101, b"input", SECRET).unwrap();
        let frame = UdpFrame::parse(&datagram).unwrap();
        assert_eq!(frame.session_token, 0xDEAD_BEEF_CAFE_F00D);
        assert_eq!(frame.sequence, 17);
        assert_eq!(frame.opcode, 0x0101);
        assert_eq!(&frame.payload[..], b"input");
        assert!(frame.verify(SECRET).is_ok());
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let datagram = UdpFrame::encode(1, 1, 0x0101, b"input", SECRET).unwrap();
        for i in 0..datagram.len() {
            let mut tampered = datagram.to_vec();
            tampered[i] ^= 0x01;
            let frame = UdpFrame::parse(&tampered).unwrap();
            assert_eq!(frame.verify(SECRET), Err(UdpError::BadMac), "byte {i}");
        }
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let datagram = UdpFrame::encode(1, 1, 0x0101, b"input", SECRET).unwrap();
        let frame = UdpFrame::parse(&datagram).unwrap();
        assert_eq!(
            frame.verify(b"another-secret-another-secret-ab"),
            Err(UdpError::BadMac)
        );
    }

    #[test]
    fn test_truncated_datagram_rejected() {
        match UdpFrame::parse(&[0u8; HEADER_LEN + MAC_LEN - 1]) {
            Err(UdpError::Truncated(n)) => assert_eq!(n, HEADER_LEN + MAC_LEN - 1),
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn test_session_token_from_id() {
        let id = URL_SAFE_NO_PAD.encode([0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(session_token(&id).unwrap(), 258);
        assert!(session_token("not-base64!!").is_err());
        assert!(session_token("AAAA").is_err());
    }
}
