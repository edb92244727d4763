//! ## kcp2k wire framing
//!
//! Every UDP datagram exchanged by a kcp2k endpoint carries a fixed 5-byte
//! header ahead of its body:
//!
//! ```text
//! offset 0: channel   (1 byte)   1=Reliable, 2=Unreliable, others dropped
//! offset 1: cookie    (4 bytes)  opaque per-peer random
//! offset 5: body      (0..mtu-5) reliable=KCP segment, unreliable=payload
//! ```
//!
//! Payloads carried over the reliable channel are themselves prefixed with a
//! single opcode byte identifying a handshake, liveness, data, or teardown
//! message. This crate only encodes and decodes these two framings; it does
//! not touch a socket and does not know about KCP.

pub mod header;
pub mod opcode;

pub use header::{Cookie, Channel, Header, HEADER_LEN};
pub use opcode::{Opcode, OPCODE_LEN};

#[derive(Debug)]
pub enum Error {
    /// Datagram shorter than the 5-byte header.
    ShortDatagram,
    /// `channel` byte outside {1, 2}.
    UnknownChannel(u8),
    /// Reliable payload with no opcode byte at all.
    EmptyReliableFrame,
    /// Opcode byte not in {1, 2, 3, 4}.
    UnknownOpcode(u8),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let cookie = [0xde, 0xad, 0xbe, 0xef];
        let mut buf = Vec::new();
        Header::new(Channel::Reliable, cookie).encode(&mut buf);
        buf.extend_from_slice(b"hello");

        let (header, body) = Header::decode(&buf).unwrap();
        assert_eq!(header.channel, Channel::Reliable);
        assert_eq!(header.cookie, cookie);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn short_datagram_rejected() {
        assert!(matches!(Header::decode(&[1, 2, 3]), Err(Error::ShortDatagram)));
    }

    #[test]
    fn unknown_channel_rejected() {
        let mut buf = vec![9u8, 0, 0, 0, 0];
        buf.extend_from_slice(b"x");
        assert!(matches!(Header::decode(&buf), Err(Error::UnknownChannel(9))));
    }

    #[test]
    fn empty_body_decodes_to_empty_slice() {
        let buf = [Channel::Unreliable as u8, 1, 2, 3, 4];
        let (header, body) = Header::decode(&buf).unwrap();
        assert_eq!(header.channel, Channel::Unreliable);
        assert!(body.is_empty());
    }
}
