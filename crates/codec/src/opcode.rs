use crate::Error;

/// Length in bytes of the opcode prefix on a reliable-channel payload.
pub const OPCODE_LEN: usize = 1;

/// A reliable-channel application frame tag: `opcode(1) || payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Hello = 1,
    Ping = 2,
    Data = 3,
    Disconnect = 4,
}

impl Opcode {
    /// Prepends this opcode to `payload`, producing a reliable-channel frame
    /// suitable for handing to the KCP engine's send path.
    pub fn frame(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPCODE_LEN + payload.len());
        out.push(self as u8);
        out.extend_from_slice(payload);
        out
    }

    /// Splits a reliable-channel payload into its opcode and trailing bytes.
    ///
    /// A zero-length payload (no opcode byte present) is a protocol error,
    /// not merely an empty `Data` frame.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), Error> {
        let Some((&tag, rest)) = payload.split_first() else {
            return Err(Error::EmptyReliableFrame);
        };

        let opcode = match tag {
            1 => Self::Hello,
            2 => Self::Ping,
            3 => Self::Data,
            4 => Self::Disconnect,
            other => return Err(Error::UnknownOpcode(other)),
        };

        Ok((opcode, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_parse_round_trip() {
        let framed = Opcode::Data.frame(b"payload");
        let (opcode, body) = Opcode::parse(&framed).unwrap();
        assert_eq!(opcode, Opcode::Data);
        assert_eq!(body, b"payload");
    }

    #[test]
    fn hello_and_ping_carry_no_payload() {
        let framed = Opcode::Ping.frame(&[]);
        assert_eq!(framed, vec![Opcode::Ping as u8]);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(Opcode::parse(&[]), Err(Error::EmptyReliableFrame)));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(Opcode::parse(&[9, 1, 2]), Err(Error::UnknownOpcode(9))));
    }
}
