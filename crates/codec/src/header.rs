use crate::Error;

/// Length in bytes of the per-datagram header: `channel(1) || cookie(4)`.
pub const HEADER_LEN: usize = 5;

/// Opaque per-peer value carried in every datagram after the channel byte.
///
/// Four bytes is weak against an on-path attacker but sufficient against a
/// blind spoofer guessing a five-tuple; it identifies a peer binding, it is
/// not a secret.
pub type Cookie = [u8; 4];

/// The channel a datagram belongs to, the first byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Reliable = 1,
    Unreliable = 2,
}

impl Channel {
    fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            1 => Ok(Self::Reliable),
            2 => Ok(Self::Unreliable),
            other => Err(Error::UnknownChannel(other)),
        }
    }
}

/// The decoded per-datagram header, `channel(1) || cookie(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub channel: Channel,
    pub cookie: Cookie,
}

impl Header {
    pub fn new(channel: Channel, cookie: Cookie) -> Self {
        Self { channel, cookie }
    }

    /// Writes `channel || cookie` to `out`. The body must be appended by the
    /// caller; this function never touches it.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.channel as u8);
        out.extend_from_slice(&self.cookie);
    }

    /// Splits a raw datagram into its header and body.
    ///
    /// Datagrams shorter than [`HEADER_LEN`] or carrying an unrecognized
    /// channel byte are rejected; this is the only validation performed at
    /// this layer, matching the demultiplexer's first two drop rules.
    pub fn decode(datagram: &[u8]) -> Result<(Self, &[u8]), Error> {
        if datagram.len() < HEADER_LEN {
            return Err(Error::ShortDatagram);
        }

        let channel = Channel::from_byte(datagram[0])?;
        let mut cookie = [0u8; 4];
        cookie.copy_from_slice(&datagram[1..5]);

        Ok((Self { channel, cookie }, &datagram[5..]))
    }
}
