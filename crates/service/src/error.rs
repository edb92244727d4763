/// The full error taxonomy surfaced by [`crate::Session`] and
/// [`crate::Listener`].
///
/// Transient, pre-authentication problems (bad cookie, short datagram,
/// unknown opcode) never reach this type — they are logged and swallowed at
/// the demux. What remains here is either a caller mistake, a deadline, or a
/// latched failure of the socket or the session itself.
#[derive(Debug)]
pub enum Error {
    /// API misuse, such as sending on an unrecognized channel.
    InvalidOperation,
    /// A deadline elapsed on `Accept`, `Read`, or the handshake.
    Timeout,
    /// The caller's buffer was too small for an unreliable message; the
    /// message is discarded, not redelivered.
    BufferSmall,
    /// The endpoint is shut down: local `Close`, peer `Disconnect`, or a
    /// liveness timeout.
    ClosedPipe,
    /// The UDP socket failed, surfaced verbatim from whichever latch first
    /// recorded it.
    Io(std::io::Error),
    /// The KCP engine reported an error on `input`/`send`/`recv`.
    Kcp(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<kcp::Error> for Error {
    fn from(value: kcp::Error) -> Self {
        Self::Kcp(value.to_string())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidOperation => Self::InvalidOperation,
            Self::Timeout => Self::Timeout,
            Self::BufferSmall => Self::BufferSmall,
            Self::ClosedPipe => Self::ClosedPipe,
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Kcp(s) => Self::Kcp(s.clone()),
        }
    }
}
