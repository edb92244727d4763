//! The shim presented to the KCP engine as its lower transport.
//!
//! KCP cannot share the UDP socket directly: every outbound segment must be
//! rewritten with the kcp2k reliable header, and every inbound segment must
//! already have been classified by channel before it reaches KCP. This
//! module is the dependency-inversion seam the rest of the design notes
//! refer to — the kcp2k layer owns the socket and the peer identity, KCP
//! owns the ARQ.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use kcp2k_codec::{Channel, Header};

use crate::cookie::CookieCell;
use crate::tx_queue::TxQueue;

/// Capacity of a single peer's incoming-reliable-bytes queue, fed by the
/// demux and drained by that peer's KCP driver thread.
pub const ADAPTER_INBOX_CAPACITY: usize = 128;

/// The demux-facing half of the adapter: accepts pre-classified reliable
/// bodies for one peer.
///
/// If the queue is full the newest datagram is dropped with a warning —
/// reliable retransmission is KCP's own responsibility, so a transient drop
/// here does not lose data permanently.
#[derive(Clone)]
pub struct Inbox {
    sender: SyncSender<Vec<u8>>,
}

impl Inbox {
    pub fn new() -> (Self, Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::sync_channel(ADAPTER_INBOX_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Never blocks: drops the newest body if the peer's inbox is full.
    pub fn offer(&self, body: Vec<u8>) {
        match self.sender.try_send(body) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("kcp2k: adapter inbox full, dropping newest reliable datagram");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// The KCP-facing half of the adapter: implements [`io::Write`] so it can be
/// handed to the KCP engine as its output sink. Every call wraps the
/// engine's segment with the kcp2k reliable header and hands it to the
/// listener-wide [`TxQueue`].
///
/// The cookie is shared with the owning [`crate::session::Session`] rather
/// than fixed at construction: a server session's cookie is already locked
/// by the time this is built, but a client session's is still unset at
/// dial and only gets learned and locked once the server's first datagram
/// arrives, so every write must read whatever the cell currently holds.
///
/// KCP calls `write` synchronously from whichever thread drives it; in this
/// implementation that is always the per-session KCP driver thread (see
/// `kcp_driver`), never an async task, so [`TxQueue::blocking_send`] is safe
/// to use here.
pub struct KcpOutput {
    tx_queue: TxQueue,
    cookie: Arc<CookieCell>,
    dest: SocketAddr,
}

impl KcpOutput {
    pub fn new(tx_queue: TxQueue, cookie: Arc<CookieCell>, dest: SocketAddr) -> Self {
        Self {
            tx_queue,
            cookie,
            dest,
        }
    }
}

impl io::Write for KcpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut datagram = self.tx_queue.acquire_buffer();
        Header::new(Channel::Reliable, self.cookie.get()).encode(&mut datagram);
        datagram.extend_from_slice(buf);

        self.tx_queue
            .blocking_send(datagram, self.dest)
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_drops_newest_when_full() {
        let (inbox, receiver) = Inbox::new();
        for i in 0..ADAPTER_INBOX_CAPACITY {
            inbox.offer(vec![i as u8]);
        }
        inbox.offer(vec![0xff]);

        let first = receiver.recv().unwrap();
        assert_eq!(first, vec![0u8]);
    }
}
