use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::latch::Latch;
use crate::pool::BufferPool;

/// Capacity of the listener-wide outbound queue. Back-pressures every
/// producer (the KCP lower adapter and every session's unreliable `Send`)
/// equally; there is exactly one of these per listener, not one per session.
pub const TX_QUEUE_CAPACITY: usize = 10;

pub struct TxItem {
    pub buf: Vec<u8>,
    pub dest: SocketAddr,
}

/// A bounded, single-consumer queue of outbound datagrams.
///
/// The queue itself is just the sending half of a channel; [`run_send_loop`]
/// owns the receiving half and is the single consumer that drains it to the
/// socket.
#[derive(Clone)]
pub struct TxQueue {
    sender: mpsc::Sender<TxItem>,
    write_error: Arc<Latch<String>>,
    pool: Arc<BufferPool>,
}

impl TxQueue {
    pub fn new(pool: Arc<BufferPool>) -> (Self, mpsc::Receiver<TxItem>, Arc<Latch<String>>) {
        let (sender, receiver) = mpsc::channel(TX_QUEUE_CAPACITY);
        let write_error = Arc::new(Latch::default());

        (
            Self {
                sender,
                write_error: write_error.clone(),
                pool,
            },
            receiver,
            write_error,
        )
    }

    /// Checks out a reusable outbound buffer from the shared pool.
    pub fn acquire_buffer(&self) -> Vec<u8> {
        self.pool.acquire()
    }

    /// Enqueues a datagram for transmission. May block briefly while the
    /// bounded queue drains; never blocks on the network itself.
    ///
    /// Fails fast with the latched error if the send loop has already exited
    /// after a write failure.
    pub async fn send(&self, buf: Vec<u8>, dest: SocketAddr) -> Result<(), Error> {
        if let Some(message) = self.write_error.get() {
            return Err(Error::Io(std::io::Error::other(message)));
        }

        self.sender
            .send(TxItem { buf, dest })
            .await
            .map_err(|_| Error::ClosedPipe)
    }

    /// Synchronous counterpart of [`TxQueue::send`], for callers that run on
    /// a plain OS thread rather than inside the async runtime — namely the
    /// KCP driver thread's output sink. Must never be called from within a
    /// tokio task.
    pub fn blocking_send(&self, buf: Vec<u8>, dest: SocketAddr) -> Result<(), Error> {
        if let Some(message) = self.write_error.get() {
            return Err(Error::Io(std::io::Error::other(message)));
        }

        self.sender
            .blocking_send(TxItem { buf, dest })
            .map_err(|_| Error::ClosedPipe)
    }
}

/// The single consumer of a [`TxQueue`]: pops records, writes each buffer to
/// the socket, and returns it to the shared pool on success. Exits and
/// latches the write-error on the first failed send; subsequent producers
/// observe the latch and fail fast instead of queuing behind a dead loop.
pub async fn run_send_loop(
    socket: Arc<UdpSocket>,
    mut receiver: mpsc::Receiver<TxItem>,
    pool: Arc<BufferPool>,
    write_error: Arc<Latch<String>>,
) {
    while let Some(item) = receiver.recv().await {
        match socket.send_to(&item.buf, item.dest).await {
            Ok(_) => pool.release(item.buf),
            Err(error) => {
                log::warn!("kcp2k: send loop write error, latching and exiting: {error}");
                write_error.set(error.to_string());
                return;
            }
        }
    }
}
