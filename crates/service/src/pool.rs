use parking_lot::Mutex;

/// A process-wide pool of MTU-sized buffers for outbound datagrams.
///
/// Allocating and freeing a fresh `Vec<u8>` for every outbound datagram adds
/// up under load; buffers are checked out by the KCP lower adapter and the
/// unreliable send path, filled, handed to the [`crate::tx_queue::TxQueue`],
/// and returned here once the send loop has written them to the socket.
///
/// Buffers must not be returned while still enqueued after a failed send —
/// callers only call [`BufferPool::release`] from the send loop's success
/// path.
pub struct BufferPool {
    mtu: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> Vec<u8> {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.reserve(self.mtu);
        buf
    }

    pub fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < 256 {
            free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::new(1500);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        let ptr = buf.as_ptr();
        pool.release(buf);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
    }
}
