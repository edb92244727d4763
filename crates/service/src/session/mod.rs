//! Per-peer protocol state machine: handshake, authenticated data exchange,
//! liveness, and disconnect.

mod kcp_driver;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use kcp2k_codec::{Channel as WireChannel, Cookie, HEADER_LEN, Header, Opcode};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::sleep;

use crate::adapter::{Inbox, KcpOutput};
use crate::cookie::CookieCell;
use crate::error::Error;
use crate::latch::Latch;
use crate::listener::ListenerHandle;
use crate::options::{KcpTuning, Timing};
use crate::tx_queue::TxQueue;

/// The channel a caller reads or writes on. Distinct from
/// [`kcp2k_codec::Channel`], which is the one-byte wire tag — this is the
/// public-facing enum applications match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

/// The session's place in the handshake/liveness lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connected = 0,
    Authenticated = 1,
    Disconnected = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            1 => Self::Authenticated,
            _ => Self::Disconnected,
        }
    }
}

struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub(crate) struct Inner {
    remote_addr: SocketAddr,
    cookie: Arc<CookieCell>,
    state: AtomicState,
    bufptr: SyncMutex<Vec<u8>>,
    epoch: Instant,
    last_ping_received_ms: AtomicU64,
    kcp_attached: Latch<()>,
    authenticated: Latch<()>,
    death: Latch<Error>,
    inbox: Inbox,
    kcp: SyncMutex<kcp::Kcp<KcpOutput>>,
    reliable_rx: AsyncMutex<mpsc::Receiver<Bytes>>,
    reliable_tx: mpsc::Sender<Bytes>,
    unreliable_rx: AsyncMutex<mpsc::Receiver<Bytes>>,
    unreliable_tx: mpsc::Sender<Bytes>,
    read_deadline: SyncMutex<Option<Instant>>,
    tx_queue: TxQueue,
    listener: Option<ListenerHandle>,
    timing: Timing,
}

impl Inner {
    fn touch_ping(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_ping_received_ms.store(now, Ordering::Relaxed);
    }

    fn ping_age(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_ping_received_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Called by the KCP driver thread for every fully-reassembled reliable
    /// application frame. This is the opcode dispatch described in the
    /// component design: it both advances the handshake (while
    /// `Connected`) and serves the steady-state protocol (once
    /// `Authenticated`).
    pub(crate) fn dispatch_reliable_frame(self: &Arc<Self>, frame: &[u8]) {
        let (opcode, body) = match Opcode::parse(frame) {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!(
                    "kcp2k: empty or malformed reliable frame from {}, closing",
                    self.remote_addr
                );
                self.close_with(Error::ClosedPipe);
                return;
            }
        };

        match (self.state.load(), opcode) {
            (SessionState::Connected, Opcode::Hello) => {
                self.state.store(SessionState::Authenticated);
                self.authenticated.set(());
            }
            (SessionState::Connected, _) => {
                log::warn!(
                    "kcp2k: expected Hello during handshake from {}, got {:?}",
                    self.remote_addr,
                    opcode
                );
                self.close_with(Error::ClosedPipe);
            }
            (SessionState::Authenticated, Opcode::Hello) => {
                log::warn!(
                    "kcp2k: unexpected Hello after authentication from {}, closing",
                    self.remote_addr
                );
                self.close_with(Error::ClosedPipe);
            }
            (SessionState::Authenticated, Opcode::Ping) => {
                self.touch_ping();
            }
            (SessionState::Authenticated, Opcode::Data) => {
                let _ = self.reliable_tx.blocking_send(Bytes::copy_from_slice(body));
            }
            (SessionState::Authenticated, Opcode::Disconnect) => {
                self.close_with(Error::ClosedPipe);
            }
            (SessionState::Disconnected, _) => {}
        }
    }

    /// Delivers a raw unreliable payload from the demux. Only Authenticated
    /// sessions observe unreliable data; earlier traffic is dropped with a
    /// warning, never queued for later.
    pub(crate) fn deliver_unreliable(&self, payload: Bytes) {
        if self.state.load() != SessionState::Authenticated {
            log::warn!(
                "kcp2k: dropping unreliable datagram from {} before authentication",
                self.remote_addr
            );
            return;
        }

        if self.unreliable_tx.try_send(payload).is_err() {
            log::warn!("kcp2k: unreliable read queue full for {}, dropping", self.remote_addr);
        }
    }

    pub(crate) fn feed_inbox(&self, body: Vec<u8>) {
        self.inbox.offer(body);
    }

    fn send_opcode_only(&self, opcode: Opcode) -> Result<(), Error> {
        let framed = opcode.frame(&[]);
        self.kcp.lock().send(&framed)?;
        Ok(())
    }

    pub(crate) fn close_with(self: &Arc<Self>, reason: Error) {
        if !self.death.set(reason) {
            return;
        }

        self.state.store(SessionState::Disconnected);

        // Best-effort: let the peer know this side is tearing down. Queued
        // and flushed synchronously here rather than left for the driver
        // thread's next `update()` tick — that thread is about to stop
        // servicing this engine (it exits as soon as it observes `death`),
        // so waiting for it would race Close against teardown.
        let _ = self.send_opcode_only(Opcode::Disconnect);
        let _ = self.kcp.lock().flush();

        if let Some(listener) = &self.listener {
            listener.remove_session(self.remote_addr);
        }
    }
}

/// A single kcp2k peer: owns a KCP engine, the protocol state, the cookie,
/// and the per-channel read queues.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

pub(crate) struct NewSessionArgs {
    pub remote_addr: SocketAddr,
    /// `Some(C_s)` for a server session, whose cookie is generated and
    /// fixed before the session exists. `None` for a client session, which
    /// has not yet learned the server's cookie off the wire.
    pub cookie: Option<Cookie>,
    pub conv: u32,
    pub tx_queue: TxQueue,
    pub timing: Timing,
    pub tuning: KcpTuning,
    pub app_queue_capacity: usize,
    pub listener: Option<ListenerHandle>,
    pub initial_state: SessionState,
}

impl Session {
    pub(crate) fn new(args: NewSessionArgs) -> Self {
        let cookie = Arc::new(CookieCell::new(args.cookie));
        let output = KcpOutput::new(args.tx_queue.clone(), cookie.clone(), args.remote_addr);
        let mut kcp = kcp::Kcp::new(args.conv, output);
        kcp.set_nodelay(
            args.tuning.nodelay,
            args.tuning.interval,
            args.tuning.resend,
            args.tuning.no_congestion_window,
        );
        kcp.set_wndsize(args.tuning.send_window, args.tuning.recv_window);
        // `tuning.mtu` is the total UDP payload budget; every reliable
        // datagram also carries the 5-byte kcp2k header ahead of whatever
        // KCP emits, so the engine itself only gets the remainder — else a
        // full-size KCP segment plus the header would exceed the caller's
        // configured MTU and get truncated on the wire.
        let _ = kcp.set_mtu(args.tuning.mtu.saturating_sub(HEADER_LEN));

        let (inbox, inbox_rx) = Inbox::new();
        let (reliable_tx, reliable_rx) = mpsc::channel(args.app_queue_capacity);
        let (unreliable_tx, unreliable_rx) = mpsc::channel(args.app_queue_capacity);

        let inner = Arc::new(Inner {
            remote_addr: args.remote_addr,
            cookie,
            state: AtomicState::new(args.initial_state),
            bufptr: SyncMutex::new(Vec::new()),
            epoch: Instant::now(),
            last_ping_received_ms: AtomicU64::new(0),
            kcp_attached: Latch::default(),
            authenticated: Latch::default(),
            death: Latch::default(),
            inbox,
            kcp: SyncMutex::new(kcp),
            reliable_rx: AsyncMutex::new(reliable_rx),
            reliable_tx,
            unreliable_rx: AsyncMutex::new(unreliable_rx),
            unreliable_tx,
            read_deadline: SyncMutex::new(None),
            tx_queue: args.tx_queue,
            listener: args.listener,
            timing: args.timing,
        });

        // The KCP engine is constructed synchronously above, so this latch
        // fires immediately; it is kept as a named primitive (rather than
        // inlined away) so the handshake code below stays correct if a
        // future engine needs an async accept step here instead.
        inner.kcp_attached.set(());

        kcp_driver::spawn(inner.clone(), inbox_rx);

        Self { inner }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn cookie(&self) -> Cookie {
        self.inner.cookie.get()
    }

    /// Learns and locks this session's cookie from the first valid datagram
    /// received from the peer. A no-op once a cookie is already locked.
    ///
    /// Only meaningful on the client dial path: a server session is always
    /// constructed with its cookie already fixed, so this call is never
    /// needed there.
    pub(crate) fn learn_cookie(&self, cookie: Cookie) {
        self.inner.cookie.learn(cookie);
    }

    pub(crate) fn state(&self) -> SessionState {
        self.inner.state.load()
    }

    pub(crate) fn feed_inbox(&self, body: Vec<u8>) {
        self.inner.feed_inbox(body);
    }

    pub(crate) fn deliver_unreliable(&self, payload: Bytes) {
        self.inner.deliver_unreliable(payload);
    }

    /// Runs the server-side (or client-side) handshake wait: the 5-second
    /// deadline for exactly one reliable Hello. Returns once
    /// `Authenticated`, otherwise fails and closes the session.
    pub(crate) async fn await_handshake(&self) -> Result<(), Error> {
        self.inner.kcp_attached.wait().await;

        tokio::select! {
            _ = self.inner.authenticated.wait() => Ok(()),
            _ = sleep(self.inner.timing.handshake_timeout) => {
                self.inner.close_with(Error::Timeout);
                Err(Error::Timeout)
            }
            reason = self.inner.death.wait() => Err(reason),
        }
    }

    /// Sends this session's own Hello. Used by the server after observing
    /// the peer's Hello, and by the client immediately after dial.
    pub(crate) fn send_hello(&self) -> Result<(), Error> {
        self.inner.send_opcode_only(Opcode::Hello)
    }

    pub(crate) fn send_ping(&self) -> Result<(), Error> {
        self.inner.send_opcode_only(Opcode::Ping)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Every 1000 ms: close on a 5000 ms liveness timeout, otherwise emit a
    /// Ping. Exits as soon as the session dies.
    pub(crate) async fn run_ping_loop(&self) {
        self.inner.touch_ping();

        loop {
            tokio::select! {
                _ = sleep(self.inner.timing.ping_interval) => {}
                _ = self.inner.death.wait() => return,
            }

            if self.inner.death.is_set() {
                return;
            }

            if self.inner.ping_age() > self.inner.timing.ping_timeout {
                log::info!("kcp2k: {} missed its liveness deadline, closing", self.inner.remote_addr);
                self.inner.close_with(Error::ClosedPipe);
                return;
            }

            if self.send_ping().is_err() {
                return;
            }
        }
    }

    /// Sends application bytes on the given channel.
    ///
    /// Reliable sends prepend the `Data` opcode and hand the frame to the
    /// KCP engine; unreliable sends are wrapped with the wire header and
    /// enqueued directly on the listener-wide [`TxQueue`].
    pub async fn send(&self, bytes: &[u8], channel: Channel) -> Result<usize, Error> {
        if let Some(reason) = self.inner.death.get() {
            return Err(reason);
        }

        match channel {
            Channel::Reliable => {
                let framed = Opcode::Data.frame(bytes);
                self.inner.kcp.lock().send(&framed)?;
                Ok(bytes.len())
            }
            Channel::Unreliable => {
                let mut datagram = self.inner.tx_queue.acquire_buffer();
                Header::new(WireChannel::Unreliable, self.inner.cookie.get()).encode(&mut datagram);
                datagram.extend_from_slice(bytes);
                self.inner
                    .tx_queue
                    .send(datagram, self.inner.remote_addr)
                    .await?;
                Ok(0)
            }
        }
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.inner.read_deadline.lock() = deadline;
    }

    /// Stream-semantic for Reliable, message-semantic for Unreliable. See
    /// the component design for the exact residual-buffer and
    /// buffer-too-small rules.
    pub async fn read(&self, buf: &mut [u8]) -> Result<(usize, Channel), Error> {
        {
            let mut bufptr = self.inner.bufptr.lock();
            if !bufptr.is_empty() {
                let n = buf.len().min(bufptr.len());
                buf[..n].copy_from_slice(&bufptr[..n]);
                bufptr.drain(..n);
                return Ok((n, Channel::Reliable));
            }
        }

        if let Some(reason) = self.inner.death.get() {
            return Err(reason);
        }

        let deadline = *self.inner.read_deadline.lock();
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            reason = self.inner.death.wait() => Err(reason),

            Some(payload) = async { self.inner.reliable_rx.lock().await.recv().await } => {
                let n = buf.len().min(payload.len());
                buf[..n].copy_from_slice(&payload[..n]);
                if n < payload.len() {
                    self.inner.bufptr.lock().extend_from_slice(&payload[n..]);
                }
                Ok((n, Channel::Reliable))
            }

            Some(payload) = async { self.inner.unreliable_rx.lock().await.recv().await } => {
                if payload.len() > buf.len() {
                    Err(Error::BufferSmall)
                } else {
                    buf[..payload.len()].copy_from_slice(&payload);
                    Ok((payload.len(), Channel::Unreliable))
                }
            }

            _ = timeout => Err(Error::Timeout),
        }
    }

    /// Idempotent. First call tears down the KCP engine, removes the
    /// session from its listener's table, and wakes every pending
    /// operation with `ClosedPipe`. Safe to call from any component.
    pub fn close(&self) {
        self.inner.close_with(Error::ClosedPipe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session(initial_state: SessionState, listener: Option<ListenerHandle>) -> Session {
        let pool = std::sync::Arc::new(crate::pool::BufferPool::new(1400));
        let (tx_queue, _rx, _write_error) = TxQueue::new(pool);
        let args = NewSessionArgs {
            remote_addr: "127.0.0.1:9000".parse().unwrap(),
            cookie: Some([1, 2, 3, 4]),
            conv: 42,
            tx_queue,
            timing: Timing::default(),
            tuning: KcpTuning::default(),
            app_queue_capacity: 10,
            listener,
            initial_state,
        };
        Session::new(args)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = make_session(SessionState::Authenticated, None);
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
        let err = session.read(&mut [0u8; 8]).await.unwrap_err();
        assert!(matches!(err, Error::ClosedPipe));
    }

    #[tokio::test]
    async fn pre_auth_unreliable_is_dropped() {
        let session = make_session(SessionState::Connected, None);
        session.deliver_unreliable(Bytes::from_static(b"early"));

        let mut buf = [0u8; 16];
        session.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)));
        let result = session.read(&mut buf).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn unreliable_buffer_small_discards_message() {
        let session = make_session(SessionState::Authenticated, None);
        session.deliver_unreliable(Bytes::from_static(b"0123456789"));

        let mut small = [0u8; 4];
        assert!(matches!(session.read(&mut small).await, Err(Error::BufferSmall)));

        session.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)));
        let mut big = [0u8; 32];
        assert!(matches!(session.read(&mut big).await, Err(Error::Timeout)));
    }
}
