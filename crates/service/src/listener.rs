//! Owns the UDP socket, the session table, the accept backlog, and the raw
//! read loop that classifies every inbound datagram.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use ahash::AHashMap;
use bytes::Bytes;
use kcp2k_codec::{Channel as WireChannel, Header};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::cookie;
use crate::error::Error;
use crate::latch::Latch;
use crate::options::ListenerOptions;
use crate::pool::BufferPool;
use crate::session::{NewSessionArgs, Session, SessionState};
use crate::tx_queue::TxQueue;

struct ListenerInner {
    socket: Arc<UdpSocket>,
    sessions: RwLock<AHashMap<SocketAddr, Session>>,
    accept_tx: mpsc::Sender<Session>,
    accept_rx: AsyncMutex<mpsc::Receiver<Session>>,
    accept_deadline: RwLock<Option<Instant>>,
    read_error: Latch<Error>,
    death: Latch<()>,
    tx_queue: TxQueue,
    options: ListenerOptions,
}

/// A weak, `Clone`-able reference a [`Session`] holds back to its listener,
/// used only so `Session::close` can remove itself from the session table.
#[derive(Clone)]
pub struct ListenerHandle(Weak<ListenerInner>);

impl ListenerHandle {
    pub(crate) fn remove_session(&self, addr: SocketAddr) {
        if let Some(inner) = self.0.upgrade() {
            inner.sessions.write().remove(&addr);
        }
    }
}

/// The UDP endpoint applications bind to accept kcp2k peers.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    pub async fn bind(local_addr: SocketAddr, options: ListenerOptions) -> Result<Self, Error> {
        let socket = Arc::new(UdpSocket::bind(local_addr).await?);
        let pool = Arc::new(BufferPool::new(options.kcp.mtu));
        let (tx_queue, tx_rx, write_error) = TxQueue::new(pool.clone());
        let (accept_tx, accept_rx) = mpsc::channel(options.capacities.accept_backlog);

        let inner = Arc::new(ListenerInner {
            socket: socket.clone(),
            sessions: RwLock::new(AHashMap::new()),
            accept_tx,
            accept_rx: AsyncMutex::new(accept_rx),
            accept_deadline: RwLock::new(None),
            read_error: Latch::default(),
            death: Latch::default(),
            tx_queue,
            options,
        });

        tokio::spawn(crate::tx_queue::run_send_loop(socket, tx_rx, pool, write_error));
        tokio::spawn(read_loop(inner.clone()));

        Ok(Self { inner })
    }

    /// The address actually bound, useful when `bind` was called with port
    /// 0 and the caller needs to learn which ephemeral port the OS picked.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Blocks until the next session completes its handshake, the read
    /// deadline elapses, or the listener fails.
    pub async fn accept(&self) -> Result<Session, Error> {
        let deadline = *self.inner.accept_deadline.read();
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            reason = self.inner.read_error.wait() => Err(reason),
            _ = self.inner.death.wait() => Err(Error::ClosedPipe),
            Some(session) = async { self.inner.accept_rx.lock().await.recv().await } => Ok(session),
            _ = timeout => Err(Error::Timeout),
        }
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.inner.accept_deadline.write() = deadline;
    }

    pub fn close(&self) {
        if !self.inner.death.set(()) {
            return;
        }

        for session in self.inner.sessions.read().values() {
            session.close();
        }
    }

}

async fn read_loop(inner: Arc<ListenerInner>) {
    let mut buf = vec![0u8; inner.options.kcp.mtu];

    loop {
        tokio::select! {
            _ = inner.death.wait() => return,
            result = inner.socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, addr)) => demux(&inner, &buf[..n], addr),
                    Err(error) => {
                        log::warn!("kcp2k: listener socket read error: {error}");
                        inner.read_error.set(Error::Io(error));
                        for session in inner.sessions.read().values() {
                            session.close();
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn demux(inner: &Arc<ListenerInner>, datagram: &[u8], addr: SocketAddr) {
    let (header, body) = match Header::decode(datagram) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };

    let existing = inner.sessions.read().get(&addr).cloned();

    if let Some(session) = &existing {
        if session.is_authenticated() && session.cookie() != header.cookie {
            log::warn!("kcp2k: cookie mismatch from {addr}, dropping datagram");
            return;
        }
    }

    match header.channel {
        WireChannel::Reliable => {
            let session = match existing {
                Some(session) => session,
                None => spawn_new_session(inner, addr, body),
            };

            session.feed_inbox(body.to_vec());
        }
        WireChannel::Unreliable => {
            if let Some(session) = existing {
                session.deliver_unreliable(Bytes::copy_from_slice(body));
            }
        }
    }
}

/// A KCP segment's first four bytes are always its little-endian `conv`
/// field (see `ikcp_decode32u` in the reference implementation). A new
/// server-side session adopts whatever conv the peer picked, since `kcp`
/// rejects `input()` for any segment whose conv does not match the engine's
/// own — there is no separate negotiation step in this protocol.
fn peek_conv(segment: &[u8]) -> u32 {
    if segment.len() < 4 {
        return 0;
    }
    u32::from_le_bytes([segment[0], segment[1], segment[2], segment[3]])
}

fn spawn_new_session(inner: &Arc<ListenerInner>, addr: SocketAddr, first_body: &[u8]) -> Session {
    let conv = peek_conv(first_body);
    let session = Session::new(NewSessionArgs {
        remote_addr: addr,
        cookie: Some(cookie::generate()),
        conv,
        tx_queue: inner.tx_queue.clone(),
        timing: inner.options.timing,
        tuning: inner.options.kcp,
        app_queue_capacity: inner.options.capacities.app_queue,
        listener: Some(ListenerHandle(Arc::downgrade(inner))),
        initial_state: SessionState::Connected,
    });

    inner.sessions.write().insert(addr, session.clone());
    tokio::spawn(run_server_handshake(session.clone(), inner.accept_tx_for_handshake()));
    session
}

impl ListenerInner {
    fn accept_tx_for_handshake(&self) -> mpsc::Sender<Session> {
        self.accept_tx.clone()
    }
}

async fn run_server_handshake(session: Session, accept_tx: mpsc::Sender<Session>) {
    if session.await_handshake().await.is_err() {
        return;
    }

    if session.send_hello().is_err() {
        session.close();
        return;
    }

    // Accept-once: this is the only place a session is pushed to the
    // backlog, guarded by the handshake succeeding exactly once.
    if accept_tx.send(session.clone()).await.is_err() {
        session.close();
        return;
    }

    session.run_ping_loop().await;
}
