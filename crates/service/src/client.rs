//! The client half: `dial` owns a single ephemeral socket scoped to exactly
//! one session, with no session table or accept backlog.

use std::net::SocketAddr;
use std::sync::Arc;

use kcp2k_codec::{Channel as WireChannel, Header};
use tokio::net::UdpSocket;

use crate::cookie;
use crate::error::Error;
use crate::options::DialOptions;
use crate::pool::BufferPool;
use crate::session::{NewSessionArgs, Session, SessionState};
use crate::tx_queue::TxQueue;

/// Dials a kcp2k listener. Blocks until the handshake completes or
/// `options.timing.handshake_timeout` elapses.
pub async fn dial(remote_addr: SocketAddr, options: DialOptions) -> Result<Session, Error> {
    let local_addr: SocketAddr = if remote_addr.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    }
    .parse()
    .expect("hardcoded address parses");

    let socket = Arc::new(UdpSocket::bind(local_addr).await?);
    socket.connect(remote_addr).await?;

    let pool = Arc::new(BufferPool::new(options.kcp.mtu));
    let (tx_queue, tx_rx, write_error) = TxQueue::new(pool.clone());

    tokio::spawn(crate::tx_queue::run_send_loop(socket.clone(), tx_rx, pool, write_error));

    let session = Session::new(NewSessionArgs {
        remote_addr,
        // The server generates the cookie; this side learns and locks it
        // off the server's first datagram (see `read_loop`), so it starts
        // unset here.
        cookie: None,
        conv: cookie::generate_conv(),
        tx_queue,
        timing: options.timing,
        tuning: options.kcp,
        app_queue_capacity: 10,
        listener: None,
        initial_state: SessionState::Connected,
    });

    tokio::spawn(read_loop(socket, session.clone()));

    session.send_hello()?;
    session.await_handshake().await?;
    tokio::spawn({
        let session = session.clone();
        async move { session.run_ping_loop().await }
    });

    Ok(session)
}

async fn read_loop(socket: Arc<UdpSocket>, session: Session) {
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(error) => {
                log::warn!("kcp2k: dial socket read error: {error}");
                return;
            }
        };

        let (header, body) = match Header::decode(&buf[..n]) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };

        // Learn and lock the server's cookie off its first datagram; a
        // no-op on every later call once it is already locked.
        session.learn_cookie(header.cookie);

        if session.is_authenticated() && session.cookie() != header.cookie {
            log::warn!("kcp2k: cookie mismatch on dialed session, dropping datagram");
            continue;
        }

        match header.channel {
            WireChannel::Reliable => session.feed_inbox(body.to_vec()),
            WireChannel::Unreliable => {
                session.deliver_unreliable(bytes::Bytes::copy_from_slice(body));
            }
        }
    }
}
