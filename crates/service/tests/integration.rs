//! Cross-module integration tests: a real `Listener` bound to a loopback
//! port, exercised by one or more dialed clients over real UDP sockets.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::time::{Duration, Instant};

use kcp2k_service::{Channel, DialOptions, ListenerOptions, Listener};

async fn bind_loopback(options: ListenerOptions) -> (Listener, SocketAddr) {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), options)
        .await
        .expect("bind on an ephemeral loopback port should never fail");
    let addr = listener.local_addr().expect("a bound socket always has a local address");
    (listener, addr)
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_and_echo_round_trip() {
    let (listener, listen_addr) = bind_loopback(ListenerOptions::default()).await;

    let accept_task = tokio::spawn(async move { listener.accept().await });

    let client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("dial should complete the handshake");

    let server_session = accept_task
        .await
        .expect("accept task should not panic")
        .expect("accept should yield the dialed session");

    assert!(server_session.is_authenticated());
    assert!(client.is_authenticated());

    client
        .send(b"ok", Channel::Reliable)
        .await
        .expect("reliable send from client should succeed");

    let mut buf = [0u8; 32];
    let (n, channel) = server_session
        .read(&mut buf)
        .await
        .expect("server should observe the client's reliable data");
    assert_eq!(channel, Channel::Reliable);
    assert_eq!(&buf[..n], b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn reliable_stream_preserves_order_across_many_sends() {
    let (listener, listen_addr) = bind_loopback(ListenerOptions::default()).await;

    let accept_task = tokio::spawn(async move { listener.accept().await });
    let client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("dial should complete the handshake");
    let server_session = accept_task.await.unwrap().unwrap();

    let messages: Vec<String> = (0..200).map(|i| format!("msg-{i}-")).collect();
    for message in &messages {
        client
            .send(message.as_bytes(), Channel::Reliable)
            .await
            .expect("reliable send should succeed");
    }

    let expected: String = messages.concat();
    let mut received = Vec::new();
    let mut buf = [0u8; 64];

    while received.len() < expected.len() {
        let (n, channel) = server_session
            .read(&mut buf)
            .await
            .expect("server should keep observing reliable bytes in order");
        assert_eq!(channel, Channel::Reliable);
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(String::from_utf8(received).unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreliable_buffer_too_small_discards_the_message() {
    let (listener, listen_addr) = bind_loopback(ListenerOptions::default()).await;

    let accept_task = tokio::spawn(async move { listener.accept().await });
    let client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("dial should complete the handshake");
    let server_session = accept_task.await.unwrap().unwrap();

    let payload = vec![7u8; 100];
    client
        .send(&payload, Channel::Unreliable)
        .await
        .expect("unreliable send should succeed");

    // Give the datagram time to land before the too-small read.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut small = [0u8; 50];
    let err = server_session
        .read(&mut small)
        .await
        .expect_err("a buffer smaller than the payload must fail, not truncate");
    assert!(matches!(err, kcp2k_service::Error::BufferSmall));

    server_session.set_read_deadline(Some(Instant::now() + Duration::from_millis(200)));
    let mut big = [0u8; 128];
    let result = server_session.read(&mut big).await;
    assert!(
        matches!(result, Err(kcp2k_service::Error::Timeout)),
        "the discarded payload must not be redelivered on a later, larger read"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_cookie_from_a_spoofed_port_is_dropped() {
    let (listener, listen_addr) = bind_loopback(ListenerOptions::default()).await;

    let accept_task = tokio::spawn(async move { listener.accept().await });
    let client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("dial should complete the handshake");
    let server_session = accept_task.await.unwrap().unwrap();
    let real_cookie = server_session.cookie();

    // A third party, from a different ephemeral port, sends a datagram
    // carrying an all-zero cookie and an arbitrary reliable-looking body.
    // It is indistinguishable from any other brand-new peer's first packet
    // (sessions are keyed by address, not cookie, until authenticated), so
    // it bootstraps its own doomed session rather than touching the
    // legitimate one — the cookie it carries is simply never consulted
    // because there is nothing yet to compare it against.
    let attacker = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    attacker.connect(listen_addr).unwrap();
    let mut spoofed = vec![1u8, 0, 0, 0, 0]; // channel=Reliable, cookie=zeros
    spoofed.extend_from_slice(&[9, 9, 9, 9]);
    attacker.send(&spoofed).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The legitimate session's cookie and state are unaffected.
    assert_eq!(server_session.cookie(), real_cookie);
    assert!(server_session.is_authenticated());

    // The legitimate session's own channel keeps working undisturbed.
    client
        .send(b"still-me", Channel::Reliable)
        .await
        .expect("the legitimate client's reliable channel must be unaffected");
    let mut buf = [0u8; 32];
    let (n, _) = server_session.read(&mut buf).await.expect("real traffic still arrives");
    assert_eq!(&buf[..n], b"still-me");
}

#[tokio::test(flavor = "multi_thread")]
async fn liveness_timeout_closes_an_unresponsive_peer() {
    let timing = kcp2k_service::Timing {
        ping_interval: Duration::from_millis(50),
        ping_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(2000),
    };
    let (listener, listen_addr) = bind_loopback(ListenerOptions {
        timing,
        ..ListenerOptions::default()
    })
    .await;

    let accept_task = tokio::spawn(async move { listener.accept().await });
    let client = kcp2k_service::dial(
        listen_addr,
        DialOptions {
            timing,
            ..DialOptions::default()
        },
    )
    .await
    .expect("dial should complete the handshake");

    let server_session = accept_task.await.unwrap().unwrap();

    // Drop the client outright; its ping loop (and its socket) go away with
    // it, so the server stops observing any liveness traffic.
    drop(client);

    let mut buf = [0u8; 32];
    server_session.set_read_deadline(Some(Instant::now() + Duration::from_secs(2)));
    let err = server_session
        .read(&mut buf)
        .await
        .expect_err("an unresponsive peer must be closed within a few ping intervals");
    assert!(matches!(err, kcp2k_service::Error::ClosedPipe));
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_close_is_observed_and_listener_keeps_accepting() {
    let (listener, listen_addr) = bind_loopback(ListenerOptions::default()).await;

    let first_client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("first dial should complete the handshake");
    let server_session = listener.accept().await.expect("listener should accept the first peer");

    first_client.close();

    let mut buf = [0u8; 32];
    server_session.set_read_deadline(Some(Instant::now() + Duration::from_secs(1)));
    let err = server_session
        .read(&mut buf)
        .await
        .expect_err("the peer's close should surface as ClosedPipe");
    assert!(matches!(err, kcp2k_service::Error::ClosedPipe));

    // The listener itself must be unaffected by one peer's teardown.
    let second_client = kcp2k_service::dial(listen_addr, DialOptions::default())
        .await
        .expect("second dial should also complete the handshake");
    let second_session = listener
        .accept()
        .await
        .expect("listener should still accept new peers after a prior peer closed");
    assert!(second_session.is_authenticated());
    assert!(second_client.is_authenticated());
}
