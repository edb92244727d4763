#[cfg(feature = "api")]
pub mod api;

pub mod config;
pub mod observer;
pub mod statistics;

use std::sync::Arc;

use kcp2k_service::{Channel, Listener};

use self::config::Config;
use self::observer::Observer;
use self::statistics::Statistics;

/// In order to let the integration tests directly use this crate and start
/// the server, a function is exposed to replace `main` and start the server
/// directly.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let statistics = Statistics::default();
    let observer = Observer::new(statistics.clone());

    let listen = config.server.listen.expect("startup called without a listen address");
    let listener = Listener::bind(listen, config.server.listener_options()).await?;

    log::info!("kcp2k server listening addr={listen}");

    tokio::spawn(accept_loop(listener, observer));

    #[cfg(feature = "api")]
    if config.api.is_some() {
        api::start_server(config.clone(), statistics).await?;
    }

    // Keep the process alive once the accept loop is running and the api
    // server (if any) has returned control here.
    std::future::pending::<()>().await;
    Ok(())
}

async fn accept_loop(listener: Listener, observer: Observer) {
    loop {
        match listener.accept().await {
            Ok(session) => {
                observer.on_authenticated(session.remote_addr());
                tokio::spawn(echo_session(session, observer.clone()));
            }
            Err(error) => {
                log::error!("kcp2k: accept loop stopped: {error}");
                return;
            }
        }
    }
}

/// Reference session handler: echoes every reliable and unreliable payload
/// back to its sender on the same channel, recording traffic in the
/// statistics table along the way. A real deployment swaps this out for its
/// own application protocol on top of [`kcp2k_service::Session::read`] and
/// [`kcp2k_service::Session::send`].
async fn echo_session(session: kcp2k_service::Session, observer: Observer) {
    let addr = session.remote_addr();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let (n, channel) = match session.read(&mut buf).await {
            Ok(result) => result,
            Err(_) => break,
        };

        match channel {
            Channel::Reliable => observer.on_reliable_rx(addr, n),
            Channel::Unreliable => observer.on_unreliable_rx(addr, n),
        }

        if session.send(&buf[..n], channel).await.is_err() {
            break;
        }

        match channel {
            Channel::Reliable => observer.on_reliable_tx(addr, n),
            Channel::Unreliable => observer.on_unreliable_tx(addr, n),
        }
    }

    observer.on_closed(addr);
}
