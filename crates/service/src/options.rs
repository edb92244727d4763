use std::time::Duration;

/// Timing and capacity constants shared by every session, regardless of
/// whether it was accepted by a [`crate::Listener`] or produced by
/// [`crate::dial`].
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(1000),
            ping_timeout: Duration::from_millis(5000),
            handshake_timeout: Duration::from_millis(5000),
        }
    }
}

/// Queue capacities shared by every session.
#[derive(Debug, Clone, Copy)]
pub struct Capacities {
    pub accept_backlog: usize,
    pub app_queue: usize,
    pub tx_queue: usize,
}

impl Default for Capacities {
    fn default() -> Self {
        Self {
            accept_backlog: 128,
            app_queue: 10,
            tx_queue: crate::tx_queue::TX_QUEUE_CAPACITY,
        }
    }
}

/// Tuning knobs forwarded verbatim to the KCP engine. Defaults pick the
/// "fast" profile common to game transports built on KCP: small flush
/// interval, aggressive fast-retransmit, no congestion-window throttling,
/// favoring latency over bandwidth fairness.
#[derive(Debug, Clone, Copy)]
pub struct KcpTuning {
    pub nodelay: bool,
    pub interval: i32,
    pub resend: i32,
    pub no_congestion_window: bool,
    pub send_window: u16,
    pub recv_window: u16,
    pub mtu: usize,
}

impl Default for KcpTuning {
    fn default() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            resend: 2,
            no_congestion_window: true,
            send_window: 128,
            recv_window: 128,
            mtu: 1500,
        }
    }
}

/// Options accepted by [`crate::Listener::bind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    pub timing: Timing,
    pub capacities: Capacities,
    pub kcp: KcpTuning,
}

/// Options accepted by [`crate::dial`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DialOptions {
    pub timing: Timing,
    pub kcp: KcpTuning,
}
