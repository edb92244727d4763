use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

/// [issue](https://github.com/mycrl/turn-rs/issues/101)
///
/// Integrated Prometheus Metrics Exporter
#[cfg(feature = "prometheus")]
pub mod prometheus {
    use std::sync::LazyLock;

    use anyhow::Result;
    use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder, register_int_counter, register_int_gauge};

    use super::Event;

    // The `register_int_counter` macro would be too long if written out in full,
    // with too many line breaks after formatting, and this is wrapped directly into
    // a macro again.
    macro_rules! counter {
        ($operation:expr, $dst:expr) => {
            register_int_counter!(
                format!("kcp2k_{}_{}", $operation, $dst),
                format!("The amount of {} {}", $dst, $operation)
            )
        };
    }

    pub static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::default);

    pub struct Metrics {
        pub active_sessions: IntGauge,
        pub reliable_rx_bytes: IntCounter,
        pub reliable_tx_bytes: IntCounter,
        pub unreliable_rx_bytes: IntCounter,
        pub unreliable_tx_bytes: IntCounter,
        pub dropped: IntCounter,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new().expect("unable to initialize prometheus metrics")
        }
    }

    impl Metrics {
        pub fn new() -> Result<Self> {
            Ok(Self {
                active_sessions: register_int_gauge!("kcp2k_active_sessions", "Currently authenticated sessions")?,
                reliable_rx_bytes: counter!("received", "reliable_bytes")?,
                reliable_tx_bytes: counter!("sent", "reliable_bytes")?,
                unreliable_rx_bytes: counter!("received", "unreliable_bytes")?,
                unreliable_tx_bytes: counter!("sent", "unreliable_bytes")?,
                dropped: register_int_counter!("kcp2k_dropped_datagrams", "Datagrams dropped before reaching a session")?,
            })
        }

        pub fn observe(&self, event: &Event) {
            match event {
                Event::ReliableRx(n) => self.reliable_rx_bytes.inc_by(*n as u64),
                Event::ReliableTx(n) => self.reliable_tx_bytes.inc_by(*n as u64),
                Event::UnreliableRx(n) => self.unreliable_rx_bytes.inc_by(*n as u64),
                Event::UnreliableTx(n) => self.unreliable_tx_bytes.inc_by(*n as u64),
                Event::DroppedShortDatagram
                | Event::DroppedBadCookie
                | Event::DroppedUnknownChannel
                | Event::DroppedPreAuth
                | Event::DroppedBufferSmall => self.dropped.inc(),
            }
        }
    }

    /// Generate prometheus metrics data that externally needs to be exposed to
    /// the `/metrics` route.
    pub fn generate_metrics(buf: &mut Vec<u8>) -> Result<()> {
        TextEncoder::new().encode(&prometheus::gather(), buf)?;
        Ok(())
    }
}

/// Events reported by a session or the listener's demux as they happen.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    ReliableRx(usize),
    ReliableTx(usize),
    UnreliableRx(usize),
    UnreliableTx(usize),
    DroppedShortDatagram,
    DroppedBadCookie,
    DroppedUnknownChannel,
    DroppedPreAuth,
    DroppedBufferSmall,
}

trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-session counters. Drop counters are attributed to the session once it
/// exists; drops observed before a session is created (short datagrams,
/// unknown channel bytes from nobody's peer) only reach the process-wide
/// Prometheus counters, not any row in this table.
#[derive(Default)]
pub struct Counters {
    reliable_rx_datagrams: Count,
    reliable_rx_bytes: Count,
    reliable_tx_datagrams: Count,
    reliable_tx_bytes: Count,
    unreliable_rx_datagrams: Count,
    unreliable_rx_bytes: Count,
    unreliable_tx_datagrams: Count,
    unreliable_tx_bytes: Count,
    dropped_bad_cookie: Count,
    dropped_pre_auth: Count,
    dropped_buffer_small: Count,
}

impl Counters {
    fn observe(&self, event: &Event) {
        match event {
            Event::ReliableRx(n) => {
                self.reliable_rx_datagrams.add(1);
                self.reliable_rx_bytes.add(*n);
            }
            Event::ReliableTx(n) => {
                self.reliable_tx_datagrams.add(1);
                self.reliable_tx_bytes.add(*n);
            }
            Event::UnreliableRx(n) => {
                self.unreliable_rx_datagrams.add(1);
                self.unreliable_rx_bytes.add(*n);
            }
            Event::UnreliableTx(n) => {
                self.unreliable_tx_datagrams.add(1);
                self.unreliable_tx_bytes.add(*n);
            }
            Event::DroppedBadCookie => self.dropped_bad_cookie.add(1),
            Event::DroppedPreAuth => self.dropped_pre_auth.add(1),
            Event::DroppedBufferSmall => self.dropped_buffer_small.add(1),
            Event::DroppedShortDatagram | Event::DroppedUnknownChannel => {}
        }
    }

    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            reliable_rx_datagrams: self.reliable_rx_datagrams.get(),
            reliable_rx_bytes: self.reliable_rx_bytes.get(),
            reliable_tx_datagrams: self.reliable_tx_datagrams.get(),
            reliable_tx_bytes: self.reliable_tx_bytes.get(),
            unreliable_rx_datagrams: self.unreliable_rx_datagrams.get(),
            unreliable_rx_bytes: self.unreliable_rx_bytes.get(),
            unreliable_tx_datagrams: self.unreliable_tx_datagrams.get(),
            unreliable_tx_bytes: self.unreliable_tx_bytes.get(),
            dropped_bad_cookie: self.dropped_bad_cookie.get(),
            dropped_pre_auth: self.dropped_pre_auth.get(),
            dropped_buffer_small: self.dropped_buffer_small.get(),
        }
    }
}

#[derive(Serialize, Clone, Copy)]
pub struct CountersSnapshot {
    pub reliable_rx_datagrams: usize,
    pub reliable_rx_bytes: usize,
    pub reliable_tx_datagrams: usize,
    pub reliable_tx_bytes: usize,
    pub unreliable_rx_datagrams: usize,
    pub unreliable_rx_bytes: usize,
    pub unreliable_tx_datagrams: usize,
    pub unreliable_tx_bytes: usize,
    pub dropped_bad_cookie: usize,
    pub dropped_pre_auth: usize,
    pub dropped_buffer_small: usize,
}

/// Listener-wide session table, sharded by remote address exactly like the
/// session table it shadows.
#[derive(Clone)]
pub struct Statistics(Arc<RwLock<AHashMap<SocketAddr, Counters>>>);

impl Default for Statistics {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(AHashMap::new())))
    }
}

impl Statistics {
    pub fn register(&self, addr: SocketAddr) {
        #[cfg(feature = "prometheus")]
        {
            self::prometheus::METRICS.active_sessions.inc();
        }

        self.0.write().insert(addr, Counters::default());
    }

    pub fn unregister(&self, addr: &SocketAddr) {
        #[cfg(feature = "prometheus")]
        {
            self::prometheus::METRICS.active_sessions.dec();
        }

        self.0.write().remove(addr);
    }

    /// Records an event against a session's row, and against the process-wide
    /// Prometheus counters when that feature is enabled. Called for a session
    /// no longer in the table (a race with `unregister`) is a harmless no-op.
    pub fn report(&self, addr: &SocketAddr, event: Event) {
        #[cfg(feature = "prometheus")]
        {
            self::prometheus::METRICS.observe(&event);
        }

        if let Some(counters) = self.0.read().get(addr) {
            counters.observe(&event);
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<CountersSnapshot> {
        self.0.read().get(addr).map(Counters::snapshot)
    }

    pub fn snapshot_all(&self) -> Vec<(SocketAddr, CountersSnapshot)> {
        self.0.read().iter().map(|(addr, counters)| (*addr, counters.snapshot())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_report_then_unregister() {
        let stats = Statistics::default();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        stats.register(addr);
        stats.report(&addr, Event::ReliableRx(64));
        stats.report(&addr, Event::ReliableRx(16));

        let snapshot = stats.get(&addr).unwrap();
        assert_eq!(snapshot.reliable_rx_datagrams, 2);
        assert_eq!(snapshot.reliable_rx_bytes, 80);

        stats.unregister(&addr);
        assert!(stats.get(&addr).is_none());
    }

    #[test]
    fn report_for_unknown_address_is_a_no_op() {
        let stats = Statistics::default();
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        stats.report(&addr, Event::ReliableRx(1));
        assert!(stats.get(&addr).is_none());
    }
}
