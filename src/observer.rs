//! Session lifecycle logging and statistics registration, split out of the
//! accept loop so `lib.rs::startup` stays a plain orchestration function.

use std::net::SocketAddr;

use crate::statistics::{Event, Statistics};

#[derive(Clone)]
pub struct Observer {
    statistics: Statistics,
}

impl Observer {
    pub fn new(statistics: Statistics) -> Self {
        Self { statistics }
    }

    pub fn on_authenticated(&self, addr: SocketAddr) {
        log::info!("kcp2k: session authenticated addr={addr}");
        self.statistics.register(addr);
    }

    pub fn on_closed(&self, addr: SocketAddr) {
        log::info!("kcp2k: session closed addr={addr}");
        self.statistics.unregister(&addr);
    }

    pub fn on_reliable_rx(&self, addr: SocketAddr, bytes: usize) {
        self.statistics.report(&addr, Event::ReliableRx(bytes));
    }

    pub fn on_reliable_tx(&self, addr: SocketAddr, bytes: usize) {
        self.statistics.report(&addr, Event::ReliableTx(bytes));
    }

    pub fn on_unreliable_rx(&self, addr: SocketAddr, bytes: usize) {
        self.statistics.report(&addr, Event::UnreliableRx(bytes));
    }

    pub fn on_unreliable_tx(&self, addr: SocketAddr, bytes: usize) {
        self.statistics.report(&addr, Event::UnreliableTx(bytes));
    }
}
