//! kcp2k session and transport plumbing: the KCP-over-UDP protocol engine,
//! independent of the server binary's configuration and statistics layers.

pub mod adapter;
pub mod client;
pub mod cookie;
pub mod error;
pub mod latch;
pub mod listener;
pub mod options;
pub mod pool;
pub mod session;
pub mod tx_queue;

pub use client::dial;
pub use error::Error;
pub use listener::Listener;
pub use options::{Capacities, DialOptions, KcpTuning, ListenerOptions, Timing};
pub use session::{Channel, Session};
