use std::fs::read_to_string;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct KcpTuning {
    #[serde(default = "KcpTuning::nodelay")]
    pub nodelay: bool,
    #[serde(default = "KcpTuning::interval")]
    pub interval: i32,
    #[serde(default = "KcpTuning::resend")]
    pub resend: i32,
    #[serde(default = "KcpTuning::no_congestion_window")]
    pub no_congestion_window: bool,
    #[serde(default = "KcpTuning::send_window")]
    pub send_window: u16,
    #[serde(default = "KcpTuning::recv_window")]
    pub recv_window: u16,
}

impl KcpTuning {
    fn nodelay() -> bool {
        true
    }

    fn interval() -> i32 {
        10
    }

    fn resend() -> i32 {
        2
    }

    fn no_congestion_window() -> bool {
        true
    }

    fn send_window() -> u16 {
        128
    }

    fn recv_window() -> u16 {
        128
    }
}

impl Default for KcpTuning {
    fn default() -> Self {
        Self {
            nodelay: Self::nodelay(),
            interval: Self::interval(),
            resend: Self::resend(),
            no_congestion_window: Self::no_congestion_window(),
            send_window: Self::send_window(),
            recv_window: Self::recv_window(),
        }
    }
}

impl KcpTuning {
    fn into_service(self, mtu: usize) -> kcp2k_service::KcpTuning {
        kcp2k_service::KcpTuning {
            nodelay: self.nodelay,
            interval: self.interval,
            resend: self.resend,
            no_congestion_window: self.no_congestion_window,
            send_window: self.send_window,
            recv_window: self.recv_window,
            mtu,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// the socket address this process binds its UDP listener to. Absent
    /// means the process only dials out, it does not accept peers.
    ///
    pub listen: Option<SocketAddr>,
    ///
    /// datagram size ceiling shared by the listener and every session it
    /// accepts.
    ///
    #[serde(default = "Server::mtu")]
    pub mtu: usize,
    #[serde(default = "Server::ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "Server::ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "Server::handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "Server::accept_backlog")]
    pub accept_backlog: usize,
    #[serde(default = "Server::app_queue_capacity")]
    pub app_queue_capacity: usize,
    #[serde(default = "Server::tx_queue_capacity")]
    pub tx_queue_capacity: usize,
    #[serde(default)]
    pub kcp: KcpTuning,
}

impl Server {
    fn mtu() -> usize {
        1500
    }

    fn ping_interval_ms() -> u64 {
        1000
    }

    fn ping_timeout_ms() -> u64 {
        5000
    }

    fn handshake_timeout_ms() -> u64 {
        5000
    }

    fn accept_backlog() -> usize {
        128
    }

    fn app_queue_capacity() -> usize {
        10
    }

    fn tx_queue_capacity() -> usize {
        kcp2k_service::tx_queue::TX_QUEUE_CAPACITY
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: None,
            mtu: Self::mtu(),
            ping_interval_ms: Self::ping_interval_ms(),
            ping_timeout_ms: Self::ping_timeout_ms(),
            handshake_timeout_ms: Self::handshake_timeout_ms(),
            accept_backlog: Self::accept_backlog(),
            app_queue_capacity: Self::app_queue_capacity(),
            tx_queue_capacity: Self::tx_queue_capacity(),
            kcp: KcpTuning::default(),
        }
    }
}

impl Server {
    pub fn listener_options(&self) -> kcp2k_service::ListenerOptions {
        use std::time::Duration;

        kcp2k_service::ListenerOptions {
            timing: kcp2k_service::Timing {
                ping_interval: Duration::from_millis(self.ping_interval_ms),
                ping_timeout: Duration::from_millis(self.ping_timeout_ms),
                handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            },
            capacities: kcp2k_service::Capacities {
                accept_backlog: self.accept_backlog,
                app_queue: self.app_queue_capacity,
                tx_queue: self.tx_queue_capacity,
            },
            kcp: self.kcp.into_service(self.mtu),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Api {
    #[serde(default = "Api::bind")]
    pub listen: SocketAddr,
}

impl Api {
    fn bind() -> SocketAddr {
        "127.0.0.1:3000".parse().unwrap()
    }
}

impl Default for Api {
    fn default() -> Self {
        Self { listen: Self::bind() }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub api: Option<Api>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: kcp2k-server --config /etc/kcp2k/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(&Cli::parse().config)?)?)
    }
}
