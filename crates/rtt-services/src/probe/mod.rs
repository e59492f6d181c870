//! Probe connections.
//!
//! The primary port hands every connection straight to the [`ProbeHandler`].
//! Multiplexed ports first classify the connection: a decoy liveness check
//! is echoed and closed, a silent client is a real probe.

mod listener;
mod mux;
mod session;
pub mod tcp_info;

pub use listener::ProbeListener;
pub use mux::{classify, Classification, MuxListener};
pub use session::{merge_record, ProbeHandler};
pub use tcp_info::{kernel_rtt, KernelRtt, RttError};

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use rtt_core::config::RttConfig;
use rtt_core::geo::Coordinates;

/// Takes ownership of an accepted connection and runs it to completion.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr);
}

/// Per-session timing and location parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    /// Deadline for the whole one-byte handshake.
    pub io_timeout: Duration,
    pub rtt_poll_interval: Duration,
    pub rtt_poll_deadline: Duration,
    /// Minimum interval between external measurements per address.
    pub cooldown: Duration,
    pub server: Coordinates,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from_config(&RttConfig::default())
    }
}

impl ProbeSettings {
    pub fn from_config(config: &RttConfig) -> Self {
        Self {
            io_timeout: config.probe.io_timeout(),
            rtt_poll_interval: config.probe.rtt_poll_interval(),
            rtt_poll_deadline: config.probe.rtt_poll_deadline(),
            cooldown: config.measurement.cooldown(),
            server: config.server.coordinates(),
        }
    }
}
