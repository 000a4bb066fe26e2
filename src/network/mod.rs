//! Network module - Handles the RCON session over TCP
//!
//! Provides:
//! - Connection management and frame I/O
//! - Correlation of replies with in-flight requests
//! - The session façade used by consumers

mod connection;
mod correlator;
mod session;

pub use connection::*;
pub use correlator::*;
pub use session::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long to wait for the server to answer an authentication request
    pub auth_timeout_ms: u64,
    /// Optional bound on waiting for a command reply
    pub command_timeout_ms: Option<u64>,
    /// Maximum declared frame size accepted from the server
    pub max_frame_size: usize,
    /// Capacity of the event channel
    pub event_buffer: usize,
    /// Emit a trace event for every frame sent and received
    pub trace_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            auth_timeout_ms: 10_000,
            command_timeout_ms: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_buffer: 256,
            trace_frames: false,
        }
    }
}

impl SessionConfig {
    pub fn with_command_timeout(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_frame_tracing(mut self) -> Self {
        self.trace_frames = true;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
