//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::registry::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLACE_WAIT};
use crate::registry::RegistryConfig;

/// Default UDP ingest port
pub const DEFAULT_UDP_PORT: u16 = 20000;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 8765;

/// Largest UDP payload over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// UDP ingest address
    pub udp_bind_addr: SocketAddr,

    /// WebSocket listen address
    pub ws_bind_addr: SocketAddr,

    /// Per-subscriber delivery queue capacity
    pub queue_capacity: usize,

    /// Time between liveness probes
    pub heartbeat_interval: Duration,

    /// How long to wait for a pong
    pub heartbeat_timeout: Duration,

    /// Stats reporting interval
    pub stats_interval: Duration,

    /// SO_RCVBUF for the ingest socket (0 = OS default)
    pub udp_recv_buffer: usize,

    /// Largest datagram accepted as an event
    pub max_datagram_size: usize,

    /// Largest frame accepted from a subscriber
    pub max_inbound_message_size: usize,

    /// Bound on a single outbound send
    pub send_timeout: Duration,

    /// Bound on waiting for a replaced subscriber to close
    pub replace_wait: Duration,

    /// Maximum concurrent subscribers (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY on subscriber sockets
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            udp_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_UDP_PORT)),
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_WS_PORT)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(5),
            udp_recv_buffer: 4 * 1024 * 1024, // 4MB
            max_datagram_size: MAX_UDP_PAYLOAD,
            max_inbound_message_size: 1024 * 1024,
            send_timeout: Duration::from_secs(10),
            replace_wait: DEFAULT_REPLACE_WAIT,
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
        }
    }
}

impl RelayConfig {
    /// Set the UDP ingest address
    pub fn udp_bind(mut self, addr: SocketAddr) -> Self {
        self.udp_bind_addr = addr;
        self
    }

    /// Set the WebSocket listen address
    pub fn ws_bind(mut self, addr: SocketAddr) -> Self {
        self.ws_bind_addr = addr;
        self
    }

    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set heartbeat interval and timeout
    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the stats interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Set the ingest socket receive buffer
    pub fn udp_recv_buffer(mut self, bytes: usize) -> Self {
        self.udp_recv_buffer = bytes;
        self
    }

    /// Set the largest accepted datagram (capped at the UDP maximum)
    pub fn max_datagram_size(mut self, bytes: usize) -> Self {
        self.max_datagram_size = bytes.min(MAX_UDP_PAYLOAD);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the replace wait bound
    pub fn replace_wait(mut self, wait: Duration) -> Self {
        self.replace_wait = wait;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".into()));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(Error::Config("heartbeat interval and timeout must be non-zero".into()));
        }
        if self.stats_interval.is_zero() {
            return Err(Error::Config("stats interval must be non-zero".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(Error::Config("send timeout must be non-zero".into()));
        }
        if self.max_datagram_size == 0 {
            return Err(Error::Config("max datagram size must be non-zero".into()));
        }
        Ok(())
    }

    /// Registry settings derived from this config
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default()
            .queue_capacity(self.queue_capacity)
            .replace_wait(self.replace_wait)
    }
}
