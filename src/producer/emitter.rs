//! UDP record emitter

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::error::Result;
use crate::event::Record;

/// Sends records as single JSON datagrams to one target
pub struct UdpEmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpEmitter {
    /// Bind an ephemeral local socket for sending to `target`
    pub async fn bind(target: SocketAddr) -> Result<Self> {
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;

        Ok(Self { socket, target })
    }

    /// Destination address
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Encode and send one record. Returns the datagram size.
    pub async fn send(&self, record: &Record) -> Result<usize> {
        let payload = serde_json::to_vec(record)?;
        Ok(self.socket.send_to(&payload, self.target).await?)
    }
}
