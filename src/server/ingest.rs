//! UDP ingest listener
//!
//! Receives one datagram at a time, turns it into a [`SharedEvent`] and pushes
//! it onto every active subscriber's queue. Everything between `recv_from`
//! returning and the next `recv_from` is synchronous: a slow subscriber costs
//! at most one failed `try_send`, never a wait.

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::{self, SharedEvent};
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::server::config::RelayConfig;
use crate::stats::{RelayMetrics, UdpDropCounter};

/// Result of pushing one event to all subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers that accepted the event
    pub delivered: usize,
    /// Subscribers whose queue refused it
    pub dropped: usize,
}

/// Push an event to every subscriber without waiting
///
/// A full or closed queue costs that subscriber this one event and nothing
/// else.
pub fn broadcast(subscribers: &[Arc<Subscriber>], event: &SharedEvent) -> BroadcastOutcome {
    let mut outcome = BroadcastOutcome::default();

    for subscriber in subscribers {
        match subscriber.try_enqueue(event.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(_) => outcome.dropped += 1,
        }
    }

    outcome
}

/// Bind the ingest socket with SO_REUSEADDR and a large receive buffer
pub fn bind_udp(addr: SocketAddr, recv_buffer: usize) -> Result<UdpSocket> {
    create_socket(addr, recv_buffer).map_err(|e| Error::bind(addr, e))
}

fn create_socket(addr: SocketAddr, recv_buffer: usize) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    if recv_buffer > 0 {
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
            tracing::warn!(
                error = %e,
                requested_size = recv_buffer,
                "Failed to set UDP SO_RCVBUF"
            );
        }
    }

    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// UDP ingest listener
pub struct IngestListener {
    socket: UdpSocket,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<RelayMetrics>,
    max_datagram_size: usize,
}

impl IngestListener {
    pub fn new(
        socket: UdpSocket,
        config: &RelayConfig,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            socket,
            registry,
            metrics,
            max_datagram_size: config.max_datagram_size,
        }
    }

    /// Bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Kernel drop counter for this listener's socket
    pub fn drop_counter(&self) -> UdpDropCounter {
        UdpDropCounter::for_socket(&self.socket)
    }

    /// Receive until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        // One spare byte so an oversized datagram is visible as such
        let mut buf = vec![0u8; self.max_datagram_size + 1];

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => {
                        self.handle_datagram(&buf[..len], peer);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "UDP recv error");
                    }
                },
            }
        }

        tracing::debug!("Ingest listener stopped");
    }

    /// Decode, augment and broadcast one datagram
    ///
    /// Returns `None` if the payload was not a valid event.
    pub fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) -> Option<BroadcastOutcome> {
        self.metrics.record_received();

        let event = match SharedEvent::from_datagram(
            payload,
            self.max_datagram_size,
            peer.ip(),
            event::now_millis(),
        ) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_malformed();
                tracing::trace!(peer = %peer, size = payload.len(), error = %e, "Discarding datagram");
                return None;
            }
        };

        let outcome = broadcast(&self.registry.snapshot(), &event);
        self.metrics.record_dropped(outcome.dropped as u64);

        Some(outcome)
    }
}
