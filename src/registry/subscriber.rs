//! Subscriber handle
//!
//! The registry-facing half of one subscriber connection: the sending side of
//! its bounded delivery queue plus the signals used to tear it down. The
//! receiving side of the queue is owned by the subscriber's writer task.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::SharedEvent;
use crate::session::state::{LivenessTracker, TeardownReason};

/// Receiving half of a subscriber's delivery queue
pub type DeliveryReceiver = mpsc::Receiver<SharedEvent>;

/// Why an event could not be queued for a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// Queue is at capacity
    #[error("delivery queue full")]
    Full,
    /// Writer is gone (subscriber tearing down)
    #[error("delivery queue closed")]
    Closed,
}

/// One active subscriber
#[derive(Debug)]
pub struct Subscriber {
    /// Unique session ID
    session_id: u64,

    /// Remote endpoint of the connection
    peer_addr: SocketAddr,

    /// Sending half of the delivery queue
    sender: mpsc::Sender<SharedEvent>,

    /// Highest queue depth seen since the last report
    peak_depth: AtomicUsize,

    /// Probe/pong state shared by heartbeat and connection reader
    liveness: LivenessTracker,

    /// Cancels the writer, heartbeat and reader of this subscriber
    shutdown: CancellationToken,

    /// First teardown reason recorded
    reason: OnceLock<TeardownReason>,
}

impl Subscriber {
    /// Create a subscriber and its delivery queue
    ///
    /// `shutdown` is usually a child of the server's shutdown token.
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, DeliveryReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let subscriber = Arc::new(Self {
            session_id,
            peer_addr,
            sender,
            peak_depth: AtomicUsize::new(0),
            liveness: LivenessTracker::new(),
            shutdown,
            reason: OnceLock::new(),
        });

        (subscriber, receiver)
    }

    /// Session ID
    #[inline]
    pub fn id(&self) -> u64 {
        self.session_id
    }

    /// Remote endpoint
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Address used for one-connection-per-address tracking
    ///
    /// IPv4-mapped IPv6 addresses are folded to IPv4 so dual-stack listeners
    /// see one identity per host.
    #[inline]
    pub fn address(&self) -> IpAddr {
        self.peer_addr.ip().to_canonical()
    }

    /// Queue an event without waiting
    #[inline]
    pub fn try_enqueue(&self, event: SharedEvent) -> Result<(), EnqueueError> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.peak_depth.fetch_max(self.queue_depth(), Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Events currently queued
    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Queue capacity
    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Highest depth since the previous call; resets the mark to the current depth
    pub fn take_peak_depth(&self) -> usize {
        let current = self.queue_depth();
        self.peak_depth.swap(current, Ordering::Relaxed).max(current)
    }

    /// Liveness tracker
    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// Request teardown. The first reason wins; later calls only re-cancel.
    ///
    /// Returns true if this call recorded the reason.
    pub fn close(&self, reason: TeardownReason) -> bool {
        let recorded = self.reason.set(reason).is_ok();
        self.shutdown.cancel();
        recorded
    }

    /// Reason recorded by [`close`](Self::close), if any
    pub fn teardown_reason(&self) -> Option<TeardownReason> {
        self.reason.get().copied()
    }

    /// Whether teardown has been requested (directly or by server shutdown)
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once teardown has been requested
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    /// Resolves once the connection has finished closing its stream
    pub async fn wait_closed(&self) {
        self.liveness.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn peer(last: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), port)
    }

    fn event(n: u32) -> SharedEvent {
        let payload = format!(r#"{{"n":{}}}"#, n);
        SharedEvent::from_datagram(payload.as_bytes(), 1024, peer(1, 1).ip(), 0).unwrap()
    }

    #[test]
    fn test_enqueue_until_full() {
        let (subscriber, _rx) = Subscriber::new(1, peer(9, 4000), 3, CancellationToken::new());

        for n in 0..3 {
            assert_eq!(subscriber.try_enqueue(event(n)), Ok(()));
        }
        assert_eq!(subscriber.try_enqueue(event(3)), Err(EnqueueError::Full));
        assert_eq!(subscriber.queue_depth(), 3);
        assert_eq!(subscriber.queue_capacity(), 3);
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (subscriber, rx) = Subscriber::new(1, peer(9, 4000), 3, CancellationToken::new());
        drop(rx);

        assert_eq!(subscriber.try_enqueue(event(0)), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (subscriber, mut rx) = Subscriber::new(1, peer(9, 4000), 8, CancellationToken::new());
        for n in 0..5 {
            subscriber.try_enqueue(event(n)).unwrap();
        }

        for n in 0..5 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received, event(n));
        }
        assert_eq!(subscriber.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_peak_depth_tracks_high_water_mark() {
        let (subscriber, mut rx) = Subscriber::new(1, peer(9, 4000), 8, CancellationToken::new());
        for n in 0..4 {
            subscriber.try_enqueue(event(n)).unwrap();
        }
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        assert_eq!(subscriber.queue_depth(), 1);
        assert_eq!(subscriber.take_peak_depth(), 4);
        // Mark resets to the current depth
        assert_eq!(subscriber.take_peak_depth(), 1);
    }

    #[test]
    fn test_close_first_reason_wins() {
        let (subscriber, _rx) = Subscriber::new(1, peer(9, 4000), 1, CancellationToken::new());
        assert!(!subscriber.is_closing());
        assert!(subscriber.teardown_reason().is_none());

        assert!(subscriber.close(TeardownReason::Replaced));
        assert!(!subscriber.close(TeardownReason::PeerClosed));

        assert!(subscriber.is_closing());
        assert_eq!(subscriber.teardown_reason(), Some(TeardownReason::Replaced));
    }

    #[test]
    fn test_parent_cancellation_closes_without_reason() {
        let parent = CancellationToken::new();
        let (subscriber, _rx) = Subscriber::new(1, peer(9, 4000), 1, parent.child_token());

        parent.cancel();

        assert!(subscriber.is_closing());
        assert!(subscriber.teardown_reason().is_none());
    }

    #[test]
    fn test_address_ignores_port_and_mapping() {
        let (a, _rx_a) = Subscriber::new(1, peer(9, 1111), 1, CancellationToken::new());
        let (b, _rx_b) = Subscriber::new(2, peer(9, 2222), 1, CancellationToken::new());
        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv4Addr::new(10, 0, 0, 9).to_ipv6_mapped()),
            3333,
        );
        let (c, _rx_c) = Subscriber::new(3, mapped, 1, CancellationToken::new());
        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 4444);
        let (d, _rx_d) = Subscriber::new(4, v6, 1, CancellationToken::new());

        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), c.address());
        assert_ne!(a.address(), d.address());
    }
}
