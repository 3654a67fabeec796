//! Heartbeat task
//!
//! Every `interval` the task sends a WebSocket ping carrying a fresh nonce
//! under the shared send lock, then waits (outside the lock) for the matching
//! pong. A missing pong or a closed stream tears the subscriber down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Sink;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::sink::SendLock;
use super::state::{encode_nonce, TransportError};
use crate::registry::Subscriber;

/// Per-subscriber liveness prober
pub struct HeartbeatTask<S> {
    subscriber: Arc<Subscriber>,
    sink: SendLock<S>,
    interval: Duration,
    timeout: Duration,
}

impl<S> HeartbeatTask<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(
        subscriber: Arc<Subscriber>,
        sink: SendLock<S>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            subscriber,
            sink,
            interval,
            timeout,
        }
    }

    /// Run until cancelled or the peer stops answering
    ///
    /// Returns the number of probes answered.
    pub async fn run(self) -> u64 {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut nonce = 0u64;
        let mut answered = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.subscriber.cancelled() => break,
                _ = ticker.tick() => {}
            }

            nonce = nonce.wrapping_add(1);

            let result = tokio::select! {
                biased;
                _ = self.subscriber.cancelled() => break,
                result = self.probe(nonce) => result,
            };

            match result {
                Ok(()) => answered += 1,
                Err(e) => {
                    if !matches!(e, TransportError::StreamClosed) {
                        tracing::warn!(
                            session_id = self.subscriber.id(),
                            peer = %self.subscriber.peer_addr(),
                            error = %e,
                            "Heartbeat failed, closing subscriber"
                        );
                    }
                    self.subscriber.close(e.teardown_reason());
                    break;
                }
            }
        }

        answered
    }

    async fn probe(&self, nonce: u64) -> Result<(), TransportError> {
        let liveness = self.subscriber.liveness();
        if !liveness.probe_sent(nonce) {
            return Err(TransportError::StreamClosed);
        }

        let payload = Bytes::copy_from_slice(&encode_nonce(nonce));
        self.sink.send(Message::Ping(payload), self.timeout).await?;

        liveness.wait_for_pong(nonce, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use futures_util::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::session::state::TeardownReason;
    use crate::session::test_util::ws_pair;

    const INTERVAL: Duration = Duration::from_secs(20);
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn peer() -> SocketAddr {
        "10.0.0.8:40000".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_only_sees_pings() {
        let (server, mut client) = ws_pair(64 * 1024).await;
        let (sink, mut stream) = server.split();
        let (subscriber, _queue) = Subscriber::new(1, peer(), 16, CancellationToken::new());

        // Server-side reader feeding pongs into the tracker
        let reader_sub = Arc::clone(&subscriber);
        let reader = tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                if let Message::Pong(payload) = message {
                    reader_sub.liveness().on_pong(&payload);
                }
            }
        });

        let start = Instant::now();
        let heartbeat = HeartbeatTask::new(
            Arc::clone(&subscriber),
            SendLock::new(sink),
            INTERVAL,
            TIMEOUT,
        );
        let handle = tokio::spawn(heartbeat.run());

        for n in 1..=3u64 {
            let frame = client.next().await.unwrap().unwrap();
            let elapsed = start.elapsed();

            match frame {
                Message::Ping(payload) => assert_eq!(&payload[..], &encode_nonce(n)),
                other => panic!("unexpected frame on idle connection: {:?}", other),
            }
            assert!(elapsed >= INTERVAL * n as u32);
            assert!(elapsed < INTERVAL * n as u32 + Duration::from_secs(1));
        }

        subscriber.close(TeardownReason::Shutdown);
        let answered = handle.await.unwrap();
        assert!(answered >= 2);
        assert_eq!(subscriber.teardown_reason(), Some(TeardownReason::Shutdown));

        reader.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_times_out() {
        // Client never reads, so no pong is ever produced
        let (server, _client) = ws_pair(64 * 1024).await;
        let (sink, _stream) = server.split();
        let (subscriber, _queue) = Subscriber::new(1, peer(), 16, CancellationToken::new());

        let start = Instant::now();
        let answered = HeartbeatTask::new(
            Arc::clone(&subscriber),
            SendLock::new(sink),
            INTERVAL,
            TIMEOUT,
        )
        .run()
        .await;

        assert_eq!(answered, 0);
        assert_eq!(
            subscriber.teardown_reason(),
            Some(TeardownReason::HeartbeatTimeout)
        );
        assert!(subscriber.is_closing());
        assert!(start.elapsed() >= INTERVAL + TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_first_probe() {
        let (server, _client) = ws_pair(64 * 1024).await;
        let (sink, _stream) = server.split();
        let (subscriber, _queue) = Subscriber::new(1, peer(), 16, CancellationToken::new());

        let handle = tokio::spawn(
            HeartbeatTask::new(
                Arc::clone(&subscriber),
                SendLock::new(sink),
                INTERVAL,
                TIMEOUT,
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        subscriber.close(TeardownReason::PeerClosed);

        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(subscriber.liveness().state(), crate::session::state::Liveness::Alive);
    }
}
