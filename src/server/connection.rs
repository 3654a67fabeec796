//! Subscriber connection handler
//!
//! Owns one WebSocket from handshake to teardown: registers the subscriber,
//! runs its writer and heartbeat, reads (and ignores) inbound frames until the
//! stream ends, then tears everything down in a fixed order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::registry::{Registration, Subscriber, SubscriberRegistry};
use crate::server::config::RelayConfig;
use crate::session::{
    HeartbeatTask, SendLock, TeardownReason, TransportError, WriterExit, WriterReport, WriterTask,
};
use crate::stats::{RelayMetrics, SessionStats};

/// One subscriber connection
pub struct Connection {
    session_id: u64,
    peer_addr: SocketAddr,
    config: RelayConfig,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
}

impl Connection {
    /// `shutdown` becomes the subscriber's own token; pass a child of the
    /// server token.
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        config: RelayConfig,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<RelayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            config,
            registry,
            metrics,
            shutdown,
        }
    }

    /// Perform the WebSocket handshake and serve the connection
    pub async fn run(self, socket: TcpStream) -> Result<SessionStats> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(self.config.max_inbound_message_size));

        let handshake =
            tokio_tungstenite::accept_async_with_config(socket, Some(ws_config));
        let ws = match tokio::time::timeout(self.config.send_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "WebSocket handshake timed out",
                )))
            }
        };

        Ok(self.serve(ws).await)
    }

    /// Serve an established WebSocket until it closes
    pub async fn serve<T>(self, ws: WebSocketStream<T>) -> SessionStats
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let started = Instant::now();
        let session_id = self.session_id;
        let capacity = self.registry.config().queue_capacity;

        let (sink, mut stream) = ws.split();
        let send_lock = SendLock::new(sink);
        let (subscriber, queue) =
            Subscriber::new(session_id, self.peer_addr, capacity, self.shutdown.clone());

        match self.registry.register(Arc::clone(&subscriber)).await {
            Registration::New => {
                tracing::info!(
                    session_id = session_id,
                    peer = %self.peer_addr,
                    subscribers = self.registry.len(),
                    "Subscriber connected"
                );
            }
            Registration::Replaced {
                previous_session,
                closed_cleanly,
            } => {
                tracing::info!(
                    session_id = session_id,
                    peer = %self.peer_addr,
                    previous_session = previous_session,
                    closed_cleanly = closed_cleanly,
                    subscribers = self.registry.len(),
                    "Subscriber connected, replaced existing connection"
                );
            }
        }
        self.metrics.record_connection();

        let writer = tokio::spawn(
            WriterTask::new(
                Arc::clone(&subscriber),
                queue,
                send_lock.clone(),
                self.config.send_timeout,
            )
            .run(),
        );
        let heartbeat = tokio::spawn(
            HeartbeatTask::new(
                Arc::clone(&subscriber),
                send_lock.clone(),
                self.config.heartbeat_interval,
                self.config.heartbeat_timeout,
            )
            .run(),
        );

        // Inbound application frames are read and dropped; only pongs and
        // close matter.
        loop {
            let frame = tokio::select! {
                biased;
                _ = subscriber.cancelled() => break,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Pong(payload))) => {
                    subscriber.liveness().on_pong(&payload);
                }
                Some(Ok(Message::Close(_))) | None => {
                    subscriber.close(TeardownReason::PeerClosed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = TransportError::from(e);
                    tracing::debug!(session_id = session_id, error = %e, "Read failed");
                    subscriber.close(e.teardown_reason());
                    break;
                }
            }
        }

        // Teardown: stop both tasks, say goodbye, mark closed, deregister
        subscriber.close(TeardownReason::Shutdown);
        let report = match writer.await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(session_id = session_id, error = %e, "Writer task failed");
                WriterReport {
                    sent: 0,
                    pending: subscriber.queue_depth(),
                    exit: WriterExit::Cancelled,
                }
            }
        };
        let probes_answered = heartbeat.await.unwrap_or_default();

        let reason = subscriber
            .teardown_reason()
            .unwrap_or(TeardownReason::Shutdown);
        if let Err(e) = send_lock
            .send_close(reason.close_frame(), self.config.send_timeout)
            .await
        {
            tracing::debug!(session_id = session_id, error = %e, "Close frame not sent");
        }
        if reason != TeardownReason::TransportFailure {
            // Echoes a peer's close frame or flushes our own
            if let Err(e) = send_lock.close(self.config.send_timeout).await {
                tracing::debug!(session_id = session_id, error = %e, "Closing handshake incomplete");
            }
        }
        drop(stream);

        subscriber.liveness().close();
        self.registry.deregister(&subscriber).await;
        self.metrics.record_discarded(report.pending as u64);

        let stats = SessionStats {
            sent: report.sent,
            discarded: report.pending as u64,
            probes_answered,
            duration: started.elapsed(),
        };

        tracing::info!(
            session_id = session_id,
            peer = %self.peer_addr,
            reason = %reason,
            remaining = self.registry.len(),
            pending_cleared = report.pending,
            sent = stats.sent,
            "Subscriber disconnected"
        );

        stats
    }
}
