//! Subscriber session state
//!
//! Tracks liveness of a subscriber connection and classifies the ways a
//! session can end.

use std::time::Duration;

use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Utf8Bytes};

/// Liveness of a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Connection is considered healthy
    Alive,
    /// A probe with this nonce was sent and no matching pong has arrived yet
    AwaitingPong { nonce: u64 },
    /// Connection is closed (terminal)
    Closed,
}

/// Why a subscriber session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Peer closed the stream or went away
    PeerClosed,
    /// A newer connection from the same address took over
    Replaced,
    /// No pong arrived within the heartbeat timeout
    HeartbeatTimeout,
    /// Sending on the stream failed
    TransportFailure,
    /// The relay is shutting down
    Shutdown,
}

impl TeardownReason {
    /// Close frame sent to the subscriber, if any
    pub fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            TeardownReason::Replaced => (CloseCode::Normal, "Replaced by new connection"),
            TeardownReason::HeartbeatTimeout => (CloseCode::Away, "Heartbeat timeout"),
            TeardownReason::Shutdown => (CloseCode::Away, "Server shutting down"),
            TeardownReason::PeerClosed | TeardownReason::TransportFailure => return None,
        };

        Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })
    }

    /// Short label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownReason::PeerClosed => "peer_closed",
            TeardownReason::Replaced => "replaced",
            TeardownReason::HeartbeatTimeout => "heartbeat_timeout",
            TeardownReason::TransportFailure => "transport_failure",
            TeardownReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure on a subscriber's stream. Fatal to that subscriber only.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The WebSocket layer rejected the send
    #[error("send failed: {0}")]
    Send(WsError),

    /// The send did not complete in time
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// No pong arrived in time
    #[error("no pong within {0:?}")]
    LivenessTimeout(Duration),

    /// The stream is already closed
    #[error("stream closed")]
    StreamClosed,
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::StreamClosed,
            other => TransportError::Send(other),
        }
    }
}

impl TransportError {
    /// Teardown reason this failure maps to
    pub fn teardown_reason(&self) -> TeardownReason {
        match self {
            TransportError::LivenessTimeout(_) => TeardownReason::HeartbeatTimeout,
            TransportError::StreamClosed => TeardownReason::PeerClosed,
            TransportError::Send(_) | TransportError::SendTimeout(_) => {
                TeardownReason::TransportFailure
            }
        }
    }
}

/// Shared liveness state machine
///
/// `Alive -> AwaitingPong -> Alive` on each probe round trip, and any state
/// moves to `Closed` exactly once.
#[derive(Debug)]
pub struct LivenessTracker {
    tx: watch::Sender<Liveness>,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessTracker {
    /// Create a tracker in the `Alive` state
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Liveness::Alive);
        Self { tx }
    }

    /// Current state
    pub fn state(&self) -> Liveness {
        *self.tx.borrow()
    }

    /// Record that a probe with `nonce` is about to be sent
    ///
    /// Returns false if the connection is already closed.
    pub fn probe_sent(&self, nonce: u64) -> bool {
        let mut open = true;
        self.tx.send_if_modified(|state| {
            if *state == Liveness::Closed {
                open = false;
                return false;
            }
            *state = Liveness::AwaitingPong { nonce };
            true
        });
        open
    }

    /// Handle a pong payload. Returns true if it answered the outstanding probe.
    pub fn on_pong(&self, payload: &[u8]) -> bool {
        let Some(nonce) = decode_nonce(payload) else {
            return false;
        };

        self.tx.send_if_modified(|state| {
            if *state == (Liveness::AwaitingPong { nonce }) {
                *state = Liveness::Alive;
                true
            } else {
                false
            }
        })
    }

    /// Move to the terminal `Closed` state
    pub fn close(&self) {
        self.tx.send_if_modified(|state| {
            if *state == Liveness::Closed {
                false
            } else {
                *state = Liveness::Closed;
                true
            }
        });
    }

    /// Whether the connection reached `Closed`
    pub fn is_closed(&self) -> bool {
        self.state() == Liveness::Closed
    }

    /// Wait until the probe with `nonce` is answered
    pub async fn wait_for_pong(&self, nonce: u64, timeout: Duration) -> Result<(), TransportError> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != Liveness::AwaitingPong { nonce }),
        )
        .await;

        match waited {
            Err(_) => Err(TransportError::LivenessTimeout(timeout)),
            Ok(Err(_)) => Err(TransportError::StreamClosed),
            Ok(Ok(state)) => {
                let closed = *state == Liveness::Closed;
                drop(state);
                if closed {
                    Err(TransportError::StreamClosed)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Wait until the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state == Liveness::Closed).await;
    }
}

/// Encode a probe nonce as a ping payload
pub fn encode_nonce(nonce: u64) -> [u8; 8] {
    nonce.to_be_bytes()
}

fn decode_nonce(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
