//! Shared outbound half of a subscriber stream
//!
//! Writer and heartbeat both transmit on the same WebSocket. [`SendLock`]
//! serializes them so frames never interleave on the wire. Teardown uses it
//! for the closing handshake as well.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::state::TransportError;

/// Send lock around the outbound half of a WebSocket
pub struct SendLock<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SendLock<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> SendLock<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    /// Wrap a sink
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Send and flush one message while holding the lock
    ///
    /// The lock is held until the frame is flushed or `timeout` elapses.
    pub async fn send(&self, message: Message, timeout: Duration) -> Result<(), TransportError> {
        let mut sink = self.inner.lock().await;

        match tokio::time::timeout(timeout, sink.send(message)).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::SendTimeout(timeout)),
        }
    }

    /// Send a close frame, if there is one to send
    pub async fn send_close(
        &self,
        frame: Option<CloseFrame>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match frame {
            Some(frame) => self.send(Message::Close(Some(frame)), timeout).await,
            None => Ok(()),
        }
    }

    /// Flush anything still queued and finish the closing handshake
    ///
    /// After the peer has closed, this writes the echo of its close frame.
    /// A stream that is already closed is not an error.
    pub async fn close(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut sink = self.inner.lock().await;

        match tokio::time::timeout(timeout, sink.close()).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::from(e)),
            Err(_) => Err(TransportError::SendTimeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::session::state::TeardownReason;
    use crate::session::test_util::ws_pair;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_send_text() {
        let (server, mut client) = ws_pair(4096).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);

        lock.send(Message::text("hello"), TIMEOUT).await.unwrap();

        let received = client.next().await.unwrap().unwrap();
        assert_eq!(received, Message::text("hello"));
    }

    #[tokio::test]
    async fn test_clones_share_the_stream() {
        let (server, mut client) = ws_pair(4096).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);
        let other = lock.clone();

        lock.send(Message::text("a"), TIMEOUT).await.unwrap();
        other.send(Message::text("b"), TIMEOUT).await.unwrap();

        assert_eq!(client.next().await.unwrap().unwrap(), Message::text("a"));
        assert_eq!(client.next().await.unwrap().unwrap(), Message::text("b"));
    }

    #[tokio::test]
    async fn test_close_frame_carries_reason() {
        let (server, mut client) = ws_pair(4096).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);

        lock.send_close(TeardownReason::Replaced.close_frame(), TIMEOUT)
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "Replaced by new connection");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_close_frame_sends_nothing() {
        let (server, client) = ws_pair(4096).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);

        lock.send_close(None, TIMEOUT).await.unwrap();

        let mut client = client;
        let next = tokio::time::timeout(Duration::from_millis(50), client.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_peer_stalls() {
        // Tiny buffer and a peer that never reads
        let (server, _client) = ws_pair(16).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);

        let payload = "x".repeat(256);
        let result = lock.send(Message::text(payload), TIMEOUT).await;

        assert!(matches!(result, Err(TransportError::SendTimeout(_))));
    }

    #[tokio::test]
    async fn test_close_after_reason_frame_is_clean() {
        let (server, mut client) = ws_pair(4096).await;
        let (sink, _stream) = server.split();
        let lock = SendLock::new(sink);

        lock.send_close(TeardownReason::Shutdown.close_frame(), TIMEOUT)
            .await
            .unwrap();
        lock.close(TIMEOUT).await.unwrap();
        lock.close(TIMEOUT).await.unwrap();

        assert!(matches!(
            client.next().await.unwrap().unwrap(),
            Message::Close(Some(_))
        ));
    }
}
