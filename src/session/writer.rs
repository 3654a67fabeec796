//! Writer task
//!
//! Drains one subscriber's delivery queue and transmits each event as a text
//! frame. While the queue is empty the task is parked on `recv()` and the
//! connection carries no traffic from it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Sink;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::sink::SendLock;
use super::state::TeardownReason;
use crate::registry::{DeliveryReceiver, Subscriber};

/// How the writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Teardown was requested elsewhere
    Cancelled,
    /// A send failed; the subscriber was closed with this reason
    Failed(TeardownReason),
}

/// Summary returned when the writer stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterReport {
    /// Events transmitted
    pub sent: u64,
    /// Events still queued when the writer stopped (discarded)
    pub pending: usize,
    /// Exit cause
    pub exit: WriterExit,
}

/// Per-subscriber writer
pub struct WriterTask<S> {
    subscriber: Arc<Subscriber>,
    queue: DeliveryReceiver,
    sink: SendLock<S>,
    send_timeout: Duration,
}

impl<S> WriterTask<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(
        subscriber: Arc<Subscriber>,
        queue: DeliveryReceiver,
        sink: SendLock<S>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            subscriber,
            queue,
            sink,
            send_timeout,
        }
    }

    /// Run until cancelled or a send fails
    pub async fn run(mut self) -> WriterReport {
        let session_id = self.subscriber.id();
        let mut sent = 0u64;

        let exit = loop {
            let event = tokio::select! {
                biased;
                _ = self.subscriber.cancelled() => break WriterExit::Cancelled,
                event = self.queue.recv() => match event {
                    Some(event) => event,
                    None => break WriterExit::Cancelled,
                },
            };

            // A teardown requested mid-send abandons the frame
            let result = tokio::select! {
                biased;
                _ = self.subscriber.cancelled() => break WriterExit::Cancelled,
                result = self.sink.send(event.to_message(), self.send_timeout) => result,
            };

            if let Err(e) = result {
                let reason = e.teardown_reason();
                tracing::warn!(
                    session_id = session_id,
                    peer = %self.subscriber.peer_addr(),
                    error = %e,
                    "Send failed, closing subscriber"
                );
                self.subscriber.close(reason);
                break WriterExit::Failed(reason);
            }

            sent += 1;
        };

        // Refuse further events before counting what is left
        self.queue.close();
        let pending = self.subscriber.queue_depth();

        tracing::trace!(
            session_id = session_id,
            sent = sent,
            pending = pending,
            "Writer stopped"
        );

        WriterReport {
            sent,
            pending,
            exit,
        }
    }
}
