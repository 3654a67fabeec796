//! Relay server
//!
//! Binds the UDP ingest socket and the WebSocket listener, runs the ingest
//! loop and the stats reporter, and spawns a connection handler per accepted
//! subscriber.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::registry::SubscriberRegistry;
use crate::server::config::RelayConfig;
use crate::server::connection::Connection;
use crate::server::ingest::{bind_udp, IngestListener};
use crate::stats::{RelayMetrics, StatsReporter};

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before the next accept after `failures` consecutive errors
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// UDP to WebSocket relay server
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<RelayMetrics>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: RelayConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            registry: Arc::new(SubscriberRegistry::with_config(config.registry_config())),
            metrics: Arc::new(RelayMetrics::new()),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            config,
        }
    }

    /// Get a reference to the subscriber registry
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Get a reference to the relay counters
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get the configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let udp = bind_udp(self.config.udp_bind_addr, self.config.udp_recv_buffer)?;
        let ws_addr = self.config.ws_bind_addr;
        let listener = TcpListener::bind(ws_addr)
            .await
            .map_err(|e| Error::bind(ws_addr, e))?;

        self.serve(udp, listener, shutdown).await
    }

    /// Serve on already-bound sockets
    pub async fn serve<F>(&self, udp: UdpSocket, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ingest = Arc::new(IngestListener::new(
            udp,
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        ));

        tracing::info!(addr = %ingest.local_addr()?, "UDP listener started");
        tracing::info!(
            addr = %listener.local_addr()?,
            queue_capacity = self.config.queue_capacity,
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            "WebSocket server listening"
        );

        let reporter = StatsReporter::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            ingest.drop_counter(),
            self.config.stats_interval,
        );
        self.tasks.spawn(reporter.run(self.shutdown.clone()));

        let token = self.shutdown.clone();
        self.tasks.spawn(async move { ingest.run(token).await });

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.shutdown.cancelled() => {}
            _ = self.accept_loop(&listener) => {}
        }

        // Stops ingest, reporter and every subscriber (close frame 1001)
        self.shutdown.cancel();
        drop(listener);

        self.tasks.close();
        self.tasks.wait().await;

        tracing::info!(
            received = self.metrics.snapshot().received,
            dropped = self.metrics.snapshot().dropped,
            "Relay stopped"
        );

        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        let mut failures = 0u32;

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    failures = 0;
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    // Errors such as EMFILE persist until descriptors free up
                    failures = failures.saturating_add(1);
                    let backoff = accept_backoff(failures);
                    tracing::error!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to accept connection"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        // Generate session ID
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection::new(
            session_id,
            peer_addr,
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            self.shutdown.child_token(),
        );

        self.tasks.spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run(socket).await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}
