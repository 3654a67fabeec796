//! Relay server binary
//!
//! Settings come from flags or the environment; a `.env` file in the working
//! directory is loaded first. `RUST_LOG` controls verbosity and
//! `RELAY_LOG_FORMAT=json` switches to JSON log lines.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use udp_ws_relay::registry::config::DEFAULT_QUEUE_CAPACITY;
use udp_ws_relay::server::config::{DEFAULT_UDP_PORT, DEFAULT_WS_PORT};
use udp_ws_relay::{RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "udp-ws-relay", version, about = "Relay UDP JSON events to WebSocket subscribers")]
struct Args {
    /// UDP ingest port
    #[arg(long, env = "UDP_PORT", default_value_t = DEFAULT_UDP_PORT)]
    udp_port: u16,

    /// Full UDP ingest address, overrides --udp-port
    #[arg(long, env = "RELAY_UDP_ADDR")]
    udp_addr: Option<SocketAddr>,

    /// WebSocket listen port
    #[arg(long, env = "WS_PORT", default_value_t = DEFAULT_WS_PORT)]
    ws_port: u16,

    /// Full WebSocket listen address, overrides --ws-port
    #[arg(long, env = "RELAY_WS_ADDR")]
    ws_addr: Option<SocketAddr>,

    /// Per-subscriber queue capacity
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seconds between pings
    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL_SECS", default_value_t = 20)]
    heartbeat_interval: u64,

    /// Seconds to wait for a pong
    #[arg(long, env = "RELAY_HEARTBEAT_TIMEOUT_SECS", default_value_t = 10)]
    heartbeat_timeout: u64,

    /// Seconds between stats lines
    #[arg(long, env = "RELAY_STATS_INTERVAL_SECS", default_value_t = 5)]
    stats_interval: u64,

    /// UDP receive buffer in bytes (0 = OS default)
    #[arg(long, env = "RELAY_UDP_RECV_BUFFER", default_value_t = 4 * 1024 * 1024)]
    udp_recv_buffer: usize,

    /// Seconds allowed for one outbound send
    #[arg(long, env = "RELAY_SEND_TIMEOUT_SECS", default_value_t = 10)]
    send_timeout: u64,

    /// Maximum concurrent subscribers (0 = unlimited)
    #[arg(long, env = "RELAY_MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let udp_addr = self
            .udp_addr
            .unwrap_or_else(|| SocketAddr::new(any, self.udp_port));
        let ws_addr = self
            .ws_addr
            .unwrap_or_else(|| SocketAddr::new(any, self.ws_port));

        RelayConfig::default()
            .udp_bind(udp_addr)
            .ws_bind(ws_addr)
            .queue_capacity(self.queue_capacity)
            .heartbeat(
                Duration::from_secs(self.heartbeat_interval),
                Duration::from_secs(self.heartbeat_timeout),
            )
            .stats_interval(Duration::from_secs(self.stats_interval))
            .udp_recv_buffer(self.udp_recv_buffer)
            .send_timeout(Duration::from_secs(self.send_timeout))
            .max_connections(self.max_connections)
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    let json = std::env::var("RELAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging()?;

    let config = args.relay_config();
    tracing::info!(
        udp = %config.udp_bind_addr,
        ws = %config.ws_bind_addr,
        queue_capacity = config.queue_capacity,
        max_connections = config.max_connections,
        "Starting relay"
    );

    let server = RelayServer::new(config);
    server.run_until(shutdown_signal()).await?;

    Ok(())
}
