//! Replay a pipe-delimited log file into the relay, one datagram per line

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use udp_ws_relay::producer::pacing::FIXED_DELAY;
use udp_ws_relay::producer::{LogReader, Pacing, ReplayPacer, UdpEmitter};
use udp_ws_relay::server::config::DEFAULT_UDP_PORT;

#[derive(Parser, Debug)]
#[command(name = "relay-replay", version, about = "Replay a log file as UDP events")]
struct Args {
    /// Log file to replay
    logfile: PathBuf,

    /// Follow the recorded `Uxt` gaps instead of a fixed 10 ms rate
    #[arg(long)]
    realtime: bool,

    /// Relay host
    #[arg(long, env = "UDP_IP", default_value = "127.0.0.1")]
    udp_ip: IpAddr,

    /// Relay UDP port
    #[arg(long, env = "UDP_PORT", default_value_t = DEFAULT_UDP_PORT)]
    udp_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let target = SocketAddr::new(args.udp_ip, args.udp_port);
    let pacing = if args.realtime {
        Pacing::Realtime
    } else {
        Pacing::Fixed(FIXED_DELAY)
    };

    let mut reader = LogReader::open(&args.logfile)
        .await
        .with_context(|| format!("opening {}", args.logfile.display()))?;
    let emitter = UdpEmitter::bind(target).await?;
    let mut pacer = ReplayPacer::new(pacing);

    tracing::info!(file = %args.logfile.display(), target = %target, ?pacing, "Replaying");

    let mut sent = 0u64;
    let replay = async {
        while let Some(record) = reader.next_record().await? {
            let delay = pacer.delay_before(&record);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = emitter.send(&record).await {
                tracing::warn!(line = reader.line_number(), error = %e, "Send failed");
                continue;
            }
            sent += 1;
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = replay => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    tracing::info!(sent, "Replay finished");
    Ok(())
}
