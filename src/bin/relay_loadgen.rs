//! Synthetic load generator: template records at a fixed packets-per-second

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use udp_ws_relay::producer::{LoadGenerator, RatePacer, UdpEmitter};
use udp_ws_relay::server::config::DEFAULT_UDP_PORT;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "relay-loadgen", version, about = "Send synthetic UDP events at a fixed rate")]
struct Args {
    /// Relay host
    #[arg(long, env = "UDP_IP", default_value = "127.0.0.1")]
    udp_ip: IpAddr,

    /// Relay UDP port
    #[arg(long, env = "UDP_PORT", default_value_t = DEFAULT_UDP_PORT)]
    udp_port: u16,

    /// Packets per second
    #[arg(long, env = "PPS", default_value_t = 100)]
    pps: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    if args.pps == 0 {
        anyhow::bail!("PPS must be greater than zero");
    }

    let target = SocketAddr::new(args.udp_ip, args.udp_port);
    let emitter = UdpEmitter::bind(target).await?;
    let mut generator = LoadGenerator::new();
    let mut pacer = RatePacer::new(args.pps);

    tracing::info!(target = %target, pps = args.pps, "Generating load");

    let mut failures = 0u64;
    let mut next_progress = Instant::now() + PROGRESS_INTERVAL;

    let generate = async {
        loop {
            let record = generator.next_record();
            if let Err(e) = emitter.send(&record).await {
                failures += 1;
                tracing::debug!(error = %e, "Send failed");
            }
            pacer.tick().await;

            if Instant::now() >= next_progress {
                next_progress += PROGRESS_INTERVAL;
                tracing::info!(
                    sent = pacer.count(),
                    rate = %format!("{:.1}", pacer.average_rate()),
                    failures,
                    "Progress"
                );
            }
        }
    };

    tokio::select! {
        _ = generate => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    tracing::info!(
        sent = pacer.count(),
        rate = %format!("{:.1}", pacer.average_rate()),
        failures,
        "Stopped"
    );
    Ok(())
}
