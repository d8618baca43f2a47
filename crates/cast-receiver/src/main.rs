//! CastScreen receiver entry point.
//!
//! ```text
//! main()
//!  └─ load_config()               -- receiver.toml or defaults
//!  ├─ DiscoveryResponder          (cast-responder thread)
//!  └─ stream thread               (cast-stream)
//!       ├─ listen: accept senders one after another
//!       └─ dial:   send "mirror" to one sender and read its stream
//! ```
//!
//! Stream data goes to `output` unmodified, so piping stdout into a decoder
//! (`cast-receiver | ffplay -`) plays the cast.  Setting `player` starts the
//! decoder as a child process and feeds it directly.

use std::fs::File;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use cast_core::DiscoveryResponse;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cast_receiver::infrastructure::config::{load_config, ReceiverConfig};
use cast_receiver::infrastructure::discovery::start_discovery_responder;
use cast_receiver::infrastructure::player::Player;
use cast_receiver::infrastructure::stream::StreamReceiver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (ReceiverConfig::default(), Some(e)),
    };

    // Logs go to stderr; stdout may carry the stream.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.receiver.log_level)),
        )
        .init();

    info!("CastScreen receiver starting");
    if let Some(e) = config_error {
        warn!("falling back to default configuration: {e}");
    }

    let running = Arc::new(AtomicBool::new(true));
    let local_ip = local_ip();

    // ── Discovery ─────────────────────────────────────────────────────────────
    if config.receiver.discovery_enabled {
        let metadata = DiscoveryResponse::metadata(
            &config.display_name(local_ip),
            &local_ip.to_string(),
            config.display.width,
            config.display.height,
            config.network.viewer_port,
        );
        match start_discovery_responder(
            config.network.discovery_port,
            metadata,
            Arc::clone(&running),
        ) {
            Ok(mut responder) => {
                tokio::spawn(async move {
                    while let Some(probe) = responder.probes.recv().await {
                        debug!("answered probe from {}", probe.source);
                    }
                });
            }
            Err(e) => error!("discovery responder disabled: {e}"),
        }
    }

    // ── Stream ────────────────────────────────────────────────────────────────
    let stream_running = Arc::clone(&running);
    let stream_config = config.clone();
    std::thread::Builder::new()
        .name("cast-stream".to_string())
        .spawn(move || {
            if let Err(e) = run_stream(&stream_config, &stream_running) {
                error!("stream stopped: {e:#}");
            }
            stream_running.store(false, Ordering::Relaxed);
        })
        .context("failed to spawn stream thread")?;

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("CastScreen receiver ready.  Press Ctrl-C to exit.");

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("CastScreen receiver stopped");
    Ok(())
}

/// Receives streams until `running` is cleared or a dialled stream ends.
fn run_stream(config: &ReceiverConfig, running: &AtomicBool) -> anyhow::Result<()> {
    let mut receiver = StreamReceiver::new(open_output(config)?);

    if let Some(addr) = config.sender_addr()? {
        let summary = receiver.dial(addr)?;
        info!("received {}x{} stream ({} bytes)", summary.width, summary.height, summary.payload_bytes);
        return Ok(());
    }

    let addr = config.listen_addr()?;
    let listener =
        TcpListener::bind(addr).with_context(|| format!("failed to bind stream port {addr}"))?;
    info!("waiting for senders on TCP {addr}");

    while running.load(Ordering::Relaxed) {
        match receiver.accept_one(&listener) {
            Ok(summary) => info!(
                "received {}x{} stream ({} bytes)",
                summary.width, summary.height, summary.payload_bytes
            ),
            Err(e) => warn!("stream failed: {e}"),
        }
    }
    Ok(())
}

fn open_output(config: &ReceiverConfig) -> anyhow::Result<Box<dyn Write + Send>> {
    if let Some(command) = config.player_command() {
        return Ok(Box::new(Player::spawn(command)?));
    }
    let path = config.receiver.output.as_str();
    if path == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).with_context(|| format!("failed to create {path}"))?;
    Ok(Box::new(io::BufWriter::new(file)))
}

/// Address of the interface that routes to the wider network.  Connecting a
/// UDP socket sends nothing; it only selects the route.
fn local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
