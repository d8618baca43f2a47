//! CastScreen sender entry point.
//!
//! Wires together the infrastructure services and starts the Tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()               -- sender.toml or defaults
//!  └─ start services
//!       ├─ DiscoveryService       (cast-discovery thread)
//!       ├─ TransportSession
//!       │    ├─ Connector: dial receiver, handshake, then capture
//!       │    └─ Listener:  cast-accept thread; each viewer that sends
//!       │                  "mirror" (re)starts capture
//!       └─ DrainTask              (cast-drain thread, 10 ms cadence)
//! ```
//!
//! The binary drives the pipeline with the synthetic test-pattern encoder.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cast_sender::application::drain_encoder::{CaptureControl, EncoderDrainLoop, FrameSink};
use cast_sender::infrastructure::encoder::drain_task::DrainTask;
use cast_sender::infrastructure::encoder::mock::SyntheticEncoder;
use cast_sender::infrastructure::network::discovery::{
    start_discovery, DiscoveryDirectory, DiscoveryEvent,
};
use cast_sender::infrastructure::network::transport::{SessionEvent, TransportSession};
use cast_sender::infrastructure::storage::config::{load_config, SenderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first: it supplies the fallback log level.
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (SenderConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.sender.log_level)),
        )
        .init();

    info!("CastScreen sender starting");
    if let Some(e) = config_error {
        warn!("falling back to default configuration: {e}");
    }

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Discovery ─────────────────────────────────────────────────────────────
    let directory = Arc::new(DiscoveryDirectory::new());
    if config.discovery.enabled {
        start_discovery_pump(&config, Arc::clone(&directory), Arc::clone(&running));
    }

    // ── Transport + capture ───────────────────────────────────────────────────
    let session = config.session_config();
    let drain_task = Arc::new(DrainTask::new());

    let transport = if config.is_connector() {
        let receiver = config.session.receiver.clone();
        let port = config.network.viewer_port;
        info!("casting {}x{} {} to {receiver}", session.width, session.height, session.codec);

        let transport = tokio::task::spawn_blocking(move || {
            TransportSession::connect(&receiver, port, session)
        })
        .await?
        .context("failed to start session")?;
        let transport = Arc::new(transport);
        start_capture(Arc::clone(&drain_task), Arc::clone(&transport))
            .await
            .context("failed to start capture")?;
        transport
    } else {
        let (transport, mut events) = TransportSession::listen(
            &config.network.bind_address,
            config.network.viewer_port,
            session,
        )
        .context("failed to start listener")?;
        let transport = Arc::new(transport);

        let drain_task = Arc::clone(&drain_task);
        let pump_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::ClientReady { client_id, peer } => {
                        info!("viewer {peer} ready ({client_id}), starting capture");
                        let restart =
                            start_capture(Arc::clone(&drain_task), Arc::clone(&pump_transport));
                        if let Err(e) = restart.await {
                            error!("failed to start capture: {e}");
                            pump_transport.close_client();
                        }
                    }
                    SessionEvent::ClientRejected { peer } => {
                        debug!("viewer {peer} rejected");
                    }
                }
            }
        });
        transport
    };

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("CastScreen sender ready.  Press Ctrl-C to exit.");

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !running.load(Ordering::Relaxed) || !transport.is_running() {
            break;
        }
    }

    running.store(false, Ordering::Relaxed);
    tokio::task::spawn_blocking(move || {
        drain_task.stop();
        transport.shutdown();
    })
    .await?;
    info!(
        "CastScreen sender stopped ({} viewer(s) known)",
        directory.len()
    );
    Ok(())
}

/// Starts a fresh encoder and drain loop feeding `transport`'s active sink.
///
/// Restarting joins the previous drain thread, so the work runs on the
/// blocking pool rather than a runtime worker.
async fn start_capture(
    drain_task: Arc<DrainTask>,
    transport: Arc<TransportSession>,
) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        let encoder = SyntheticEncoder::new(transport.config());
        let sink: Arc<dyn FrameSink> = transport.sink();
        let capture: Arc<dyn CaptureControl> = transport.clone();
        drain_task.start(EncoderDrainLoop::new(encoder, sink, capture))
    })
    .await?
    .map_err(Into::into)
}

/// Starts the discovery thread and a task that logs what it finds.
fn start_discovery_pump(
    config: &SenderConfig,
    directory: Arc<DiscoveryDirectory>,
    running: Arc<AtomicBool>,
) {
    let settings = match config.discovery_settings() {
        Ok(s) => s,
        Err(e) => {
            error!("discovery disabled: {e}");
            return;
        }
    };

    match start_discovery(settings, directory, running) {
        Ok(mut rx) => {
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        DiscoveryEvent::Discovered(entry) => debug!(
                            "viewer {:?} reachable at {}",
                            entry.name,
                            entry.stream_addr()
                        ),
                        DiscoveryEvent::Expired { name } => debug!("viewer {name:?} gone"),
                    }
                }
            });
        }
        Err(e) => error!("failed to start discovery: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cast_core::SessionConfig;

    #[tokio::test(flavor = "current_thread")]
    async fn test_start_capture_restarts_drain_on_single_threaded_runtime() {
        // Arrange
        let (transport, _events) =
            TransportSession::listen("127.0.0.1", 0, SessionConfig::default()).unwrap();
        let transport = Arc::new(transport);
        let drain_task = Arc::new(DrainTask::with_interval(Duration::from_millis(5)));

        // Act
        start_capture(Arc::clone(&drain_task), Arc::clone(&transport))
            .await
            .unwrap();
        start_capture(Arc::clone(&drain_task), Arc::clone(&transport))
            .await
            .unwrap();

        // Assert
        assert!(drain_task.is_running());
        drain_task.stop();
        transport.shutdown();
    }
}
