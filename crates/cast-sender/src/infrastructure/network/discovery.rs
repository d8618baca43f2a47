//! DiscoveryService: finds viewers on the local network.
//!
//! Every cycle the sender broadcasts the ASCII probe `hello` to the discovery
//! port, collects the JSON documents viewers reply with for the length of the
//! response window, and records each viewer in a [`DiscoveryDirectory`] keyed
//! by its advertised name.  It then sleeps for the probe interval and starts
//! over, until the running flag is cleared.
//!
//! # How discovery works (for beginners)
//!
//! 1. The sender opens a UDP socket on an ephemeral port, enables broadcast,
//!    and sends `hello` to `255.255.255.255:53515`.  Every host on the LAN
//!    receives the datagram.
//!
//! 2. A viewer listening on 53515 answers with a unicast datagram sent back
//!    to the probe's source address:
//!    `{"name":"CsReceiver @ 10.0.0.5","width":1280,"height":960,...}`.
//!
//! 3. The sender connects to the address the reply *came from*.  The `id`
//!    field inside the document is only what the viewer claims its address
//!    is, and is kept as [`DiscoveryEntry::advertised_id`] for display.
//!
//! # Failure handling
//!
//! Nothing here is fatal.  A socket that cannot be bound, a send that fails
//! or a reply that does not parse is logged and the next cycle tries again.
//!
//! # Expiry
//!
//! Each entry records when it was last heard from.  With an entry TTL
//! configured, entries older than the TTL are pruned at the start of every
//! cycle and a [`DiscoveryEvent::Expired`] is emitted for each.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

use cast_core::protocol::discovery::{is_discovery_probe, DISCOVERY_PROBE};
use cast_core::protocol::{DISCOVERY_PORT, VIEWER_PORT};
use cast_core::DiscoveryResponse;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Granularity at which blocking waits re-check the running flag.
const CANCEL_SLICE: Duration = Duration::from_millis(100);

const RECV_BUFFER_LEN: usize = 4096;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The socket could not be configured for broadcast.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] io::Error),
    /// The discovery thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A viewer found on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEntry {
    /// Advertised display name; the directory key.
    pub name: String,
    /// Address the response datagram came from.
    pub address: IpAddr,
    /// TCP port the viewer accepts streams on.
    pub port: u16,
    /// Display width the viewer advertised.
    pub width: u32,
    /// Display height the viewer advertised.
    pub height: u32,
    /// Address the viewer claims in its `id` field.  Informational only.
    pub advertised_id: Option<String>,
    /// When the viewer last answered a probe.
    pub last_seen: Instant,
}

impl DiscoveryEntry {
    /// Builds an entry from a parsed response received from `source`.
    pub fn from_response(response: DiscoveryResponse, source: SocketAddr) -> Self {
        Self {
            name: response.name,
            address: source.ip(),
            port: response.port.unwrap_or(VIEWER_PORT),
            width: response.width,
            height: response.height,
            advertised_id: response.id,
            last_seen: Instant::now(),
        }
    }

    /// Address to open a stream to.
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Events published by the discovery thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A viewer answered a probe (new or refreshed).
    Discovered(DiscoveryEntry),
    /// A viewer was not heard from within the entry TTL.
    Expired { name: String },
}

/// Thread-safe directory of discovered viewers, keyed by name.
#[derive(Debug, Default)]
pub struct DiscoveryDirectory {
    entries: Mutex<HashMap<String, DiscoveryEntry>>,
}

impl DiscoveryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `entry.name`.
    ///
    /// Returns `true` if the name was not known before.
    pub fn upsert(&self, entry: DiscoveryEntry) -> bool {
        self.lock().insert(entry.name.clone(), entry).is_none()
    }

    /// Returns a copy of the entry named `name`.
    pub fn get(&self, name: &str) -> Option<DiscoveryEntry> {
        self.lock().get(name).cloned()
    }

    /// Returns all entries sorted by name.
    pub fn entries(&self) -> Vec<DiscoveryEntry> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Removes entries last seen more than `ttl` ago and returns their names.
    pub fn prune_expired(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.lock().retain(|name, entry| {
            let keep = now.saturating_duration_since(entry.last_seen) <= ttl;
            if !keep {
                expired.push(name.clone());
            }
            keep
        });
        expired
    }

    /// Number of known viewers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no viewer is known.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DiscoveryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runtime parameters of the discovery loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Local address the probe socket binds to (port 0 = ephemeral).
    pub bind_address: SocketAddr,
    /// Where probes are sent.
    pub probe_target: SocketAddr,
    /// How long each cycle waits for replies.
    pub response_timeout: Duration,
    /// Pause between cycles.
    pub probe_interval: Duration,
    /// Entries older than this are pruned; `None` keeps them forever.
    pub entry_ttl: Option<Duration>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            probe_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT),
            response_timeout: Duration::from_secs(3),
            probe_interval: Duration::from_secs(3),
            entry_ttl: Some(Duration::from_secs(30)),
        }
    }
}

/// Spawns the `cast-discovery` thread.
///
/// Results are recorded in `directory` and also published on the returned
/// channel.  A full or closed channel never stalls the loop; the directory is
/// always updated.
///
/// # Errors
///
/// Returns [`DiscoveryError::Spawn`] if the thread cannot be started.  Socket
/// errors are handled inside the loop.
pub fn start_discovery(
    settings: DiscoverySettings,
    directory: Arc<DiscoveryDirectory>,
    running: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
    let (tx, rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("cast-discovery".to_string())
        .spawn(move || discovery_loop(settings, directory, tx, running))
        .map_err(DiscoveryError::Spawn)?;

    Ok(rx)
}

fn discovery_loop(
    settings: DiscoverySettings,
    directory: Arc<DiscoveryDirectory>,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    info!(
        "discovery started: probing {} every {:?}",
        settings.probe_target, settings.probe_interval
    );
    let mut socket: Option<UdpSocket> = None;

    while running.load(Ordering::Relaxed) {
        if socket.is_none() {
            match open_probe_socket(settings.bind_address) {
                Ok(s) => socket = Some(s),
                Err(e) => warn!("discovery cycle skipped: {e}"),
            }
        }

        if let Some(s) = &socket {
            if let Err(e) = run_cycle(s, &settings, &directory, &tx, &running) {
                warn!("discovery probe failed: {e}");
                // Rebind next cycle in case the interface went away.
                socket = None;
            }
        }

        sleep_while_running(settings.probe_interval, &running);
    }

    info!("discovery stopped");
}

/// Binds the probe socket and enables broadcast.
fn open_probe_socket(bind_address: SocketAddr) -> Result<UdpSocket, DiscoveryError> {
    let socket = UdpSocket::bind(bind_address).map_err(|source| DiscoveryError::BindFailed {
        addr: bind_address,
        source,
    })?;
    socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;
    Ok(socket)
}

/// One probe/collect cycle.  Only a failed probe send is reported.
fn run_cycle(
    socket: &UdpSocket,
    settings: &DiscoverySettings,
    directory: &DiscoveryDirectory,
    tx: &mpsc::Sender<DiscoveryEvent>,
    running: &AtomicBool,
) -> io::Result<()> {
    if let Some(ttl) = settings.entry_ttl {
        for name in directory.prune_expired(ttl) {
            info!("viewer {name:?} expired");
            publish(tx, DiscoveryEvent::Expired { name });
        }
    }

    socket.send_to(DISCOVERY_PROBE, settings.probe_target)?;
    debug!("sent discovery probe to {}", settings.probe_target);

    let deadline = Instant::now() + settings.response_timeout;
    let mut buf = [0u8; RECV_BUFFER_LEN];
    while running.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining.min(CANCEL_SLICE)))?;

        match socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                if let Some(entry) = handle_response(&buf[..len], source, directory) {
                    publish(tx, DiscoveryEvent::Discovered(entry));
                }
            }
            Err(e) if is_timeout_error(&e) => {}
            Err(e) => {
                warn!("discovery recv error: {e}");
                break;
            }
        }
    }
    Ok(())
}

/// Parses one reply and upserts it.
///
/// Returns the stored entry, or `None` if the datagram was ignored.
fn handle_response(
    datagram: &[u8],
    source: SocketAddr,
    directory: &DiscoveryDirectory,
) -> Option<DiscoveryEntry> {
    if is_discovery_probe(datagram) {
        return None;
    }

    let response = match DiscoveryResponse::parse(datagram) {
        Ok(r) => r,
        Err(e) => {
            debug!("ignoring discovery reply from {source}: {e}");
            return None;
        }
    };

    let entry = DiscoveryEntry::from_response(response, source);
    if directory.upsert(entry.clone()) {
        info!(
            "discovered viewer {:?} at {} ({}x{})",
            entry.name, entry.address, entry.width, entry.height
        );
    } else {
        debug!("refreshed viewer {:?} at {}", entry.name, entry.address);
    }
    Some(entry)
}

fn publish(tx: &mpsc::Sender<DiscoveryEvent>, event: DiscoveryEvent) {
    if let Err(e) = tx.try_send(event) {
        debug!("discovery event not delivered: {e}");
    }
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(CANCEL_SLICE));
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
