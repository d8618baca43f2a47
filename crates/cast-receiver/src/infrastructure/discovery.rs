//! UDP discovery responder.
//!
//! Binds the discovery port and answers every `hello` probe with the
//! receiver's metadata document, sent unicast to the probe's source address.
//! Any other datagram is ignored.
//!
//! The responder runs on a dedicated `cast-responder` thread.  The socket has
//! a short read timeout; on each timeout the running flag is checked and the
//! loop exits once it is cleared.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use cast_core::protocol::discovery::is_discovery_probe;
use cast_core::DiscoveryResponse;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ReceiverError;

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A probe that was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    /// Where the probe came from and the reply went to.
    pub source: SocketAddr,
}

/// A running responder.
#[derive(Debug)]
pub struct DiscoveryResponder {
    /// Address the responder is bound to.
    pub local_addr: SocketAddr,
    /// One event per answered probe.
    pub probes: mpsc::Receiver<ProbeEvent>,
}

/// Binds UDP `port` on all interfaces and spawns the responder thread.
///
/// Port `0` binds an OS-assigned port; see [`DiscoveryResponder::local_addr`].
///
/// # Errors
///
/// - [`ReceiverError::Metadata`] if `metadata` cannot be serialised.
/// - [`ReceiverError::Bind`] if the socket cannot be bound.
/// - [`ReceiverError::Io`] if the socket cannot be configured or the thread
///   cannot be started.
pub fn start_discovery_responder(
    port: u16,
    metadata: DiscoveryResponse,
    running: Arc<AtomicBool>,
) -> Result<DiscoveryResponder, ReceiverError> {
    let reply = metadata.to_json()?.into_bytes();

    let addr = format!("0.0.0.0:{port}");
    let socket = UdpSocket::bind(&addr).map_err(|source| ReceiverError::Bind {
        addr: addr.clone(),
        source,
    })?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    let local_addr = socket.local_addr()?;

    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("cast-responder".to_string())
        .spawn(move || responder_loop(socket, reply, tx, running))?;

    info!("discovery responder listening on UDP {local_addr} as {:?}", metadata.name);
    Ok(DiscoveryResponder {
        local_addr,
        probes: rx,
    })
}

fn responder_loop(
    socket: UdpSocket,
    reply: Vec<u8>,
    tx: mpsc::Sender<ProbeEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];

    while running.load(Ordering::Relaxed) {
        let (len, source) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        if !is_discovery_probe(&buf[..len]) {
            debug!("ignoring {len}-byte datagram from {source}");
            continue;
        }

        debug!("probe from {source}");
        if let Err(e) = socket.send_to(&reply, source) {
            warn!("failed to answer probe from {source}: {e}");
            continue;
        }
        if tx.try_send(ProbeEvent { source }).is_err() {
            debug!("event channel full or closed, reply to {source} not reported");
        }
    }

    info!("discovery responder stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> DiscoveryResponse {
        DiscoveryResponse::metadata("CsReceiver @ 127.0.0.1", "127.0.0.1", 1280, 960, 53515)
    }

    #[test]
    fn test_responder_answers_probe_with_metadata() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let mut responder =
            start_discovery_responder(0, metadata(), Arc::clone(&running)).unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], responder.local_addr.port()));
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // Act
        client.send_to(b"hello", target).unwrap();
        let mut buf = [0u8; 1024];
        let (len, _) = client.recv_from(&mut buf).unwrap();

        // Assert
        let reply = DiscoveryResponse::parse(&buf[..len]).unwrap();
        assert_eq!(reply, metadata());
        let event = responder.probes.blocking_recv().unwrap();
        assert_eq!(event.source, client.local_addr().unwrap());
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn test_responder_keeps_answering_after_event_receiver_is_dropped() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let DiscoveryResponder { local_addr, probes } =
            start_discovery_responder(0, metadata(), Arc::clone(&running)).unwrap();
        drop(probes);
        let target = SocketAddr::from(([127, 0, 0, 1], local_addr.port()));
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 1024];

        // Act
        client.send_to(b"hello", target).unwrap();
        let first = client.recv_from(&mut buf).map(|(len, _)| len);
        client.send_to(b"hello", target).unwrap();
        let second = client.recv_from(&mut buf).map(|(len, _)| len);

        // Assert
        assert!(first.is_ok());
        let len = second.expect("second reply");
        assert_eq!(DiscoveryResponse::parse(&buf[..len]).unwrap(), metadata());
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn test_responder_ignores_other_datagrams() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let responder = start_discovery_responder(0, metadata(), Arc::clone(&running)).unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], responder.local_addr.port()));
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();

        // Act
        client.send_to(b"mirror", target).unwrap();
        let mut buf = [0u8; 1024];
        let result = client.recv_from(&mut buf);

        // Assert
        assert!(result.is_err(), "no reply to a non-probe datagram");
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn test_responder_reports_bind_failure() {
        // Arrange
        let busy = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = busy.local_addr().unwrap().port();

        // Act
        let result = start_discovery_responder(port, metadata(), Arc::new(AtomicBool::new(false)));

        // Assert
        assert!(matches!(result, Err(ReceiverError::Bind { .. })));
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
    }
}
