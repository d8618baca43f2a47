//! TransportSession: the TCP connection a stream travels over.
//!
//! A session runs in exactly one of two modes:
//!
//! - **Connector** – [`TransportSession::connect`] resolves the configured
//!   receiver, dials it on a `cast-connect` worker thread and runs the
//!   Connector handshake.  The caller blocks until the worker reports
//!   success or failure, so capture never starts before the viewer has its
//!   init data.  Failures are returned as-is; nothing is retried.
//!
//! - **Listener** – [`TransportSession::listen`] binds the viewer port and
//!   accepts connections on a `cast-accept` thread.  Each connection gets a
//!   `cast-client` thread that runs the Listener handshake (the viewer must
//!   send `mirror`).  A successful handshake installs the connection in the
//!   [`ActiveSink`] slot, closes the connection it replaces, and emits
//!   [`SessionEvent::ClientReady`] so the caller can (re)start capture.
//!
//! # Teardown
//!
//! | Call | Effect |
//! |---|---|
//! | [`TransportSession::close_client`] | closes the active viewer connection and clears the slot; a listener keeps accepting |
//! | [`TransportSession::shutdown`] | the above, plus the listening socket and accept thread |
//!
//! # Accept loop
//!
//! The listening socket is non-blocking and polled every
//! [`ACCEPT_POLL_INTERVAL`].  Between polls the accept thread checks the
//! running flag, so [`TransportSession::shutdown`] returns promptly.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::JoinHandle;
use std::time::Duration;

use cast_core::{
    perform_handshake, HandshakeError, HandshakeRole, SessionConfig, SessionConfigError,
    StreamEncoding,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sink::{ActiveSink, StreamSink};
use crate::application::drain_encoder::{CaptureControl, DrainError};

/// How often the non-blocking listener is polled for new connections.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Longest an inbound viewer may take to send its trigger line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest an outbound connection attempt may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for starting a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session configuration cannot produce a stream.
    #[error("invalid session configuration: {0}")]
    InvalidSession(#[from] SessionConfigError),

    /// The receiver address did not resolve.
    #[error("failed to resolve receiver address {addr:?}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Every resolved address refused or timed out.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The viewer port could not be bound.
    #[error("failed to bind stream listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The connection was made but the handshake failed.
    #[error("handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: HandshakeError,
    },

    /// A socket operation after the handshake failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// The connect worker thread died before reporting a result.
    #[error("connect worker panicked")]
    WorkerPanicked,
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Listener,
    Connector,
}

/// Notifications from the listener threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A viewer completed the handshake and is now the active sink.
    ClientReady { client_id: Uuid, peer: SocketAddr },
    /// A viewer connected but did not send the `mirror` trigger.
    ClientRejected { peer: SocketAddr },
}

/// A streaming transport in Listener or Connector mode.
pub struct TransportSession {
    mode: SessionMode,
    config: SessionConfig,
    sink: Arc<ActiveSink>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Dials `receiver` and performs the Connector handshake.
    ///
    /// `receiver` is a host name or IP address, optionally with a `:port`
    /// suffix; without one `port` is used.  Blocks until the handshake has
    /// completed or failed.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidSession`] if `config` fails validation
    ///   (nothing is sent).
    /// - [`TransportError::Resolve`] / [`TransportError::Connect`] when the
    ///   receiver cannot be reached.
    /// - [`TransportError::Handshake`] when the handshake write fails.
    pub fn connect(receiver: &str, port: u16, config: SessionConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let receiver = receiver.to_string();
        let worker = std::thread::Builder::new()
            .name("cast-connect".to_string())
            .spawn(move || dial_and_handshake(&receiver, port, &config))?;
        let (stream, encoding) = worker.join().map_err(|_| TransportError::WorkerPanicked)??;

        let sink = Arc::new(ActiveSink::new());
        let stream_sink = StreamSink::new(stream, encoding)?;
        info!("connected to viewer {}", stream_sink.peer());
        sink.install(Arc::new(stream_sink));

        Ok(Self {
            mode: SessionMode::Connector,
            config,
            sink,
            running: Arc::new(AtomicBool::new(true)),
            local_addr: None,
            accept_thread: Mutex::new(None),
        })
    }

    /// Binds `bind_address:port` and starts accepting viewers.
    ///
    /// Returns the session together with the receiver on which
    /// [`SessionEvent`]s arrive.  Port `0` binds an OS-assigned port; see
    /// [`TransportSession::local_addr`].
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidSession`] if `config` fails validation.
    /// - [`TransportError::Bind`] if the port cannot be bound.
    /// - [`TransportError::Io`] if the accept thread cannot be started.
    pub fn listen(
        bind_address: &str,
        port: u16,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), TransportError> {
        config.validate()?;

        let addr = format!("{bind_address}:{port}");
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let sink = Arc::new(ActiveSink::new());
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(16);

        let handle = {
            let sink = Arc::clone(&sink);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("cast-accept".to_string())
                .spawn(move || accept_loop(listener, config, sink, tx, running))?
        };

        info!("listening for viewers on TCP {local_addr}");
        Ok((
            Self {
                mode: SessionMode::Listener,
                config,
                sink,
                running,
                local_addr: Some(local_addr),
                accept_thread: Mutex::new(Some(handle)),
            },
            rx,
        ))
    }

    /// The mode this session was started in.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The configuration every connection of this session uses.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The slot the drain loop forwards frames through.
    pub fn sink(&self) -> Arc<ActiveSink> {
        Arc::clone(&self.sink)
    }

    /// Address the listener is bound to; `None` in Connector mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `false` once the session has been shut down, or once a Connector
    /// session's stream has failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Closes the active viewer connection, if any.
    pub fn close_client(&self) {
        if let Some(sink) = self.sink.clear() {
            info!("closing viewer connection {}", sink.peer());
            sink.shutdown();
        }
    }

    /// Closes the viewer connection and stops accepting new ones.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.close_client();
        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("accept thread panicked");
            }
            info!("stream listener stopped");
        }
    }
}

impl CaptureControl for TransportSession {
    fn stop_capture(&self, reason: &DrainError) {
        error!("stream to viewer ended: {reason}");
        self.close_client();
        if self.mode == SessionMode::Connector {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Resolves `receiver`, connects to the first address that answers and runs
/// the Connector handshake.
fn dial_and_handshake(
    receiver: &str,
    port: u16,
    config: &SessionConfig,
) -> Result<(TcpStream, StreamEncoding), TransportError> {
    let addrs = resolve_receiver(receiver, port)?;

    let mut last_error = None;
    for addr in addrs {
        debug!("connecting to viewer at {addr}");
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                let encoding = perform_handshake(HandshakeRole::Connector, &mut stream, config)
                    .map_err(|source| TransportError::Handshake { peer: addr, source })?;
                return Ok((stream, encoding));
            }
            Err(source) => {
                warn!("could not connect to {addr}: {source}");
                last_error = Some(TransportError::Connect { addr, source });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| TransportError::Resolve {
        addr: receiver.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
    }))
}

/// Resolves `host` or `host:port`, falling back to `default_port`.
fn resolve_receiver(receiver: &str, default_port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let resolve_error = |source| TransportError::Resolve {
        addr: receiver.to_string(),
        source,
    };

    let receiver = receiver.trim();
    if receiver.is_empty() {
        return Err(resolve_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty receiver address",
        )));
    }

    let resolved = match receiver.parse::<SocketAddr>() {
        Ok(addr) => vec![addr],
        Err(_) => (receiver, default_port)
            .to_socket_addrs()
            .or_else(|_| receiver.to_socket_addrs())
            .map_err(resolve_error)?
            .collect(),
    };
    Ok(resolved)
}

// ── Listener ──────────────────────────────────────────────────────────────────

fn accept_loop(
    listener: TcpListener,
    config: SessionConfig,
    sink: Arc<ActiveSink>,
    events: mpsc::Sender<SessionEvent>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("viewer connected from {peer}");
                let sink = Arc::clone(&sink);
                let events = events.clone();
                let spawned = std::thread::Builder::new()
                    .name("cast-client".to_string())
                    .spawn(move || handle_client(stream, peer, config, sink, events));
                if let Err(e) = spawned {
                    error!("failed to spawn handler for {peer}: {e}");
                }
            }
            Err(e) if is_timeout_error(&e) => std::thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!("accept error: {e}");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("accept loop exiting");
}

/// Runs the Listener handshake for one inbound connection.
fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: SessionConfig,
    sink: Arc<ActiveSink>,
    events: mpsc::Sender<SessionEvent>,
) {
    if let Err(e) = prepare_inbound(&stream) {
        warn!("failed to configure socket for {peer}: {e}");
        return;
    }

    let encoding = match perform_handshake(HandshakeRole::Listener, &mut stream, &config) {
        Ok(encoding) => encoding,
        Err(HandshakeError::Rejected { line }) => {
            info!("rejected viewer {peer}: trigger line {line:?}");
            if events
                .blocking_send(SessionEvent::ClientRejected { peer })
                .is_err()
            {
                debug!("session event receiver dropped");
            }
            return;
        }
        Err(e) => {
            warn!("handshake with {peer} failed: {e}");
            return;
        }
    };

    let stream_sink = match stream
        .set_read_timeout(None)
        .and_then(|()| StreamSink::new(stream, encoding))
    {
        Ok(s) => Arc::new(s),
        Err(e) => {
            warn!("failed to set up sink for {peer}: {e}");
            return;
        }
    };

    let client_id = stream_sink.id();
    if let Some(previous) = sink.install(stream_sink) {
        info!("replacing viewer {} with {peer}", previous.peer());
        previous.shutdown();
    }
    if events
        .blocking_send(SessionEvent::ClientReady { client_id, peer })
        .is_err()
    {
        debug!("session event receiver dropped");
    }
}

fn prepare_inbound(stream: &TcpStream) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking flag.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cast_core::VideoCodec;

    #[test]
    fn test_resolve_receiver_uses_default_port() {
        let addrs = resolve_receiver("127.0.0.1", 53515).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:53515".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_receiver_honours_explicit_port() {
        let addrs = resolve_receiver("127.0.0.1:9000", 53515).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:9000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_receiver_rejects_empty_address() {
        assert!(matches!(
            resolve_receiver("  ", 53515),
            Err(TransportError::Resolve { .. })
        ));
    }

    #[test]
    fn test_connect_rejects_unsupported_resolution_before_dialing() {
        // Arrange
        let config = SessionConfig {
            width: 1920,
            height: 1080,
            codec: VideoCodec::H264,
            ..SessionConfig::default()
        };

        // Act – the address is never dialled, so it need not exist.
        let result = TransportSession::connect("192.0.2.1", 53515, config);

        // Assert
        assert!(matches!(
            result,
            Err(TransportError::InvalidSession(
                SessionConfigError::UnsupportedResolution { .. }
            ))
        ));
    }

    #[test]
    fn test_connect_reports_refused_connection() {
        // Arrange: bind then drop to obtain a port nothing listens on.
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        // Act
        let result = TransportSession::connect("127.0.0.1", port, SessionConfig::default());

        // Assert
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_listen_reports_bind_failure_on_busy_port() {
        // Arrange
        let busy = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = busy.local_addr().unwrap().port();

        // Act
        let result = TransportSession::listen("127.0.0.1", port, SessionConfig::default());

        // Assert
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_listen_on_port_zero_exposes_local_addr_and_shuts_down() {
        // Arrange
        let (session, _events) =
            TransportSession::listen("127.0.0.1", 0, SessionConfig::default()).unwrap();

        // Act
        let addr = session.local_addr().expect("listener address");
        session.shutdown();

        // Assert
        assert_ne!(addr.port(), 0);
        assert_eq!(session.mode(), SessionMode::Listener);
        assert!(session.sink().current().is_none());
    }

    /// Returns a connected `(sender side, viewer side)` loopback pair.
    fn socket_pair() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let viewer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (server, peer, viewer)
    }

    #[test]
    fn test_handle_client_rejects_viewer_when_event_receiver_is_gone() {
        // Arrange
        use std::io::{Read, Write};
        let (server, peer, mut viewer) = socket_pair();
        let (events, receiver) = mpsc::channel(1);
        drop(receiver);
        let sink = Arc::new(ActiveSink::new());
        viewer.write_all(b"hello\n").unwrap();

        // Act
        handle_client(server, peer, SessionConfig::default(), Arc::clone(&sink), events);

        // Assert
        let mut received = Vec::new();
        viewer.read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
        assert!(sink.current().is_none());
    }

    #[test]
    fn test_handle_client_installs_viewer_when_event_receiver_is_gone() {
        // Arrange
        use std::io::Write;
        let (server, peer, mut viewer) = socket_pair();
        let (events, receiver) = mpsc::channel(1);
        drop(receiver);
        let sink = Arc::new(ActiveSink::new());
        viewer.write_all(b"mirror\n").unwrap();

        // Act
        handle_client(server, peer, SessionConfig::default(), Arc::clone(&sink), events);

        // Assert
        assert!(sink.current().is_some());
        if let Some(active) = sink.clear() {
            active.shutdown();
        }
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
        let e = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout_error(&e));
    }
}
