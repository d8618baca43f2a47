//! The active-sink slot shared by the transport and the drain loop.
//!
//! A [`StreamSink`] is one viewer connection after a successful handshake,
//! together with the [`StreamEncoding`] its frames are written in.  The
//! transport publishes the current connection by swapping an
//! `Arc<StreamSink>` into the [`ActiveSink`] slot; the drain loop reads the
//! slot once per frame.  The slot lock is held only for the swap or the
//! clone, never across a socket write, so a slow viewer cannot block a new
//! one from being installed.
//!
//! # Stale sinks
//!
//! Every sink carries a [`Uuid`].  When a write fails, the slot is cleared
//! only if it still holds that same sink.  A failure on a connection that has
//! already been replaced is discarded: the newer viewer is unaffected.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};

use cast_core::{CompressedFrame, StreamEncoding};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::drain_encoder::{Delivery, FrameSink};

struct SinkWriter {
    stream: TcpStream,
    encoding: StreamEncoding,
}

/// One handshaken viewer connection.
pub struct StreamSink {
    id: Uuid,
    peer: SocketAddr,
    writer: Mutex<SinkWriter>,
    /// Second handle on the socket so it can be shut down while a write holds `writer`.
    control: TcpStream,
}

impl StreamSink {
    /// Wraps a connection whose handshake produced `encoding`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the peer address cannot be read or the socket
    /// cannot be duplicated.
    pub fn new(stream: TcpStream, encoding: StreamEncoding) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let control = stream.try_clone()?;
        Ok(Self {
            id: Uuid::new_v4(),
            peer,
            writer: Mutex::new(SinkWriter { stream, encoding }),
            control,
        })
    }

    /// Identity used to tell this connection apart from its replacements.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Address of the viewer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one frame in this connection's encoding.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn write_frame(&self, frame: &CompressedFrame) -> io::Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let SinkWriter { stream, encoding } = &mut *guard;
        encoding.write_frame(stream, frame)?;
        stream.flush()
    }

    /// Closes both directions of the connection.
    pub fn shutdown(&self) {
        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            debug!("shutdown of sink {} ({}) failed: {e}", self.id, self.peer);
        }
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Single-slot mailbox holding the connection frames are forwarded to.
#[derive(Debug, Default)]
pub struct ActiveSink {
    slot: Mutex<Option<Arc<StreamSink>>>,
}

impl ActiveSink {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `sink` the active connection and returns the one it replaces.
    pub fn install(&self, sink: Arc<StreamSink>) -> Option<Arc<StreamSink>> {
        info!("active sink is now {} ({})", sink.id(), sink.peer());
        self.lock().replace(sink)
    }

    /// Empties the slot and returns what it held.
    pub fn clear(&self) -> Option<Arc<StreamSink>> {
        self.lock().take()
    }

    /// Returns the active connection, if any.
    pub fn current(&self) -> Option<Arc<StreamSink>> {
        self.lock().clone()
    }

    /// Empties the slot only if it holds the sink with `id`.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn clear_if(&self, id: Uuid) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|s| s.id() == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<StreamSink>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for ActiveSink {
    fn forward(&self, frame: &CompressedFrame) -> io::Result<Delivery> {
        let Some(sink) = self.current() else {
            return Ok(Delivery::Dropped);
        };

        match sink.write_frame(frame) {
            Ok(()) => Ok(Delivery::Written),
            Err(e) if self.clear_if(sink.id()) => {
                warn!("write to viewer {} failed: {e}", sink.peer());
                sink.shutdown();
                Err(e)
            }
            Err(e) => {
                debug!("discarding write failure on replaced sink {}: {e}", sink.id());
                Ok(Delivery::Dropped)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cast_core::IvfMuxer;
    use std::io::Read;
    use std::net::TcpListener;

    /// Returns a connected `(sender side, viewer side)` loopback pair.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn frame(payload: &[u8]) -> CompressedFrame {
        CompressedFrame {
            payload: payload.to_vec(),
            presentation_timestamp: 0,
            is_config_blob: false,
            is_end_of_stream: false,
        }
    }

    #[test]
    fn test_forward_without_sink_drops_frame() {
        let active = ActiveSink::new();
        assert_eq!(active.forward(&frame(b"x")).unwrap(), Delivery::Dropped);
    }

    #[test]
    fn test_forward_writes_raw_bytes_to_active_sink() {
        // Arrange
        let (server, mut viewer) = socket_pair();
        let active = ActiveSink::new();
        active.install(Arc::new(StreamSink::new(server, StreamEncoding::Raw).unwrap()));

        // Act
        let delivery = active.forward(&frame(b"\x00\x00\x00\x01\x65")).unwrap();

        // Assert
        assert_eq!(delivery, Delivery::Written);
        let mut buf = [0u8; 5];
        viewer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x00, 0x00, 0x01, 0x65]);
    }

    #[test]
    fn test_forward_wraps_frames_for_ivf_sink() {
        // Arrange
        let (server, mut viewer) = socket_pair();
        let active = ActiveSink::new();
        let sink = StreamSink::new(server, StreamEncoding::Ivf(IvfMuxer::new(64, 64))).unwrap();
        active.install(Arc::new(sink));

        // Act
        active.forward(&frame(b"vp8")).unwrap();

        // Assert
        let mut buf = [0u8; 15];
        viewer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[12..], b"vp8");
    }

    #[test]
    fn test_install_returns_replaced_sink() {
        // Arrange
        let (a, _va) = socket_pair();
        let (b, _vb) = socket_pair();
        let first = Arc::new(StreamSink::new(a, StreamEncoding::Raw).unwrap());
        let second = Arc::new(StreamSink::new(b, StreamEncoding::Raw).unwrap());
        let active = ActiveSink::new();

        // Act
        assert!(active.install(first.clone()).is_none());
        let replaced = active.install(second.clone());

        // Assert
        assert_eq!(replaced.map(|s| s.id()), Some(first.id()));
        assert_eq!(active.current().map(|s| s.id()), Some(second.id()));
    }

    #[test]
    fn test_clear_if_ignores_stale_id() {
        // Arrange
        let (a, _va) = socket_pair();
        let (b, _vb) = socket_pair();
        let stale = Arc::new(StreamSink::new(a, StreamEncoding::Raw).unwrap());
        let fresh = Arc::new(StreamSink::new(b, StreamEncoding::Raw).unwrap());
        let active = ActiveSink::new();
        active.install(stale.clone());
        active.install(fresh.clone());

        // Act / Assert
        assert!(!active.clear_if(stale.id()));
        assert!(active.current().is_some());
        assert!(active.clear_if(fresh.id()));
        assert!(active.current().is_none());
    }

    #[test]
    fn test_forward_failure_on_active_sink_clears_slot() {
        // Arrange: shut the sink's own socket so the next write fails.
        let (server, _viewer) = socket_pair();
        let sink = Arc::new(StreamSink::new(server, StreamEncoding::Raw).unwrap());
        let active = ActiveSink::new();
        active.install(sink.clone());
        sink.shutdown();

        // Act
        let result = active.forward(&frame(b"data"));

        // Assert
        assert!(result.is_err());
        assert!(active.current().is_none());
    }

    #[test]
    fn test_forward_failure_on_replaced_sink_is_dropped() {
        // Arrange: a viewer that never reads, so a large write blocks.
        let (a, _stalled_viewer) = socket_pair();
        let (b, _vb) = socket_pair();
        let stale = Arc::new(StreamSink::new(a, StreamEncoding::Raw).unwrap());
        let fresh = Arc::new(StreamSink::new(b, StreamEncoding::Raw).unwrap());
        let active = Arc::new(ActiveSink::new());
        active.install(stale.clone());

        let writer = {
            let active = Arc::clone(&active);
            std::thread::spawn(move || active.forward(&frame(&vec![0u8; 64 * 1024 * 1024])))
        };
        std::thread::sleep(std::time::Duration::from_millis(300));

        // Act: a newer viewer takes over, then the stalled one is closed.
        active.install(fresh.clone());
        stale.shutdown();
        let result = writer.join().unwrap();

        // Assert
        assert_eq!(result.unwrap(), Delivery::Dropped);
        assert_eq!(active.current().map(|s| s.id()), Some(fresh.id()));
    }

    #[test]
    fn test_clear_returns_previous_sink() {
        let (server, _viewer) = socket_pair();
        let active = ActiveSink::new();
        active.install(Arc::new(StreamSink::new(server, StreamEncoding::Raw).unwrap()));
        assert!(active.clear().is_some());
        assert!(active.clear().is_none());
    }
}
