//! Stream reception.
//!
//! A sender opens every stream with the HTTP-shaped header
//! (`POST /api/v1/h264 ...`, `X-WIDTH`, `X-HEIGHT`, blank line).  Everything
//! after the blank line is stream data: the H.264 init blob followed by
//! Annex-B access units, or an IVF file header followed by IVF frames.  The
//! receiver strips the header and copies the stream data verbatim to its
//! output, which is typically a decoder's stdin.
//!
//! Two ways to obtain a stream:
//!
//! - [`StreamReceiver::accept_one`] waits for a Connector-mode sender to dial
//!   in; the sender starts writing immediately.
//! - [`StreamReceiver::dial`] connects to a Listener-mode sender and sends
//!   the `mirror` trigger line first.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use cast_core::protocol::handshake::MIRROR_TRIGGER;
use cast_core::protocol::parse_stream_header;
use cast_core::HandshakeError;
use tracing::{debug, info};

use super::ReceiverError;

/// Largest header accepted before the blank line.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

/// Longest a dial attempt may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 64 * 1024;

/// What a finished stream delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Width announced in `X-WIDTH`.
    pub width: u32,
    /// Height announced in `X-HEIGHT`.
    pub height: u32,
    /// Stream bytes copied to the output, init data included.
    pub payload_bytes: u64,
}

/// Reads one stream at a time into `output`.
pub struct StreamReceiver<W: Write> {
    output: W,
}

impl<W: Write> StreamReceiver<W> {
    /// Creates a receiver writing stream data to `output`.
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Accepts one connection on `listener` and receives its stream until
    /// the sender closes it.
    ///
    /// # Errors
    ///
    /// See [`StreamReceiver::receive`]; additionally [`ReceiverError::Io`] if
    /// the accept fails.
    pub fn accept_one(&mut self, listener: &TcpListener) -> Result<StreamSummary, ReceiverError> {
        let (stream, peer) = listener.accept()?;
        info!("sender connected from {peer}");
        self.receive(stream)
    }

    /// Connects to a Listener-mode sender at `addr`, sends the trigger line
    /// and receives the stream until the sender closes it.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::Connect`] if the sender cannot be reached, otherwise
    /// see [`StreamReceiver::receive`].
    pub fn dial(&mut self, addr: SocketAddr) -> Result<StreamSummary, ReceiverError> {
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|source| ReceiverError::Connect { addr, source })?;
        stream.write_all(format!("{MIRROR_TRIGGER}\n").as_bytes())?;
        stream.flush()?;
        info!("requested stream from {addr}");
        self.receive(stream)
    }

    /// Reads the stream header from `input`, then copies the remaining bytes
    /// to the output until end of stream.
    ///
    /// # Errors
    ///
    /// - [`ReceiverError::ClosedBeforeHeader`] if `input` ends before the
    ///   blank line.
    /// - [`ReceiverError::HeaderTooLarge`] if no blank line arrives within
    ///   [`MAX_HEADER_LEN`] bytes.
    /// - [`ReceiverError::Handshake`] if the header is malformed or lacks
    ///   `X-WIDTH` / `X-HEIGHT`.
    /// - [`ReceiverError::Io`] on read or output failure.
    pub fn receive<R: Read>(&mut self, mut input: R) -> Result<StreamSummary, ReceiverError> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = vec![0u8; READ_CHUNK];

        let header = loop {
            if let Some(header) = parse_stream_header(&buf)? {
                break header;
            }
            if buf.len() > MAX_HEADER_LEN {
                return Err(ReceiverError::HeaderTooLarge {
                    limit: MAX_HEADER_LEN,
                });
            }
            let n = read_some(&mut input, &mut chunk)?;
            if n == 0 {
                return Err(ReceiverError::ClosedBeforeHeader {
                    received: buf.len(),
                });
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let missing = |field: &str| {
            HandshakeError::MalformedHeader(format!("header has no {field} field"))
        };
        let width = header.width.ok_or_else(|| missing("X-WIDTH"))?;
        let height = header.height.ok_or_else(|| missing("X-HEIGHT"))?;
        debug!("stream header {:?}: {width}x{height}", header.request_line);

        let leftover = &buf[header.header_len..];
        self.output.write_all(leftover)?;
        let mut payload_bytes = leftover.len() as u64;

        loop {
            let n = read_some(&mut input, &mut chunk)?;
            if n == 0 {
                break;
            }
            self.output.write_all(&chunk[..n])?;
            payload_bytes += n as u64;
        }
        self.output.flush()?;

        info!("stream ended after {payload_bytes} bytes");
        Ok(StreamSummary {
            width,
            height,
            payload_bytes,
        })
    }

    /// Returns the output the stream was written to.
    pub fn into_output(self) -> W {
        self.output
    }
}

/// Reads into `buf`, retrying on interruption.  A reset connection counts as
/// end of stream, which is how senders usually stop.
fn read_some<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(0),
            Err(e) => return Err(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
