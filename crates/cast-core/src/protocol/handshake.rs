//! Stream handshake: the bytes exchanged before the first video frame.
//!
//! Every stream opens with an HTTP-shaped header, CRLF line endings
//! throughout:
//!
//! ```text
//! POST /api/v1/h264 HTTP/1.1\r\n
//! Connection: close\r\n
//! X-WIDTH: <width>\r\n
//! X-HEIGHT: <height>\r\n
//! \r\n
//! ```
//!
//! immediately followed by the codec init data: the catalogued 48-byte SPS/PPS
//! blob for H.264, or the 32-byte IVF file header for VP8.  The request line
//! says `h264` for both codecs; receivers ignore it.
//!
//! # Roles
//!
//! The two sides of a connection are not symmetric:
//!
//! - **Connector** – the sender dialled the viewer.  It sends the header and
//!   init data straight away.
//! - **Listener** – the viewer dialled the sender.  The viewer must first send
//!   a single line that equals `mirror` (any letter case).  Anything else,
//!   including a peer that closes before sending a line, is rejected and the
//!   connection is dropped without a reply.

use std::io::{self, BufRead, BufReader, Read, Write};

use thiserror::Error;
use tracing::debug;

use crate::domain::frame::CompressedFrame;
use crate::domain::session::{SessionConfig, VideoCodec};
use crate::protocol::frame_header::lookup_codec_init;
use crate::protocol::ivf::IvfMuxer;

/// Trigger word an inbound viewer sends to start a stream.
pub const MIRROR_TRIGGER: &str = "mirror";

/// Longest trigger line read before giving up on the peer.
const MAX_TRIGGER_LINE: u64 = 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors produced while performing or parsing a handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The inbound peer did not send the `mirror` trigger.
    #[error("handshake rejected: expected \"mirror\", got {line:?}")]
    Rejected { line: Option<String> },

    /// No init data exists for this codec and resolution.
    #[error("no codec init data for {codec} at {width}x{height}")]
    UnsupportedResolution {
        codec: VideoCodec,
        width: u32,
        height: u32,
    },

    /// The resolution cannot be represented in the IVF header.
    #[error("resolution {width}x{height} does not fit the IVF header")]
    DimensionOverflow { width: u32, height: u32 },

    /// A received stream header could not be understood.
    #[error("malformed stream header: {0}")]
    MalformedHeader(String),

    /// The socket failed mid-handshake.
    #[error("handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Validate the viewer's trigger line, then send header and init data.
    Listener,
    /// Send header and init data immediately.
    Connector,
}

/// How frames are written once the handshake has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEncoding {
    /// Encoded bytes go to the socket untouched (H.264 Annex-B).
    Raw,
    /// Each frame is wrapped in an IVF frame header (VP8).
    Ivf(IvfMuxer),
}

impl StreamEncoding {
    /// Writes one frame's payload to `out` in this encoding.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from `out`.
    pub fn write_frame<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        frame: &CompressedFrame,
    ) -> io::Result<()> {
        match self {
            StreamEncoding::Raw => out.write_all(&frame.payload),
            StreamEncoding::Ivf(muxer) => {
                muxer.write_frame(out, &frame.payload, frame.presentation_timestamp)
            }
        }
    }
}

/// Builds the stream header text for a `width` x `height` session.
pub fn build_stream_header(width: u32, height: u32) -> String {
    format!(
        "POST /api/v1/h264 HTTP/1.1\r\nConnection: close\r\nX-WIDTH: {width}\r\nX-HEIGHT: {height}\r\n\r\n"
    )
}

/// Returns `true` if `line` is the `mirror` trigger, ignoring ASCII case.
///
/// `None` stands for a peer that closed the connection before sending a line.
pub fn is_mirror_trigger(line: Option<&str>) -> bool {
    line.is_some_and(|l| l.eq_ignore_ascii_case(MIRROR_TRIGGER))
}

/// Reads one trigger line from `reader`, without its line ending.
///
/// A line ends at `\n`, `\r\n` or a lone `\r`.  A lone `\r` ends the line
/// at once, so a viewer that sends `mirror\r` and keeps the socket open is
/// answered without waiting for more bytes.
///
/// Returns `Ok(None)` if the peer closed before sending any byte.
///
/// # Errors
///
/// Propagates read errors, including read timeouts configured on the socket.
pub fn read_trigger_line<R: BufRead>(mut reader: R) -> io::Result<Option<String>> {
    let mut raw = Vec::new();
    let mut seen_any = false;

    while (raw.len() as u64) < MAX_TRIGGER_LINE {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        seen_any = true;

        let room = (MAX_TRIGGER_LINE as usize) - raw.len();
        let window = &available[..available.len().min(room)];
        match window.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(end) => {
                raw.extend_from_slice(&window[..end]);
                let crlf = window[end] == b'\r' && window.get(end + 1) == Some(&b'\n');
                reader.consume(end + if crlf { 2 } else { 1 });
                break;
            }
            None => {
                let taken = window.len();
                raw.extend_from_slice(window);
                reader.consume(taken);
            }
        }
    }

    if !seen_any {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

/// Runs the handshake for `role` on `stream` and returns the frame encoding
/// to use for the rest of the connection.
///
/// In the Listener role the trigger line is read through a short-lived
/// buffer; a well-behaved viewer sends nothing after it until video flows.
///
/// The header is written and flushed before any init data.  If the
/// configuration has no init data, the header has already gone out but no
/// init bytes follow; the caller must close the connection.
///
/// # Errors
///
/// - [`HandshakeError::Rejected`] when a Listener peer sends anything but `mirror`.
/// - [`HandshakeError::UnsupportedResolution`] / [`HandshakeError::DimensionOverflow`]
///   when init data cannot be produced.
/// - [`HandshakeError::Io`] on socket failure.
pub fn perform_handshake<S: Read + Write>(
    role: HandshakeRole,
    stream: &mut S,
    config: &SessionConfig,
) -> Result<StreamEncoding, HandshakeError> {
    if role == HandshakeRole::Listener {
        let line = read_trigger_line(BufReader::new(&mut *stream))?;
        debug!("trigger line from viewer: {line:?}");
        if !is_mirror_trigger(line.as_deref()) {
            return Err(HandshakeError::Rejected { line });
        }
    }

    stream.write_all(build_stream_header(config.width, config.height).as_bytes())?;
    stream.flush()?;

    match config.codec {
        VideoCodec::H264 => {
            let blob = lookup_codec_init(config.codec, config.width, config.height).ok_or(
                HandshakeError::UnsupportedResolution {
                    codec: config.codec,
                    width: config.width,
                    height: config.height,
                },
            )?;
            stream.write_all(blob)?;
            stream.flush()?;
            Ok(StreamEncoding::Raw)
        }
        VideoCodec::Vp8 => {
            let overflow = || HandshakeError::DimensionOverflow {
                width: config.width,
                height: config.height,
            };
            let width = u16::try_from(config.width).map_err(|_| overflow())?;
            let height = u16::try_from(config.height).map_err(|_| overflow())?;
            let muxer = IvfMuxer::new(width, height);
            muxer.write_header(stream)?;
            stream.flush()?;
            Ok(StreamEncoding::Ivf(muxer))
        }
    }
}

// ── Receiver side ─────────────────────────────────────────────────────────────

/// A stream header as seen by a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// First line, e.g. `POST /api/v1/h264 HTTP/1.1`.
    pub request_line: String,
    /// Value of `X-WIDTH`, if present.
    pub width: Option<u32>,
    /// Value of `X-HEIGHT`, if present.
    pub height: Option<u32>,
    /// Bytes occupied by the header including the blank line; stream data
    /// starts at this offset.
    pub header_len: usize,
}

/// Parses a stream header from the start of `bytes`.
///
/// Returns `Ok(None)` while the terminating blank line has not arrived yet.
///
/// # Errors
///
/// Returns [`HandshakeError::MalformedHeader`] for non-UTF-8 text, an empty
/// request line, or a non-numeric `X-WIDTH`/`X-HEIGHT`.
pub fn parse_stream_header(bytes: &[u8]) -> Result<Option<StreamHeader>, HandshakeError> {
    let Some(end) = bytes
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
    else {
        return Ok(None);
    };

    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|e| HandshakeError::MalformedHeader(e.to_string()))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    if request_line.is_empty() {
        return Err(HandshakeError::MalformedHeader("empty request line".into()));
    }

    let mut width = None;
    let mut height = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| HandshakeError::MalformedHeader(format!("bad {name} value {v:?}")))
        };
        if name.eq_ignore_ascii_case("X-WIDTH") {
            width = Some(parse(value)?);
        } else if name.eq_ignore_ascii_case("X-HEIGHT") {
            height = Some(parse(value)?);
        }
    }

    Ok(Some(StreamHeader {
        request_line,
        width,
        height,
        header_len: end + HEADER_TERMINATOR.len(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame_header::{H264_INIT_1280X720, H264_INIT_800X480};
    use crate::protocol::ivf::parse_ivf_header;
    use std::io::Cursor;

    /// An in-memory duplex stream: reads from `input`, records writes.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn h264(width: u32, height: u32) -> SessionConfig {
        SessionConfig {
            width,
            height,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_build_stream_header_is_byte_exact() {
        assert_eq!(
            build_stream_header(1280, 720),
            "POST /api/v1/h264 HTTP/1.1\r\nConnection: close\r\nX-WIDTH: 1280\r\nX-HEIGHT: 720\r\n\r\n"
        );
    }

    #[test]
    fn test_is_mirror_trigger_accepts_any_case() {
        for line in ["mirror", "Mirror", "MIRROR", "mIrRoR"] {
            assert!(is_mirror_trigger(Some(line)), "{line} must be accepted");
        }
    }

    #[test]
    fn test_is_mirror_trigger_rejects_other_input() {
        assert!(!is_mirror_trigger(Some("foo")));
        assert!(!is_mirror_trigger(Some("")));
        assert!(!is_mirror_trigger(Some("mirror please")));
        assert!(!is_mirror_trigger(None));
    }

    #[test]
    fn test_read_trigger_line_strips_crlf_and_lf() {
        assert_eq!(
            read_trigger_line(Cursor::new(b"mirror\r\n".to_vec())).unwrap(),
            Some("mirror".to_string())
        );
        assert_eq!(
            read_trigger_line(Cursor::new(b"MIRROR\n".to_vec())).unwrap(),
            Some("MIRROR".to_string())
        );
    }

    #[test]
    fn test_read_trigger_line_ends_at_lone_carriage_return() {
        // Arrange: the rest of the input never arrives in the same read.
        let reader = Cursor::new(b"mirror\rtrailing".to_vec());

        // Act
        let line = read_trigger_line(reader).unwrap();

        // Assert
        assert_eq!(line.as_deref(), Some("mirror"));
    }

    #[test]
    fn test_listener_handshake_accepts_mirror_ended_by_carriage_return() {
        // Arrange: a viewer that sends `mirror\r` and keeps the socket open.
        use std::net::{TcpListener, TcpStream};
        use std::time::Duration;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut viewer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        viewer.write_all(b"mirror\r").unwrap();

        // Act
        let result = perform_handshake(HandshakeRole::Listener, &mut server, &SessionConfig::default());

        // Assert
        assert!(matches!(result, Ok(StreamEncoding::Raw)));
        drop(viewer);
    }

    #[test]
    fn test_read_trigger_line_returns_none_on_immediate_close() {
        assert_eq!(read_trigger_line(Cursor::new(Vec::new())).unwrap(), None);
    }

    #[test]
    fn test_read_trigger_line_accepts_unterminated_line_before_close() {
        assert_eq!(
            read_trigger_line(Cursor::new(b"mirror".to_vec())).unwrap(),
            Some("mirror".to_string())
        );
    }

    #[test]
    fn test_connector_handshake_writes_header_then_720p_blob() {
        // Arrange
        let mut stream = Duplex::new(b"");

        // Act
        let encoding =
            perform_handshake(HandshakeRole::Connector, &mut stream, &h264(1280, 720)).unwrap();

        // Assert
        let mut expected = build_stream_header(1280, 720).into_bytes();
        expected.extend_from_slice(&H264_INIT_1280X720);
        assert_eq!(stream.output, expected);
        assert_eq!(encoding, StreamEncoding::Raw);
    }

    #[test]
    fn test_listener_handshake_accepts_mirror_and_sends_480p_blob() {
        // Arrange
        let mut stream = Duplex::new(b"Mirror\n");

        // Act
        perform_handshake(HandshakeRole::Listener, &mut stream, &h264(800, 480)).unwrap();

        // Assert
        let header = build_stream_header(800, 480);
        assert!(stream.output.starts_with(header.as_bytes()));
        assert_eq!(&stream.output[header.len()..], &H264_INIT_800X480[..]);
    }

    #[test]
    fn test_listener_handshake_rejects_wrong_trigger_without_reply() {
        // Arrange
        let mut stream = Duplex::new(b"foo\n");

        // Act
        let result = perform_handshake(HandshakeRole::Listener, &mut stream, &h264(1280, 720));

        // Assert
        assert!(matches!(
            result,
            Err(HandshakeError::Rejected { line: Some(ref l) }) if l == "foo"
        ));
        assert!(stream.output.is_empty(), "nothing may be sent to a rejected peer");
    }

    #[test]
    fn test_listener_handshake_rejects_closed_peer() {
        let mut stream = Duplex::new(b"");
        let result = perform_handshake(HandshakeRole::Listener, &mut stream, &h264(1280, 720));
        assert!(matches!(result, Err(HandshakeError::Rejected { line: None })));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn test_listener_handshake_rejects_empty_line() {
        let mut stream = Duplex::new(b"\r\n");
        let result = perform_handshake(HandshakeRole::Listener, &mut stream, &h264(1280, 720));
        assert!(matches!(result, Err(HandshakeError::Rejected { .. })));
    }

    #[test]
    fn test_handshake_with_unsupported_h264_resolution_sends_header_only() {
        // Arrange
        let mut stream = Duplex::new(b"");

        // Act
        let result = perform_handshake(HandshakeRole::Connector, &mut stream, &h264(1920, 1080));

        // Assert
        assert!(matches!(
            result,
            Err(HandshakeError::UnsupportedResolution { width: 1920, height: 1080, .. })
        ));
        assert_eq!(stream.output, build_stream_header(1920, 1080).into_bytes());
    }

    #[test]
    fn test_vp8_handshake_writes_header_then_ivf_header() {
        // Arrange
        let mut stream = Duplex::new(b"");
        let cfg = SessionConfig {
            codec: VideoCodec::Vp8,
            ..SessionConfig::default()
        };

        // Act
        let encoding = perform_handshake(HandshakeRole::Connector, &mut stream, &cfg).unwrap();

        // Assert
        let header_len = build_stream_header(1280, 720).len();
        assert_eq!(stream.output.len(), header_len + 32);
        let ivf = parse_ivf_header(&stream.output[header_len..]).expect("IVF header follows");
        assert_eq!((ivf.width, ivf.height), (1280, 720));
        assert!(matches!(encoding, StreamEncoding::Ivf(_)));
    }

    #[test]
    fn test_stream_encoding_ivf_wraps_frames() {
        // Arrange
        let mut encoding = StreamEncoding::Ivf(IvfMuxer::new(16, 16));
        let frame = CompressedFrame {
            payload: vec![9, 9],
            presentation_timestamp: 5,
            is_config_blob: false,
            is_end_of_stream: false,
        };
        let mut out = Vec::new();

        // Act
        encoding.write_frame(&mut out, &frame).unwrap();

        // Assert
        assert_eq!(out, vec![2u8, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 9, 9]);
    }

    #[test]
    fn test_parse_stream_header_reads_dimensions_and_length() {
        // Arrange
        let mut bytes = build_stream_header(800, 480).into_bytes();
        let header_len = bytes.len();
        bytes.extend_from_slice(&[0x21, 0x00]);

        // Act
        let header = parse_stream_header(&bytes).unwrap().expect("complete header");

        // Assert
        assert_eq!(header.request_line, "POST /api/v1/h264 HTTP/1.1");
        assert_eq!(header.width, Some(800));
        assert_eq!(header.height, Some(480));
        assert_eq!(header.header_len, header_len);
    }

    #[test]
    fn test_parse_stream_header_waits_for_blank_line() {
        let partial = b"POST /api/v1/h264 HTTP/1.1\r\nX-WIDTH: 1";
        assert_eq!(parse_stream_header(partial).unwrap(), None);
    }

    #[test]
    fn test_parse_stream_header_rejects_non_numeric_width() {
        let bytes = b"POST / HTTP/1.1\r\nX-WIDTH: wide\r\n\r\n";
        assert!(matches!(
            parse_stream_header(bytes),
            Err(HandshakeError::MalformedHeader(_))
        ));
    }
}
