//! IVF container muxing for VP8 streams.
//!
//! Wire format (all integers little-endian):
//! ```text
//! file header, 32 bytes:
//! ["DKIF":4][version:2 = 0][header_len:2 = 32]["VP80":4][width:2][height:2]
//! [rate:4][scale:4][frame_count:4][reserved:4 = 0]
//!
//! per frame, 12 bytes + payload:
//! [size:4][timestamp:8][payload:size]
//! ```
//!
//! # Field order
//!
//! The timebase is usually described as `scale/rate`, but the header stores
//! the **rate** at offset 16 and the **scale** at offset 20.  Receivers in the
//! field depend on exactly this order.
//!
//! # Frame count
//!
//! The header goes out at the very start of a live, one-way TCP stream, before
//! any frame exists, and the stream cannot seek back to patch it.  The
//! `frame_count` field is therefore always written as 0 and readers of the
//! live stream must treat it as advisory.

use std::io::{self, Write};

/// Size of the IVF file header.
pub const IVF_HEADER_LEN: usize = 32;
/// Size of the per-frame header.
pub const IVF_FRAME_HEADER_LEN: usize = 12;
/// Default timebase numerator: one tick per microsecond.
pub const DEFAULT_TIMEBASE_SCALE: u32 = 1;
/// Default timebase denominator.
pub const DEFAULT_TIMEBASE_RATE: u32 = 1_000_000;

const SIGNATURE: &[u8; 4] = b"DKIF";
const FOURCC_VP8: &[u8; 4] = b"VP80";

/// Builds the 32-byte IVF file header.
pub fn write_header(
    frame_count: u32,
    width: u16,
    height: u16,
    timebase_scale: u32,
    timebase_rate: u32,
) -> [u8; IVF_HEADER_LEN] {
    let mut header = [0u8; IVF_HEADER_LEN];
    header[0..4].copy_from_slice(SIGNATURE);
    header[4..6].copy_from_slice(&0u16.to_le_bytes()); // version
    header[6..8].copy_from_slice(&(IVF_HEADER_LEN as u16).to_le_bytes());
    header[8..12].copy_from_slice(FOURCC_VP8);
    header[12..14].copy_from_slice(&width.to_le_bytes());
    header[14..16].copy_from_slice(&height.to_le_bytes());
    header[16..20].copy_from_slice(&timebase_rate.to_le_bytes());
    header[20..24].copy_from_slice(&timebase_scale.to_le_bytes());
    header[24..28].copy_from_slice(&frame_count.to_le_bytes());
    // bytes 28..32 reserved, left zero
    header
}

/// Builds the 12-byte header that precedes each frame payload.
pub fn write_frame_header(size: u32, timestamp: u64) -> [u8; IVF_FRAME_HEADER_LEN] {
    let mut header = [0u8; IVF_FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(&size.to_le_bytes());
    header[4..12].copy_from_slice(&timestamp.to_le_bytes());
    header
}

/// Fields recovered from an IVF file header by [`parse_ivf_header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub width: u16,
    pub height: u16,
    pub timebase_scale: u32,
    pub timebase_rate: u32,
    pub frame_count: u32,
}

/// Parses a 32-byte IVF file header.
///
/// Returns `None` if `bytes` is too short or does not start with a `DKIF`
/// signature and `VP80` fourcc.
pub fn parse_ivf_header(bytes: &[u8]) -> Option<IvfHeader> {
    if bytes.len() < IVF_HEADER_LEN || &bytes[0..4] != SIGNATURE || &bytes[8..12] != FOURCC_VP8 {
        return None;
    }
    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let u32_at =
        |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    Some(IvfHeader {
        width: u16_at(12),
        height: u16_at(14),
        timebase_rate: u32_at(16),
        timebase_scale: u32_at(20),
        frame_count: u32_at(24),
    })
}

/// Streams VP8 frames into an IVF container.
///
/// The muxer holds no writer of its own; every call takes the sink it should
/// write to, so the same muxer state follows whatever connection currently
/// owns the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfMuxer {
    width: u16,
    height: u16,
    timebase_scale: u32,
    timebase_rate: u32,
    frame_count: u32,
}

impl IvfMuxer {
    /// Creates a muxer with the default microsecond timebase.
    pub fn new(width: u16, height: u16) -> Self {
        Self::with_timebase(width, height, DEFAULT_TIMEBASE_SCALE, DEFAULT_TIMEBASE_RATE)
    }

    /// Creates a muxer with an explicit `scale/rate` timebase.
    pub fn with_timebase(width: u16, height: u16, timebase_scale: u32, timebase_rate: u32) -> Self {
        Self {
            width,
            height,
            timebase_scale,
            timebase_rate,
            frame_count: 0,
        }
    }

    /// Number of frames written so far.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Writes the file header to `out`.
    ///
    /// Called once, before any frame.  The header reports the frame count
    /// known at that moment, which on a fresh muxer is 0.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from `out`.
    pub fn write_header<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&write_header(
            self.frame_count,
            self.width,
            self.height,
            self.timebase_scale,
            self.timebase_rate,
        ))
    }

    /// Writes one frame (12-byte header followed by `payload`) to `out`.
    ///
    /// `timestamp` is in timebase ticks; with the default timebase this is the
    /// encoder's presentation time in microseconds.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for payloads larger than
    /// `u32::MAX` bytes, otherwise propagates any I/O error from `out`.
    pub fn write_frame<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        payload: &[u8],
        timestamp: u64,
    ) -> io::Result<()> {
        let size = u32::try_from(payload.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "IVF frame exceeds u32::MAX bytes")
        })?;
        out.write_all(&write_frame_header(size, timestamp))?;
        out.write_all(payload)?;
        self.frame_count = self.frame_count.wrapping_add(1);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
