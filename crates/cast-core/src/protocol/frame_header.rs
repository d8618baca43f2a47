//! Fixed H.264 codec init data for the resolutions receivers understand.
//!
//! Existing receivers expect, right after the handshake header, a 48-byte blob:
//! a `0x21` marker, zero padding, then an Annex-B SPS and PPS each led by a
//! `00 00 00 01` start code.  The bytes were captured from a 25 fps baseline
//! encoder and must be sent verbatim; they are never derived at runtime.
//!
//! VP8 sessions do not use this table.  Their init data is the IVF file
//! header (see [`crate::protocol::ivf`]).

use crate::domain::session::VideoCodec;

/// Length of every catalogued init blob.
pub const CODEC_INIT_LEN: usize = 48;

/// SPS/PPS for 1280x720 at 25 fps.
pub const H264_INIT_1280X720: [u8; CODEC_INIT_LEN] = [
    0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, //
    0x67, 0x42, 0x80, 0x20, 0xda, 0x01, 0x40, 0x16, //
    0xe8, 0x06, 0xd0, 0xa1, 0x35, 0x00, 0x00, 0x00, //
    0x01, 0x68, 0xce, 0x06, 0xe2, 0x32, 0x24, 0x00, //
    0x00, 0x7a, 0x83, 0x3d, 0xae, 0x37, 0x00, 0x00, //
];

/// SPS/PPS for 800x480 at 25 fps.
pub const H264_INIT_800X480: [u8; CODEC_INIT_LEN] = [
    0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, //
    0x67, 0x42, 0x80, 0x20, 0xda, 0x03, 0x20, 0xf6, //
    0x80, 0x6d, 0x0a, 0x13, 0x50, 0x00, 0x00, 0x00, //
    0x01, 0x68, 0xce, 0x06, 0xe2, 0x32, 0x24, 0x00, //
    0x00, 0x7a, 0x83, 0x3d, 0xae, 0x37, 0x00, 0x00, //
];

/// Returns the init blob for `codec` at exactly `width` x `height`.
///
/// Returns `None` for VP8 and for any H.264 resolution other than
/// 1280x720 and 800x480; the caller must then close the connection without
/// sending init data.
pub fn lookup_codec_init(codec: VideoCodec, width: u32, height: u32) -> Option<&'static [u8]> {
    match (codec, width, height) {
        (VideoCodec::H264, 1280, 720) => Some(&H264_INIT_1280X720),
        (VideoCodec::H264, 800, 480) => Some(&H264_INIT_800X480),
        _ => None,
    }
}
