//! Streaming session parameters.
//!
//! A [`SessionConfig`] is fixed for the whole life of one cast: the encoder is
//! configured from it, the handshake advertises its width and height, and the
//! codec decides which init data (H.264 blob or IVF header) follows the
//! handshake.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::frame_header::lookup_codec_init;

/// Default capture width in pixels.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default capture height in pixels.
pub const DEFAULT_HEIGHT: u32 = 720;
/// Default virtual display density.
pub const DEFAULT_DPI: u32 = 320;
/// Default encoder bitrate in bits per second (6 Mbps).
pub const DEFAULT_BITRATE: u32 = 6_144_000;
/// Frame rate the encoder is configured for.
pub const DEFAULT_FPS: u32 = 25;

/// Video codec used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC, streamed as a raw Annex-B elementary stream.
    #[default]
    #[serde(alias = "avc", alias = "video/avc")]
    H264,
    /// VP8, streamed inside an IVF container.
    #[serde(alias = "video/x-vnd.on2.vp8")]
    Vp8,
}

impl VideoCodec {
    /// MIME type an encoder is created with for this codec.
    pub fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/avc",
            VideoCodec::Vp8 => "video/x-vnd.on2.vp8",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => f.write_str("H.264"),
            VideoCodec::Vp8 => f.write_str("VP8"),
        }
    }
}

/// Errors returned by [`SessionConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionConfigError {
    /// Width or height is zero.
    #[error("invalid resolution {width}x{height}: dimensions must be non-zero")]
    ZeroDimension { width: u32, height: u32 },

    /// No codec init data exists for this resolution.
    #[error("unsupported resolution {width}x{height} for {codec}")]
    UnsupportedResolution {
        codec: VideoCodec,
        width: u32,
        height: u32,
    },

    /// The IVF header stores dimensions as 16-bit values.
    #[error("resolution {width}x{height} does not fit the IVF header")]
    DimensionOverflow { width: u32, height: u32 },
}

/// Immutable parameters of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// Target encoder bitrate in bits per second.
    pub bitrate: u32,
    pub codec: VideoCodec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            dpi: DEFAULT_DPI,
            bitrate: DEFAULT_BITRATE,
            codec: VideoCodec::H264,
        }
    }
}

impl SessionConfig {
    /// Checks that a stream can actually be opened with this configuration.
    ///
    /// # Errors
    ///
    /// - [`SessionConfigError::ZeroDimension`] for a zero width or height.
    /// - [`SessionConfigError::UnsupportedResolution`] for an H.264 session
    ///   whose resolution has no catalogued SPS/PPS blob.
    /// - [`SessionConfigError::DimensionOverflow`] for a VP8 session wider or
    ///   taller than 65535 pixels.
    pub fn validate(&self) -> Result<(), SessionConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionConfigError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }

        match self.codec {
            VideoCodec::H264 => {
                if lookup_codec_init(self.codec, self.width, self.height).is_none() {
                    return Err(SessionConfigError::UnsupportedResolution {
                        codec: self.codec,
                        width: self.width,
                        height: self.height,
                    });
                }
            }
            VideoCodec::Vp8 => {
                if u16::try_from(self.width).is_err() || u16::try_from(self.height).is_err() {
                    return Err(SessionConfigError::DimensionOverflow {
                        width: self.width,
                        height: self.height,
                    });
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_is_h264_720p() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.codec, VideoCodec::H264);
        assert_eq!((cfg.width, cfg.height, cfg.dpi), (1280, 720, 320));
        assert_eq!(cfg.bitrate, 6_144_000);
    }

    #[test]
    fn test_validate_accepts_catalogued_h264_resolutions() {
        for (width, height) in [(1280, 720), (800, 480)] {
            let cfg = SessionConfig {
                width,
                height,
                ..SessionConfig::default()
            };
            assert_eq!(cfg.validate(), Ok(()), "{width}x{height} must be accepted");
        }
    }

    #[test]
    fn test_validate_rejects_unknown_h264_resolution() {
        // Arrange
        let cfg = SessionConfig {
            width: 1920,
            height: 1080,
            ..SessionConfig::default()
        };

        // Act
        let result = cfg.validate();

        // Assert
        assert_eq!(
            result,
            Err(SessionConfigError::UnsupportedResolution {
                codec: VideoCodec::H264,
                width: 1920,
                height: 1080,
            })
        );
    }

    #[test]
    fn test_validate_accepts_any_vp8_resolution_within_u16() {
        let cfg = SessionConfig {
            width: 1920,
            height: 1080,
            codec: VideoCodec::Vp8,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_vp8_resolution_overflowing_ivf_fields() {
        let cfg = SessionConfig {
            width: 70_000,
            height: 720,
            codec: VideoCodec::Vp8,
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SessionConfigError::DimensionOverflow { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let cfg = SessionConfig {
            width: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SessionConfigError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn test_codec_mime_types() {
        assert_eq!(VideoCodec::H264.mime_type(), "video/avc");
        assert_eq!(VideoCodec::Vp8.mime_type(), "video/x-vnd.on2.vp8");
    }
}
