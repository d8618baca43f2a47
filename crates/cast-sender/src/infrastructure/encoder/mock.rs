//! Encoder doubles.
//!
//! - [`ScriptedEncoder`] replays a fixed sequence of poll results; tests use
//!   it to drive the drain loop through exact scenarios.
//! - [`SyntheticEncoder`] produces a paced stream of test-pattern frames that
//!   look like real encoder output, so the binary can stream end to end
//!   without a platform encoder.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cast_core::domain::session::DEFAULT_FPS;
use cast_core::{lookup_codec_init, SessionConfig, VideoCodec};

use super::{
    BufferInfo, DequeueResult, EncoderOutput, BUFFER_FLAG_CODEC_CONFIG, BUFFER_FLAG_KEY_FRAME,
};

// ── ScriptedEncoder ───────────────────────────────────────────────────────────

/// An [`EncoderOutput`] that replays a scripted list of poll results.
///
/// Once the script runs out every poll returns
/// [`DequeueResult::TryAgainLater`].
#[derive(Debug, Default)]
pub struct ScriptedEncoder {
    script: VecDeque<DequeueResult>,
    buffers: HashMap<usize, Vec<u8>>,
    next_index: usize,
    released: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedEncoder {
    /// Creates an encoder with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a bare poll result.
    pub fn with_result(mut self, result: DequeueResult) -> Self {
        self.script.push_back(result);
        self
    }

    /// Appends a ready buffer whose valid range is all of `bytes`.
    pub fn with_buffer(self, bytes: &[u8], presentation_time_us: u64, flags: u32) -> Self {
        let info = BufferInfo {
            offset: 0,
            size: bytes.len(),
            presentation_time_us,
            flags,
        };
        self.with_buffer_info(bytes, info)
    }

    /// Appends a ready buffer holding `bytes`, described by `info`.
    pub fn with_buffer_info(mut self, bytes: &[u8], info: BufferInfo) -> Self {
        let index = self.allocate_index();
        self.buffers.insert(index, bytes.to_vec());
        self.script.push_back(DequeueResult::Buffer { index, info });
        self
    }

    /// Appends a ready buffer the encoder then fails to hand out.
    pub fn with_missing_buffer(mut self, size: usize) -> Self {
        let index = self.allocate_index();
        let info = BufferInfo {
            size,
            ..BufferInfo::default()
        };
        self.script.push_back(DequeueResult::Buffer { index, info });
        self
    }

    /// Shared log of released buffer indices, in release order.
    ///
    /// The handle stays valid after the encoder is moved into a drain loop.
    pub fn release_log(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.released)
    }

    /// Number of scripted results not yet returned.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn allocate_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

impl EncoderOutput for ScriptedEncoder {
    fn dequeue_output_buffer(&mut self) -> DequeueResult {
        self.script
            .pop_front()
            .unwrap_or(DequeueResult::TryAgainLater)
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(&index).map(Vec::as_slice)
    }

    fn release_output_buffer(&mut self, index: usize) {
        self.buffers.remove(&index);
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(index);
    }
}

// ── SyntheticEncoder ──────────────────────────────────────────────────────────

/// Buffers the synthetic encoder may have outstanding before it stalls.
const OUTPUT_POOL_SIZE: usize = 4;

/// Smallest synthetic frame, so low bitrates still produce a plausible NAL.
const MIN_FRAME_SIZE: usize = 64;

/// A paced test-pattern encoder.
///
/// Behaves like a hardware encoder that has just been started: it first
/// reports a format change, then (for H.264) one codec-config buffer, then
/// one frame every `1/fps` seconds with a key frame once per second.  Frame
/// size follows the configured bitrate.  Like a real encoder it stops
/// producing output while [`OUTPUT_POOL_SIZE`] buffers are unreleased.
#[derive(Debug)]
pub struct SyntheticEncoder {
    codec: VideoCodec,
    width: u32,
    height: u32,
    fps: u32,
    frame_interval: Duration,
    frame_size: usize,
    next_frame_at: Instant,
    frame_number: u64,
    format_announced: bool,
    config_pending: bool,
    slots: HashMap<usize, Vec<u8>>,
    next_index: usize,
}

impl SyntheticEncoder {
    /// Creates an encoder for `config` at the default frame rate.
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_frame_rate(config, DEFAULT_FPS)
    }

    /// Creates an encoder for `config` producing `fps` frames per second.
    pub fn with_frame_rate(config: &SessionConfig, fps: u32) -> Self {
        let fps = fps.max(1);
        let frame_size = (config.bitrate / 8 / fps) as usize;
        Self {
            codec: config.codec,
            width: config.width,
            height: config.height,
            fps,
            frame_interval: Duration::from_secs(1) / fps,
            frame_size: frame_size.max(MIN_FRAME_SIZE),
            next_frame_at: Instant::now(),
            frame_number: 0,
            format_announced: false,
            config_pending: config.codec == VideoCodec::H264,
            slots: HashMap::new(),
            next_index: 0,
        }
    }

    /// Number of frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.frame_number
    }

    fn enqueue(&mut self, bytes: Vec<u8>, presentation_time_us: u64, flags: u32) -> DequeueResult {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        let info = BufferInfo {
            offset: 0,
            size: bytes.len(),
            presentation_time_us,
            flags,
        };
        self.slots.insert(index, bytes);
        DequeueResult::Buffer { index, info }
    }

    fn codec_config(&self) -> Vec<u8> {
        // SPS/PPS portion of the catalogued blob, starting at the first start code.
        lookup_codec_init(self.codec, self.width, self.height)
            .map(|blob| blob[12..].to_vec())
            .unwrap_or_default()
    }

    fn next_frame(&self, key_frame: bool) -> Vec<u8> {
        let mut frame = match (self.codec, key_frame) {
            (VideoCodec::H264, true) => vec![0x00, 0x00, 0x00, 0x01, 0x65],
            (VideoCodec::H264, false) => vec![0x00, 0x00, 0x00, 0x01, 0x41],
            (VideoCodec::Vp8, true) => {
                let mut tag = vec![0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a];
                tag.extend_from_slice(&(self.width as u16).to_le_bytes());
                tag.extend_from_slice(&(self.height as u16).to_le_bytes());
                tag
            }
            (VideoCodec::Vp8, false) => vec![0x11, 0x02, 0x00],
        };
        let seed = self.frame_number as u8;
        frame.extend((0..self.frame_size.saturating_sub(frame.len())).map(|i| seed.wrapping_add(i as u8)));
        frame
    }
}

impl EncoderOutput for SyntheticEncoder {
    fn dequeue_output_buffer(&mut self) -> DequeueResult {
        if !self.format_announced {
            self.format_announced = true;
            return DequeueResult::OutputFormatChanged;
        }
        if self.slots.len() >= OUTPUT_POOL_SIZE {
            return DequeueResult::TryAgainLater;
        }
        if self.config_pending {
            self.config_pending = false;
            let config = self.codec_config();
            if !config.is_empty() {
                return self.enqueue(config, 0, BUFFER_FLAG_CODEC_CONFIG);
            }
        }

        let now = Instant::now();
        if now < self.next_frame_at {
            return DequeueResult::TryAgainLater;
        }

        let key_frame = self.frame_number % u64::from(self.fps) == 0;
        let bytes = self.next_frame(key_frame);
        let pts = self.frame_number * self.frame_interval.as_micros() as u64;
        self.frame_number += 1;
        self.next_frame_at += self.frame_interval;
        // Skip frames rather than burst after a long pause.
        if self.next_frame_at < now {
            self.next_frame_at = now + self.frame_interval;
        }

        let flags = if key_frame { BUFFER_FLAG_KEY_FRAME } else { 0 };
        self.enqueue(bytes, pts, flags)
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(&index).map(Vec::as_slice)
    }

    fn release_output_buffer(&mut self, index: usize) {
        self.slots.remove(&index);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
