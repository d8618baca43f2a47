//! Encoder boundary for the sender.
//!
//! The platform video encoder is a push-style queue of compressed output
//! buffers.  Each buffer is identified by an integer index, must be fetched
//! while it is owned by the caller, and must be handed back with
//! [`EncoderOutput::release_output_buffer`] or the encoder stalls once its
//! small pool of buffers is exhausted.
//!
//! # Poll semantics
//!
//! [`EncoderOutput::dequeue_output_buffer`] never blocks.  It returns one of:
//!
//! | Result | Meaning |
//! |---|---|
//! | [`DequeueResult::TryAgainLater`] | nothing is ready right now |
//! | [`DequeueResult::OutputFormatChanged`] | the encoder renegotiated its output format |
//! | [`DequeueResult::Invalid`] | a transient negative index; poll again |
//! | [`DequeueResult::Buffer`] | buffer `index` is ready, described by [`BufferInfo`] |
//!
//! # Testability
//!
//! The [`EncoderOutput`] trait lets the drain loop run against
//! [`mock::ScriptedEncoder`] in tests and [`mock::SyntheticEncoder`] in the
//! binary while no platform encoder adapter is linked.

pub mod drain_task;
pub mod mock;

/// The buffer holds a key frame.
pub const BUFFER_FLAG_KEY_FRAME: u32 = 0x1;
/// The buffer holds codec configuration (SPS/PPS) rather than frame data.
pub const BUFFER_FLAG_CODEC_CONFIG: u32 = 0x2;
/// The buffer is the last one the encoder will produce.
pub const BUFFER_FLAG_END_OF_STREAM: u32 = 0x4;

/// Metadata describing a ready output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of valid data within the buffer.
    pub offset: usize,
    /// Number of valid bytes starting at `offset`.
    pub size: usize,
    /// Presentation time in microseconds.
    pub presentation_time_us: u64,
    /// Bitwise OR of the `BUFFER_FLAG_*` constants.
    pub flags: u32,
}

impl BufferInfo {
    /// Returns `true` if the buffer carries codec configuration only.
    pub fn is_codec_config(&self) -> bool {
        self.flags & BUFFER_FLAG_CODEC_CONFIG != 0
    }

    /// Returns `true` if this is the final buffer of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.flags & BUFFER_FLAG_END_OF_STREAM != 0
    }

    /// Returns `true` if the buffer holds a key frame.
    pub fn is_key_frame(&self) -> bool {
        self.flags & BUFFER_FLAG_KEY_FRAME != 0
    }
}

/// Outcome of one zero-timeout poll of the encoder's output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueResult {
    /// No output is ready yet.
    TryAgainLater,
    /// The output format changed; no buffer accompanies this result.
    OutputFormatChanged,
    /// Any other negative index the encoder may report.
    Invalid(i32),
    /// Output buffer `index` is ready.
    Buffer { index: usize, info: BufferInfo },
}

/// Trait abstracting the output side of a video encoder.
///
/// The production implementation wraps a platform encoder; tests use
/// [`mock::ScriptedEncoder`].
pub trait EncoderOutput: Send {
    /// Polls for the next output buffer without blocking.
    fn dequeue_output_buffer(&mut self) -> DequeueResult;

    /// Returns the full contents of output buffer `index`, or `None` if the
    /// encoder cannot provide it.
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Returns buffer `index` to the encoder.
    fn release_output_buffer(&mut self, index: usize);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
