//! EncoderDrainLoop: moves encoded buffers from the encoder to the viewer.
//!
//! One call to [`EncoderDrainLoop::run_cycle`] is one *drain cycle*: the
//! encoder's output queue is polled with zero timeout until it reports that
//! nothing is ready, and every ready buffer is copied, forwarded to the
//! active sink, and released back to the encoder.  The caller re-runs the
//! cycle on a fixed cadence (see
//! [`crate::infrastructure::encoder::drain_task::DrainTask`]).
//!
//! # Forwarding policy
//!
//! | Buffer | Action |
//! |---|---|
//! | codec config (SPS/PPS) | released, not forwarded; the handshake already sent init data |
//! | empty | released, not forwarded |
//! | frame data | valid byte range copied, forwarded, released |
//! | end of stream | handled as above, then the cycle ends |
//!
//! A frame forwarded while no viewer is connected is dropped silently.  A
//! write failure on the active viewer connection is terminal: the cycle
//! stops, the [`CaptureControl`] hook tears the pipeline down, and the error
//! is returned so the scheduler does not run another cycle.
//!
//! # Architecture
//!
//! The loop depends only on traits: [`EncoderOutput`] for the encoder,
//! [`FrameSink`] for the connection and [`CaptureControl`] for teardown.

use std::io;
use std::sync::Arc;

use cast_core::CompressedFrame;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::infrastructure::encoder::{BufferInfo, DequeueResult, EncoderOutput};

/// Error type for a drain cycle.  Every variant is fatal for the session.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The encoder reported buffer `index` ready but could not hand it out.
    #[error("encoder output buffer {index} is unavailable")]
    MissingBuffer { index: usize },

    /// The buffer's valid range lies outside the bytes the encoder returned.
    #[error("output buffer {index}: range {offset}+{size} exceeds buffer length {len}")]
    BufferRange {
        index: usize,
        offset: usize,
        size: usize,
        len: usize,
    },

    /// Writing a frame to the active viewer connection failed.
    #[error("failed to write frame to the active sink: {source}")]
    SinkWrite {
        #[source]
        source: io::Error,
    },
}

/// What happened to a frame handed to a [`FrameSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was written to the active connection.
    Written,
    /// No connection is active, or the write hit a connection that had
    /// already been replaced; the frame is gone.
    Dropped,
}

/// Destination for forwarded frames.
///
/// Infrastructure implementation is the active-sink slot; tests use mocks.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    /// Writes `frame` to the current connection.
    ///
    /// Returns `Err` only when the write failed on the connection that is
    /// still the active one.
    fn forward(&self, frame: &CompressedFrame) -> io::Result<Delivery>;
}

/// Pipeline teardown hook invoked when a drain cycle fails.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureControl: Send + Sync {
    /// Stops capture and releases the session's resources.
    fn stop_capture(&self, reason: &DrainError);
}

/// Counters describing one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainCycleReport {
    /// Frames written to the active connection.
    pub forwarded: usize,
    /// Frames dropped because no connection was active.
    pub dropped: usize,
    /// Codec-config buffers released without forwarding.
    pub suppressed: usize,
    /// Buffers returned to the encoder.
    pub released: usize,
    /// The cycle ended on an end-of-stream buffer.
    pub end_of_stream: bool,
}

/// Drains one encoder into one sink.
pub struct EncoderDrainLoop<E: EncoderOutput> {
    encoder: E,
    sink: Arc<dyn FrameSink>,
    capture: Arc<dyn CaptureControl>,
}

impl<E: EncoderOutput> EncoderDrainLoop<E> {
    /// Creates a drain loop over `encoder`.
    pub fn new(encoder: E, sink: Arc<dyn FrameSink>, capture: Arc<dyn CaptureControl>) -> Self {
        Self {
            encoder,
            sink,
            capture,
        }
    }

    /// Runs one drain cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`DrainError`] after tearing the pipeline down through
    /// [`CaptureControl::stop_capture`].  The failing buffer has already been
    /// released when this returns.
    pub fn run_cycle(&mut self) -> Result<DrainCycleReport, DrainError> {
        let mut report = DrainCycleReport::default();

        loop {
            match self.encoder.dequeue_output_buffer() {
                DequeueResult::TryAgainLater => break,
                DequeueResult::OutputFormatChanged => {
                    debug!("encoder output format changed");
                }
                DequeueResult::Invalid(code) => {
                    trace!("ignoring encoder output index {code}");
                }
                DequeueResult::Buffer { index, info } => {
                    let outcome = self.forward_buffer(index, &info, &mut report);
                    self.encoder.release_output_buffer(index);
                    report.released += 1;

                    if let Err(e) = outcome {
                        error!("drain cycle failed, stopping capture: {e}");
                        self.capture.stop_capture(&e);
                        return Err(e);
                    }
                    if info.is_end_of_stream() {
                        debug!("encoder signalled end of stream");
                        report.end_of_stream = true;
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Consumes the loop and returns the encoder.
    pub fn into_encoder(self) -> E {
        self.encoder
    }

    fn forward_buffer(
        &self,
        index: usize,
        info: &BufferInfo,
        report: &mut DrainCycleReport,
    ) -> Result<(), DrainError> {
        let size = if info.is_codec_config() {
            report.suppressed += 1;
            0
        } else {
            info.size
        };
        if size == 0 {
            return Ok(());
        }

        let bytes = self
            .encoder
            .output_buffer(index)
            .ok_or(DrainError::MissingBuffer { index })?;
        let payload = info
            .offset
            .checked_add(size)
            .and_then(|end| bytes.get(info.offset..end))
            .ok_or(DrainError::BufferRange {
                index,
                offset: info.offset,
                size,
                len: bytes.len(),
            })?
            .to_vec();

        let frame = CompressedFrame {
            payload,
            presentation_timestamp: info.presentation_time_us,
            is_config_blob: false,
            is_end_of_stream: info.is_end_of_stream(),
        };

        match self.sink.forward(&frame) {
            Ok(Delivery::Written) => report.forwarded += 1,
            Ok(Delivery::Dropped) => report.dropped += 1,
            Err(source) => return Err(DrainError::SinkWrite { source }),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
