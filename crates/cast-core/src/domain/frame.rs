//! A single compressed frame as produced by the video encoder.

/// One encoded buffer lifted out of the encoder's output queue.
///
/// The payload is a copy of the buffer's valid byte range, so the encoder
/// buffer can be released before the frame is written to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedFrame {
    /// Encoded bytes (an H.264 access unit or a VP8 frame).
    pub payload: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub presentation_timestamp: u64,
    /// The buffer holds codec configuration (SPS/PPS) rather than picture data.
    pub is_config_blob: bool,
    /// The encoder flagged this as the final buffer of the stream.
    pub is_end_of_stream: bool,
}

impl CompressedFrame {
    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` when the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_frame_len_reports_payload_size() {
        // Arrange
        let frame = CompressedFrame {
            payload: vec![0u8; 17],
            presentation_timestamp: 40_000,
            is_config_blob: false,
            is_end_of_stream: false,
        };

        // Act / Assert
        assert_eq!(frame.len(), 17);
        assert!(!frame.is_empty());
    }
}
