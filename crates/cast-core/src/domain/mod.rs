//! Domain values for a streaming session.
//!
//! - [`session::SessionConfig`] – the immutable parameters a caller picks when
//!   a cast starts (resolution, density, bitrate, codec).
//! - [`frame::CompressedFrame`] – one encoded access unit pulled off the
//!   encoder, alive only for the drain cycle that forwards it.

pub mod frame;
pub mod session;
