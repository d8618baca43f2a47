//! Application layer for the sender.
//!
//! Contains use-case logic that is independent of sockets, threads and the
//! platform encoder.  Each sub-module implements one use case:
//!
//! - **`drain_encoder`** – Polls the encoder's output queue, forwards every
//!   frame to the active viewer connection, and tears the pipeline down when
//!   that connection fails.
//!
//! The layer talks to the outside world only through the traits it defines
//! (`FrameSink`, `CaptureControl`) and the encoder boundary trait, so every
//! rule it enforces is unit-testable with in-memory doubles.

pub mod drain_encoder;
