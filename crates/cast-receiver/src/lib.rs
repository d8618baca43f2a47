//! cast-receiver library entry point.
//!
//! The receiver is the viewer half of a cast: it answers discovery probes so
//! senders can find it, and it turns one TCP connection into a raw
//! elementary stream written to a file or stdout.  The binary in `main.rs`
//! and the integration tests share this module tree.

pub mod infrastructure;
