//! # cast-core
//!
//! Shared library for CastScreen containing the byte-level formats that travel
//! between a screen sender and a viewer.
//!
//! This crate is used by both the sender and the receiver applications.
//! It has no dependencies on encoders or network sockets: apart from config
//! file lookup, every function either builds bytes, parses bytes, or drives a
//! handshake over any `Read + Write` the caller hands in.
//!
//! # Architecture overview
//!
//! CastScreen mirrors a live screen to a remote viewer.  The sender captures
//! the screen, hands it to a hardware video encoder, and streams the encoded
//! frames over a single TCP connection.  Receivers advertise themselves on
//! the LAN over UDP so a sender can find them without typing an IP address.
//!
//! - **`protocol`** – How bytes travel over the network:
//!   - `handshake`: the HTTP-shaped header that opens every stream, and the
//!     one-word `mirror` trigger an inbound viewer must send first.
//!   - `frame_header`: the fixed H.264 SPS/PPS blobs for the two supported
//!     resolutions.
//!   - `ivf`: the IVF container used to frame VP8 output.
//!   - `discovery`: the UDP probe token and the JSON document receivers reply with.
//!
//! - **`domain`** – The values a streaming session is built from:
//!   `SessionConfig`, `VideoCodec`, and `CompressedFrame`.
//!
//! - **`config`** – Locating and reading the binaries' TOML config files.

pub mod config;
pub mod domain;
pub mod protocol;

pub use config::ConfigError;
pub use domain::frame::CompressedFrame;
pub use domain::session::{SessionConfig, SessionConfigError, VideoCodec};
pub use protocol::discovery::{DiscoveryResponse, DiscoveryWireError};
pub use protocol::frame_header::lookup_codec_init;
pub use protocol::handshake::{perform_handshake, HandshakeError, HandshakeRole, StreamEncoding};
pub use protocol::ivf::IvfMuxer;
