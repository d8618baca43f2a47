//! Protocol module containing the stream handshake, codec init data, the IVF
//! muxer, and the discovery wire format.

pub mod discovery;
pub mod frame_header;
pub mod handshake;
pub mod ivf;

/// TCP port a viewer connects to (Listener mode) or a sender dials (Connector mode).
pub const VIEWER_PORT: u16 = 53515;

/// UDP port discovery probes are broadcast to.
pub const DISCOVERY_PORT: u16 = 53515;

pub use discovery::{DiscoveryResponse, DiscoveryWireError, DISCOVERY_PROBE};
pub use frame_header::lookup_codec_init;
pub use handshake::{
    build_stream_header, is_mirror_trigger, parse_stream_header, perform_handshake,
    HandshakeError, HandshakeRole, StreamEncoding, StreamHeader,
};
pub use ivf::{parse_ivf_header, IvfHeader, IvfMuxer};
