//! Infrastructure layer for the receiver.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Answers `hello` probes on the discovery port with the
//!   receiver's JSON metadata document.
//!
//! - **`stream`** – Obtains a stream from a sender, either by accepting a
//!   Connector-mode sender or by dialling a Listener-mode sender and sending
//!   `mirror`, then reads the handshake header and pumps the elementary
//!   stream into an output.
//!
//! - **`player`** – Optional external player that receives the stream on
//!   its stdin.
//!
//! - **`config`** – Read-only TOML configuration.

use std::io;
use std::net::SocketAddr;

use cast_core::{DiscoveryWireError, HandshakeError};
use thiserror::Error;

pub mod config;
pub mod discovery;
pub mod player;
pub mod stream;

/// Error type for receiver operations.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// A socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The sender could not be reached.
    #[error("failed to connect to sender at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The stream header was malformed or incomplete.
    #[error("stream handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The sender closed the connection before the header was complete.
    #[error("sender closed the connection after {received} header bytes")]
    ClosedBeforeHeader { received: usize },

    /// No header terminator within the size limit.
    #[error("stream header exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The metadata document could not be serialised.
    #[error("invalid metadata document: {0}")]
    Metadata(#[from] DiscoveryWireError),

    /// The configured player could not be started.
    #[error("failed to start player {command:?}: {source}")]
    Player {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Any other socket or output failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
