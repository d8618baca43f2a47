//! Network infrastructure for the sender.
//!
//! # Sub-modules
//!
//! - **`transport`** – The TCP stream to a viewer, in Listener mode (viewer
//!   dials us and sends `mirror`) or Connector mode (we dial the viewer).
//!   Runs the handshake and publishes the finished connection.
//!
//! - **`sink`** – The single-slot mailbox holding the connection frames are
//!   currently forwarded to.  Shared between the transport threads and the
//!   drain thread.
//!
//! - **`discovery`** – Broadcasts UDP probes and keeps a directory of the
//!   viewers that answer.

pub mod discovery;
pub mod sink;
pub mod transport;
