//! Infrastructure layer for the sender.
//!
//! Contains OS-facing adapters: the encoder boundary and its drain thread,
//! TCP/UDP sockets, and configuration files.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `cast_core`.  The application layer reaches in only for the encoder
//! boundary types.

pub mod encoder;
pub mod network;
pub mod storage;
