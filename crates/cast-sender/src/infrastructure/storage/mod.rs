//! File-system storage for the sender: read-only TOML configuration.

pub mod config;
