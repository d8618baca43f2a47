//! TOML configuration for the receiver.
//!
//! Read from `$CAST_RECEIVER_CONFIG` if set, otherwise from `receiver.toml`
//! in the same platform directory the sender uses.  A missing file yields
//! the defaults.
//!
//! ```toml
//! [receiver]
//! log_level = "info"
//! name = ""            # empty: "CsReceiver @ <local ip>"
//! output = "-"         # "-" writes the stream to stdout
//! player = ""          # e.g. "ffplay -": pipe the stream into this command
//! sender = ""          # empty: wait for a sender; "10.0.0.7": dial it
//!
//! [network]
//! viewer_port = 53515
//! discovery_port = 53515
//!
//! [display]
//! width = 1280
//! height = 960
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use cast_core::config::{self, parse_ip};
use cast_core::protocol::{DISCOVERY_PORT, VIEWER_PORT};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CAST_RECEIVER_CONFIG";

const CONFIG_FILE_NAME: &str = "receiver.toml";

pub use cast_core::config::ConfigError;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReceiverConfig {
    #[serde(default)]
    pub receiver: ReceiverSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub display: DisplaySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiverSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Name advertised to senders.  Empty derives one from the local IP.
    #[serde(default)]
    pub name: String,
    /// File the stream is written to; `"-"` is stdout.
    #[serde(default = "default_output")]
    pub output: String,
    /// Command that receives the stream on its stdin, e.g. `ffplay -`.
    /// When set it replaces `output`.
    #[serde(default)]
    pub player: String,
    /// Sender to request a stream from.  Empty waits for senders instead.
    #[serde(default)]
    pub sender: String,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_viewer_port")]
    pub viewer_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Display size advertised in discovery replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplaySection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_output() -> String {
    "-".to_string()
}
fn default_true() -> bool {
    true
}
fn default_viewer_port() -> u16 {
    VIEWER_PORT
}
fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    960
}

impl Default for ReceiverSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            name: String::new(),
            output: default_output(),
            player: String::new(),
            sender: String::new(),
            discovery_enabled: default_true(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            viewer_port: default_viewer_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl ReceiverConfig {
    /// Address of the sender to dial, or `None` to wait for senders.
    ///
    /// A bare IP uses `viewer_port`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `sender` is neither an IP
    /// address nor an `ip:port` pair.
    pub fn sender_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        let sender = self.receiver.sender.trim();
        if sender.is_empty() {
            return Ok(None);
        }
        if let Ok(addr) = sender.parse::<SocketAddr>() {
            return Ok(Some(addr));
        }
        let ip = parse_ip("sender", sender)?;
        Ok(Some(SocketAddr::new(ip, self.network.viewer_port)))
    }

    /// Address the stream listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `bind_address` is not an IP.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("bind_address", &self.network.bind_address)?;
        Ok(SocketAddr::new(ip, self.network.viewer_port))
    }

    /// Player command line, or `None` to write to `output`.
    pub fn player_command(&self) -> Option<&str> {
        let player = self.receiver.player.trim();
        (!player.is_empty()).then_some(player)
    }

    /// Advertised name, falling back to `CsReceiver @ <ip>`.
    pub fn display_name(&self, local_ip: IpAddr) -> String {
        let name = self.receiver.name.trim();
        if name.is_empty() {
            format!("CsReceiver @ {local_ip}")
        } else {
            name.to_string()
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Resolves the config file path: `$CAST_RECEIVER_CONFIG`, else the platform
/// config directory.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    config::config_file_path(CONFIG_PATH_ENV, CONFIG_FILE_NAME)
}

/// Loads the receiver configuration from [`config_file_path`].
pub fn load_config() -> Result<ReceiverConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the receiver configuration from `path`, returning the defaults if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ReceiverConfig, ConfigError> {
    config::load_toml_or_default(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
