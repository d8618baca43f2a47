//! TOML configuration for the sender.
//!
//! Read from `$CAST_SENDER_CONFIG` if set, otherwise from the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\CastScreen\sender.toml`
//! - Linux:    `$XDG_CONFIG_HOME/castscreen/sender.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/CastScreen/sender.toml`
//!
//! A missing file is not an error: every field has a default, so the sender
//! runs with the stock settings until someone writes a file.  The sender
//! never writes the file itself.
//!
//! ```toml
//! [sender]
//! log_level = "debug"
//!
//! [session]
//! codec = "h264"        # or "vp8"
//! width = 1280
//! height = 720
//! receiver = ""         # empty: wait for a viewer; "10.0.0.5": dial it
//!
//! [network]
//! viewer_port = 53515
//!
//! [discovery]
//! enabled = true
//! entry_ttl_secs = 30   # 0 keeps viewers forever
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, and `#[serde(default)]` on each
//! section lets a whole table be left out.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cast_core::config::{self, parse_ip};
use cast_core::domain::session::{DEFAULT_BITRATE, DEFAULT_DPI, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use cast_core::protocol::{DISCOVERY_PORT, VIEWER_PORT};
use cast_core::{SessionConfig, VideoCodec};
use serde::{Deserialize, Serialize};

use crate::infrastructure::network::discovery::DiscoverySettings;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CAST_SENDER_CONFIG";

const CONFIG_FILE_NAME: &str = "sender.toml";

pub use cast_core::config::ConfigError;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SenderConfig {
    #[serde(default)]
    pub sender: SenderSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderSection {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Parameters of the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Encoder bitrate in bits per second.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Viewer to dial.  Empty selects Listener mode.
    #[serde(default)]
    pub receiver: String,
}

/// Port and address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// TCP port viewers connect to, and the default port dialled in Connector mode.
    #[serde(default = "default_viewer_port")]
    pub viewer_port: u16,
    /// UDP port discovery probes are sent to.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// IP address local sockets bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination address of discovery probes.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
}

/// Discovery loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pause between probe cycles.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// How long each cycle collects replies.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Viewers not heard from for this long are dropped; `0` disables expiry.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_width() -> u32 {
    DEFAULT_WIDTH
}
fn default_height() -> u32 {
    DEFAULT_HEIGHT
}
fn default_dpi() -> u32 {
    DEFAULT_DPI
}
fn default_bitrate() -> u32 {
    DEFAULT_BITRATE
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
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_true() -> bool {
    true
}
fn default_probe_interval_ms() -> u64 {
    3_000
}
fn default_response_timeout_ms() -> u64 {
    3_000
}
fn default_entry_ttl_secs() -> u64 {
    30
}

impl Default for SenderSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            width: default_width(),
            height: default_height(),
            dpi: default_dpi(),
            bitrate: default_bitrate(),
            receiver: String::new(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            viewer_port: default_viewer_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            probe_interval_ms: default_probe_interval_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl SenderConfig {
    /// The immutable session parameters this configuration describes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            width: self.session.width,
            height: self.session.height,
            dpi: self.session.dpi,
            bitrate: self.session.bitrate,
            codec: self.session.codec,
        }
    }

    /// Returns `true` when a receiver address is configured (Connector mode).
    pub fn is_connector(&self) -> bool {
        !self.session.receiver.trim().is_empty()
    }

    /// Settings for the discovery loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `bind_address` or
    /// `broadcast_address` is not an IP address.
    pub fn discovery_settings(&self) -> Result<DiscoverySettings, ConfigError> {
        let bind = parse_ip("bind_address", &self.network.bind_address)?;
        let broadcast = parse_ip("broadcast_address", &self.network.broadcast_address)?;
        let ttl = self.discovery.entry_ttl_secs;

        Ok(DiscoverySettings {
            bind_address: SocketAddr::new(bind, 0),
            probe_target: SocketAddr::new(broadcast, self.network.discovery_port),
            response_timeout: Duration::from_millis(self.discovery.response_timeout_ms),
            probe_interval: Duration::from_millis(self.discovery.probe_interval_ms),
            entry_ttl: (ttl > 0).then(|| Duration::from_secs(ttl)),
        })
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Resolves the config file path: `$CAST_SENDER_CONFIG`, else the platform
/// config directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if neither is available.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    config::config_file_path(CONFIG_PATH_ENV, CONFIG_FILE_NAME)
}

/// Loads the sender configuration from [`config_file_path`].
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<SenderConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the sender configuration from `path`, returning the defaults if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<SenderConfig, ConfigError> {
    config::load_toml_or_default(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
