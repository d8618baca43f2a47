//! UDP discovery wire format.
//!
//! A sender looking for viewers broadcasts the ASCII token `hello` to the
//! discovery port.  Each viewer replies, unicast to the probe's source
//! address, with a JSON object describing itself:
//!
//! ```json
//! {"port":53515,"name":"CsReceiver @ 192.168.0.11","id":"192.168.0.11",
//!  "width":1280,"height":960,"mirror":"h264","audio":"pcm",
//!  "subtitles":"text/vtt","proxyHeaders":true,"hls":false,"upsell":true}
//! ```
//!
//! Only `name`, `width` and `height` are required.  `width`/`height` may be
//! JSON numbers or numeric strings; both forms exist in deployed receivers.
//! `id` is the address the viewer *claims* to have; senders should connect to
//! the address the datagram actually came from and treat `id` as a label.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Probe payload broadcast by senders.
pub const DISCOVERY_PROBE: &[u8] = b"hello";

/// Responses this short or shorter are ignored without parsing.
pub const MIN_RESPONSE_LEN: usize = 9;

/// Errors produced while decoding a discovery response.
#[derive(Debug, Error)]
pub enum DiscoveryWireError {
    /// The datagram is too short to be a metadata document.
    #[error("discovery response too short: {len} bytes")]
    TooShort { len: usize },

    /// The datagram is not a JSON object with the required fields.
    #[error("invalid discovery response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata document a viewer sends in reply to a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Display name; the key a sender's directory is indexed by.
    pub name: String,
    /// Display width the viewer advertises.
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub width: u32,
    /// Display height the viewer advertises.
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub height: u32,
    /// Self-reported address.  Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// TCP port the viewer accepts streams on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Video format the viewer mirrors, e.g. `h264`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,
    /// Any further keys, kept so the document round-trips.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DiscoveryResponse {
    /// Builds the document a viewer at `ip` replies with.
    pub fn metadata(name: &str, ip: &str, width: u32, height: u32, port: u16) -> Self {
        let mut extra = Map::new();
        extra.insert("audio".into(), Value::from("pcm"));
        extra.insert("subtitles".into(), Value::from("text/vtt"));
        extra.insert("proxyHeaders".into(), Value::from(true));
        extra.insert("hls".into(), Value::from(false));
        extra.insert("upsell".into(), Value::from(true));

        Self {
            name: name.to_string(),
            width,
            height,
            id: Some(ip.to_string()),
            port: Some(port),
            mirror: Some("h264".to_string()),
            extra,
        }
    }

    /// Decodes a response datagram.
    ///
    /// Trailing NUL padding and whitespace are ignored.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryWireError::TooShort`] when the datagram is not longer than
    ///   [`MIN_RESPONSE_LEN`].
    /// - [`DiscoveryWireError::Json`] when it is not a JSON object carrying
    ///   `name`, `width` and `height`.
    pub fn parse(datagram: &[u8]) -> Result<Self, DiscoveryWireError> {
        if datagram.len() <= MIN_RESPONSE_LEN {
            return Err(DiscoveryWireError::TooShort {
                len: datagram.len(),
            });
        }
        let end = datagram
            .iter()
            .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        Ok(serde_json::from_slice(&datagram[..end])?)
    }

    /// Serialises the document to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryWireError::Json`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, DiscoveryWireError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Returns `true` if `datagram` is a discovery probe.
pub fn is_discovery_probe(datagram: &[u8]) -> bool {
    let trimmed = datagram
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(&datagram[..0], |i| &datagram[..=i]);
    trimmed == DISCOVERY_PROBE
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
