//! Plugin configuration
//!
//! The host hands the plugin a JSON object:
//!
//! ```json
//! {
//!   "address": "127.0.0.1",
//!   "port": 9123,
//!   "streams": [
//!     { "TGID": 100, "shortName": "SYS1" },
//!     { "TGID": 0 }
//!   ]
//! }
//! ```
//!
//! `address`, `port` and a non-empty `streams` list are required. A stream
//! without `shortName` matches every system, a `TGID` of zero matches every
//! talkgroup. Streams may override the destination with their own
//! `address` and `port`.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use crate::error::ConfigError;

/// Validated plugin configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Default destination address for all streams
    pub address: Ipv4Addr,
    /// Default destination port for all streams
    pub port: u16,
    /// Subscriptions in configuration order
    pub streams: Vec<StreamConfig>,
}

/// One configured subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Talkgroup to stream, 0 for all
    pub talkgroup_id: u64,
    /// System short name, empty for all
    pub short_name: String,
    /// Per-stream address override
    pub address: Option<Ipv4Addr>,
    /// Per-stream port override
    pub port: Option<u16>,
}

impl StreamConfig {
    /// Destination for this stream, falling back to the plugin-level endpoint
    pub fn destination(&self, default_address: Ipv4Addr, default_port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            self.address.unwrap_or(default_address),
            self.port.unwrap_or(default_port),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    address: Option<String>,
    port: Option<u16>,
    streams: Option<Vec<RawStream>>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    #[serde(rename = "TGID")]
    tgid: Option<u64>,
    #[serde(rename = "shortName", default)]
    short_name: String,
    address: Option<String>,
    port: Option<u16>,
}

impl PluginConfig {
    /// Parse the configuration object handed over by the host
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let raw = RawConfig::deserialize(value)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::validate(raw)
    }

    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::validate(raw)
    }

    /// Parse a TOML document with the same schema
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::validate(raw)
    }

    /// Load from a `.json` or `.toml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// Default destination shared by streams without overrides
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let address = parse_ipv4(&raw.address.ok_or(ConfigError::MissingField("address"))?)?;
        let port = raw.port.ok_or(ConfigError::MissingField("port"))?;
        let raw_streams = raw.streams.ok_or(ConfigError::NoStreams)?;
        if raw_streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        let streams = raw_streams
            .into_iter()
            .enumerate()
            .map(|(index, stream)| {
                Ok(StreamConfig {
                    talkgroup_id: stream
                        .tgid
                        .ok_or(ConfigError::MissingTalkgroup { index })?,
                    short_name: stream.short_name,
                    address: stream.address.as_deref().map(parse_ipv4).transpose()?,
                    port: stream.port,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            address,
            port,
            streams,
        })
    }
}

fn parse_ipv4(text: &str) -> Result<Ipv4Addr, ConfigError> {
    text.parse()
        .map_err(|_| ConfigError::InvalidAddress(text.to_string()))
}
