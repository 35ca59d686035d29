//! Node configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) gives a
//! working single-site node on `127.0.0.1:9000`:
//!
//! ```toml
//! listen_addr = "0.0.0.0:9000"
//! peer_id = "ws://203.0.113.7:9000"
//! max_connections = 5
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::PeerId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Mesh node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,
    /// Address other sites dial to reach us (None = ws://{bound address})
    pub peer_id: Option<PeerId>,
    /// Floor of the per-direction link limit
    pub max_connections: usize,
    /// Recent operations replayed to a peer after sync
    pub outgoing_buffer_size: usize,
    /// Upper bound on a single dial attempt
    pub connect_timeout_secs: u64,
    /// Capacity of event and per-link channels
    pub channel_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_string(),
            peer_id: None,
            max_connections: 5,
            outgoing_buffer_size: 40,
            connect_timeout_secs: 3,
            channel_capacity: 256,
        }
    }
}

impl MeshConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// The peer id to advertise once the listener is bound to `bound`.
    pub fn advertised_peer_id(&self, bound: SocketAddr) -> PeerId {
        self.peer_id
            .clone()
            .unwrap_or_else(|| format!("ws://{bound}"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.outgoing_buffer_size, 40);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MeshConfig::from_toml("max_connections = 8\npeer_id = \"ws://example:1\"").unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.peer_id.as_deref(), Some("ws://example:1"));
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(MeshConfig::from_toml("").unwrap(), MeshConfig::default());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = MeshConfig::from_toml("max_connections = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = \"0.0.0.0:7000\"").unwrap();

        let config = MeshConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
    }

    #[test]
    fn test_load_missing_file() {
        let err = MeshConfig::load("/nonexistent/skein.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_advertised_peer_id() {
        let bound: SocketAddr = "127.0.0.1:4567".parse().unwrap();
        assert_eq!(MeshConfig::default().advertised_peer_id(bound), "ws://127.0.0.1:4567");

        let pinned = MeshConfig {
            peer_id: Some("ws://public:1".into()),
            ..MeshConfig::default()
        };
        assert_eq!(pinned.advertised_peer_id(bound), "ws://public:1");
    }
}
