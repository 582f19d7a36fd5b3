//! Client configuration.
//!
//! Supports loading from YAML files with environment variable overrides, in
//! that order, following `apps/server`'s `ServerConfig` layering.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use snap_core::constants::{DEFAULT_BUFFER_MS, DEFAULT_PORT};

/// Client configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server hostname or address to connect to.
    /// Override: `SNAP_HOST`
    pub host: String,

    /// Server TCP port.
    /// Override: `SNAP_PORT`
    pub port: u16,

    /// End-to-end buffer size requested of the server, in ms. The server's
    /// `ServerSettings` reply is authoritative; this is only the value
    /// offered before one is received.
    /// Override: `SNAP_BUFFER_MS`
    pub buffer_ms: u32,

    /// Fixed offset applied on top of the negotiated buffer, positive or
    /// negative, to compensate for a consistently early/late sink (e.g. a
    /// Bluetooth speaker's own internal latency).
    pub latency_offset_ms: i64,

    /// Output device name; `None` selects the host's default device.
    pub sink: Option<String>,

    /// Stable client identifier sent as the Hello message's `mac` field.
    /// `None` derives one from the local hostname.
    pub client_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            buffer_ms: DEFAULT_BUFFER_MS as u32,
            latency_offset_ms: 0,
            sink: None,
            client_id: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SNAP_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("SNAP_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("SNAP_BUFFER_MS") {
            if let Ok(buffer_ms) = val.parse() {
                self.buffer_ms = buffer_ms;
            }
        }
    }

    /// The stable id sent in the Hello handshake: `client_id` if set,
    /// otherwise one derived from the local hostname.
    #[must_use]
    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(derive_client_id)
    }
}

/// Derives a stable pseudo-MAC from the local hostname so the same machine
/// presents the same identity across reconnects, without depending on a
/// network-interface-enumeration crate this client otherwise has no use for.
fn derive_client_id() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());

    let mut hasher = DefaultHasher::new();
    host.hash(&mut hasher);
    let digest = hasher.finish().to_be_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_localhost() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn client_id_is_stable_across_calls() {
        let config = ClientConfig::default();
        assert_eq!(config.client_id(), config.client_id());
    }

    #[test]
    fn explicit_client_id_overrides_derivation() {
        let mut config = ClientConfig::default();
        config.client_id = Some("11:22:33:44:55:66".to_string());
        assert_eq!(config.client_id(), "11:22:33:44:55:66");
    }
}
