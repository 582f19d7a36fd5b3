//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! in that order.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use snap_core::constants::{DEFAULT_BUFFER_MS, DEFAULT_PCM_READ_MS, DEFAULT_PORT, MAX_BUFFER_MS, MIN_BUFFER_MS};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to bind the streaming socket to.
    /// Override: `SNAP_PORT`
    pub port: u16,

    /// Source URI (`pipe://`, `file://`, or `process://`).
    /// Override: `SNAP_SOURCE`
    pub source: String,

    /// Sample format as `rate:bits:channels`, e.g. `48000:16:2`.
    pub sample_format: String,

    /// Codec name: `pcm`, `flac`, `ogg`, `opus`, or `null`.
    pub codec: String,

    /// Codec-specific options string (e.g. `BITRATE:192000,COMPLEXITY:6`).
    pub codec_options: String,

    /// Period length the source paces itself against, in ms.
    pub pcm_read_ms: u64,

    /// Default end-to-end buffer size advertised to clients, in ms.
    /// Override: `SNAP_BUFFER_MS`
    pub buffer_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            source: "pipe:///tmp/snapfifo".to_string(),
            sample_format: "48000:16:2".to_string(),
            codec: "flac".to_string(),
            codec_options: String::new(),
            pcm_read_ms: DEFAULT_PCM_READ_MS,
            buffer_ms: DEFAULT_BUFFER_MS as u32,
        }
    }
}

impl ServerConfig {
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
        config.clamp_buffer_ms();
        Ok(config)
    }

    /// Clamps `buffer_ms` into `[MIN_BUFFER_MS, MAX_BUFFER_MS]`: this is the
    /// value advertised to every client via `ServerSettings`, so an
    /// out-of-range config/env/CLI value is sanitized here rather than
    /// propagated to the whole fleet. Public because `main` must re-clamp
    /// after applying its own CLI-flag override, the highest-precedence layer.
    pub fn clamp_buffer_ms(&mut self) {
        self.buffer_ms = self.buffer_ms.clamp(MIN_BUFFER_MS as u32, MAX_BUFFER_MS as u32);
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SNAP_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("SNAP_SOURCE") {
            self.source = val;
        }

        if let Ok(val) = std::env::var("SNAP_BUFFER_MS") {
            if let Ok(buffer_ms) = val.parse() {
                self.buffer_ms = buffer_ms;
            }
        }
    }

    /// Parses `sample_format` (`rate:bits:channels`) into a [`SampleFormat`].
    pub fn parse_sample_format(&self) -> Result<snap_core::sample_format::SampleFormat> {
        let parts: Vec<&str> = self.sample_format.split(':').collect();
        anyhow::ensure!(
            parts.len() == 3,
            "sample_format must be rate:bits:channels, got {:?}",
            self.sample_format
        );
        Ok(snap_core::sample_format::SampleFormat::new(
            parts[0].parse().context("invalid rate")?,
            parts[1].parse().context("invalid bits")?,
            parts[2].parse().context("invalid channels")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_its_own_sample_format() {
        let config = ServerConfig::default();
        let format = config.parse_sample_format().unwrap();
        assert_eq!(format.rate(), 48_000);
        assert_eq!(format.bits(), 16);
        assert_eq!(format.channels(), 2);
    }

    #[test]
    fn rejects_malformed_sample_format() {
        let mut config = ServerConfig::default();
        config.sample_format = "48000:16".to_string();
        assert!(config.parse_sample_format().is_err());
    }

    #[test]
    fn clamp_buffer_ms_enforces_bounds() {
        let mut config = ServerConfig::default();

        config.buffer_ms = 10;
        config.clamp_buffer_ms();
        assert_eq!(config.buffer_ms, MIN_BUFFER_MS as u32);

        config.buffer_ms = 50_000;
        config.clamp_buffer_ms();
        assert_eq!(config.buffer_ms, MAX_BUFFER_MS as u32);

        config.buffer_ms = 2_000;
        config.clamp_buffer_ms();
        assert_eq!(config.buffer_ms, 2_000);
    }
}
