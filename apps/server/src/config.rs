//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Only the non-whitelisted, deployment-level settings live here; the
//! HTTP-mutable subset is [`camproxy_core::WhitelistedConfig`], loaded
//! separately from `data/config.json` at startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `CAMPROXY_BIND_PORT`
    pub bind_port: u16,

    /// Host advertised in stream/WebSocket URLs.
    /// Override: `CAMPROXY_ADVERTISE_HOST`
    pub advertise_host: String,

    /// Directory for persisted state (`config.json`, `snapshots/`, `picture-hashes.json`).
    /// Override: `CAMPROXY_DATA_DIR`
    pub data_dir: PathBuf,

    /// Path or name of the external transcoding binary.
    /// Override: `CAMPROXY_ENCODER_BINARY`
    pub encoder_binary: String,

    /// Path or name of the external binary used to extract snapshot stills.
    /// Override: `CAMPROXY_SNAPSHOT_BINARY`
    pub snapshot_binary: String,

    /// Output audio sample rate in Hz.
    /// Override: `CAMPROXY_AUDIO_SAMPLE_RATE`
    pub audio_sample_rate: u32,

    /// Output audio bitrate in bits per second.
    /// Override: `CAMPROXY_AUDIO_BITRATE`
    pub audio_bitrate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = camproxy_core::Config::default();
        Self {
            bind_port: defaults.bind_port,
            advertise_host: defaults.advertise_host,
            data_dir: defaults.data_dir,
            encoder_binary: defaults.encoder_binary,
            snapshot_binary: defaults.snapshot_binary,
            audio_sample_rate: defaults.audio_sample_rate,
            audio_bitrate: defaults.audio_bitrate,
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
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAMPROXY_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("CAMPROXY_ADVERTISE_HOST") {
            self.advertise_host = val;
        }

        if let Ok(val) = std::env::var("CAMPROXY_ENCODER_BINARY") {
            self.encoder_binary = val;
        }

        if let Ok(val) = std::env::var("CAMPROXY_SNAPSHOT_BINARY") {
            self.snapshot_binary = val;
        }

        if let Ok(val) = std::env::var("CAMPROXY_AUDIO_SAMPLE_RATE") {
            if let Ok(rate) = val.parse() {
                self.audio_sample_rate = rate;
            }
        }

        if let Ok(val) = std::env::var("CAMPROXY_AUDIO_BITRATE") {
            if let Ok(bitrate) = val.parse() {
                self.audio_bitrate = bitrate;
            }
        }

        // Note: CAMPROXY_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to camproxy-core's [`camproxy_core::Config`], loading the
    /// whitelisted subset from `data_dir/config.json` if present.
    pub fn to_core_config(&self) -> camproxy_core::Config {
        let mut config = camproxy_core::Config {
            bind_port: self.bind_port,
            advertise_host: self.advertise_host.clone(),
            data_dir: self.data_dir.clone(),
            encoder_binary: self.encoder_binary.clone(),
            snapshot_binary: self.snapshot_binary.clone(),
            audio_sample_rate: self.audio_sample_rate,
            audio_bitrate: self.audio_bitrate,
            ..Default::default()
        };
        if let Err(e) = config.load_whitelisted() {
            log::warn!("failed to load persisted config: {e}");
        }
        config
    }
}
