//! Core application state types.
//!
//! Provides the runtime [`Config`], its durable whitelisted subset
//! [`WhitelistedConfig`] (read/written via `GET`/`POST /config`), and
//! atomic JSON persistence for `data/config.json`.

use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProxyError;
use crate::utils::write_atomic;

/// Process-wide lock serializing writes to `data/config.json`.
///
/// Mirrors the read-copy-update policy in §5: writers replace the record
/// under a lock; readers snapshot a clone.
static CONFIG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn config_write_lock() -> &'static Mutex<()> {
    CONFIG_WRITE_LOCK.get_or_init(|| Mutex::new(()))
}

/// The whitelisted configuration keys exposed through `GET`/`POST /config`.
///
/// Unknown keys in a `POST /config` body are rejected with `400
/// {allowedFields}`; every field here corresponds 1:1 to a key named in
/// the external-interfaces whitelist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WhitelistedConfig {
    /// Cloud account username.
    pub username: Option<String>,
    /// Cloud account password.
    pub password: Option<String>,
    /// Cloud account country code.
    pub country: Option<String>,
    /// Cloud account language code.
    pub language: Option<String>,
    /// Encoder speed preset (e.g. `veryfast`, `medium`).
    #[serde(rename = "TRANSCODING_PRESET")]
    pub transcoding_preset: Option<String>,
    /// Encoder constant-rate-factor quality value.
    #[serde(rename = "TRANSCODING_CRF")]
    pub transcoding_crf: Option<u8>,
    /// Optional output scale filter (e.g. `1280:-2`).
    #[serde(rename = "VIDEO_SCALE")]
    pub video_scale: Option<String>,
    /// Encoder worker-thread count.
    #[serde(rename = "FFMPEG_THREADS")]
    pub ffmpeg_threads: Option<u8>,
    /// Short (15-frame) vs standard (30-frame) keyframe interval.
    #[serde(rename = "FFMPEG_SHORT_KEYFRAMES")]
    pub ffmpeg_short_keyframes: Option<bool>,
    /// Log verbosity override.
    #[serde(rename = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl WhitelistedConfig {
    /// All field names accepted by `POST /config`, in declaration order.
    pub const ALLOWED_FIELDS: &'static [&'static str] = &[
        "username",
        "password",
        "country",
        "language",
        "TRANSCODING_PRESET",
        "TRANSCODING_CRF",
        "VIDEO_SCALE",
        "FFMPEG_THREADS",
        "FFMPEG_SHORT_KEYFRAMES",
        "LOG_LEVEL",
    ];

    /// Whether changing `field` requires tearing down and re-creating the encoder.
    pub fn is_transcoding_field(field: &str) -> bool {
        matches!(
            field,
            "TRANSCODING_PRESET" | "TRANSCODING_CRF" | "VIDEO_SCALE" | "FFMPEG_THREADS" | "FFMPEG_SHORT_KEYFRAMES"
        )
    }

    /// Whether changing `field` requires disconnecting and reconnecting the driver.
    pub fn is_driver_field(field: &str) -> bool {
        matches!(field, "username" | "password" | "country" | "language")
    }

    /// Merges a JSON patch into `self`, rejecting unknown keys.
    ///
    /// Returns the list of field names whose value actually changed.
    pub fn merge(&mut self, patch: &Value) -> Result<Vec<String>, ProxyError> {
        let object = patch
            .as_object()
            .ok_or_else(|| ProxyError::Validation("config body must be a JSON object".into()))?;

        for key in object.keys() {
            if !Self::ALLOWED_FIELDS.contains(&key.as_str()) {
                return Err(ProxyError::Validation(format!("unknown config key: {key}")));
            }
        }

        let mut patched: WhitelistedConfig = serde_json::from_value(
            serde_json::to_value(&*self).expect("WhitelistedConfig always serializes"),
        )
        .expect("round trip of own fields always deserializes");

        // Apply only the keys present in the patch so absent keys keep their
        // prior value rather than being reset by `WhitelistedConfig::default()`.
        let merged_value = merge_json(serde_json::to_value(&patched).unwrap(), patch.clone());
        patched = serde_json::from_value(merged_value)
            .map_err(|e| ProxyError::Validation(format!("invalid config value: {e}")))?;

        let mut updated = Vec::new();
        for field in Self::ALLOWED_FIELDS {
            if field_value(self, field) != field_value(&patched, field) {
                updated.push((*field).to_string());
            }
        }

        *self = patched;
        Ok(updated)
    }
}

fn merge_json(mut base: Value, patch: Value) -> Value {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

fn field_value(config: &WhitelistedConfig, field: &str) -> Value {
    let as_value = serde_json::to_value(config).expect("serializes");
    as_value.get(field).cloned().unwrap_or(Value::Null)
}

/// Full runtime configuration: non-whitelisted deployment settings plus
/// the whitelisted, HTTP-mutable subset.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub bind_port: u16,
    /// Address advertised in stream/WebSocket URLs.
    pub advertise_host: String,
    /// Directory for persisted state (`config.json`, `snapshots/`, `picture-hashes.json`).
    pub data_dir: PathBuf,
    /// Path or name of the external transcoding binary. Not HTTP-mutable;
    /// read from the YAML config file or environment only.
    pub encoder_binary: String,
    /// Path or name of the external binary used to extract snapshot stills.
    /// Usually the same binary as `encoder_binary`.
    pub snapshot_binary: String,
    /// Output audio sample rate in Hz. Open in spec.md; not part of the
    /// whitelisted `POST /config` surface.
    pub audio_sample_rate: u32,
    /// Output audio bitrate in bits per second.
    pub audio_bitrate: u32,
    /// Whitelisted, persisted, HTTP-mutable configuration.
    pub whitelisted: WhitelistedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            advertise_host: "0.0.0.0".to_string(),
            data_dir: PathBuf::from("data"),
            encoder_binary: "ffmpeg".to_string(),
            snapshot_binary: "ffmpeg".to_string(),
            audio_sample_rate: crate::protocol_constants::DEFAULT_AUDIO_SAMPLE_RATE,
            audio_bitrate: crate::protocol_constants::DEFAULT_AUDIO_BITRATE,
            whitelisted: WhitelistedConfig::default(),
        }
    }
}

impl Config {
    /// Path to the durable config record.
    pub fn config_json_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Path to the snapshot for `serial`.
    pub fn snapshot_path(&self, serial: &str) -> PathBuf {
        self.data_dir.join("snapshots").join(format!("{serial}.jpg"))
    }

    /// Path to the picture-hash sidecar record.
    pub fn picture_hashes_path(&self) -> PathBuf {
        self.data_dir.join("picture-hashes.json")
    }

    /// Loads the whitelisted config from `data/config.json` if present.
    pub fn load_whitelisted(&mut self) -> std::io::Result<()> {
        let path = self.config_json_path();
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        self.whitelisted = serde_json::from_str(&content).unwrap_or_default();
        Ok(())
    }

    /// Persists the whitelisted config to `data/config.json` atomically.
    pub fn save_whitelisted(&self) -> std::io::Result<()> {
        let _guard = config_write_lock().lock();
        let body = serde_json::to_vec_pretty(&self.whitelisted)?;
        write_atomic(&self.config_json_path(), &body)
    }
}

/// Per-camera snapshot currency record persisted to `data/picture-hashes.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PictureHashEntry {
    /// Content hash of the most recently written snapshot, if known.
    pub hash: Option<String>,
    /// When the snapshot encoder invocation completed, in epoch millis.
    pub datetime: u64,
    /// When the snapshot file itself was last successfully updated.
    #[serde(rename = "snapshotDatetime")]
    pub snapshot_datetime: u64,
}

/// Durable sidecar record mapping camera serial to [`PictureHashEntry`].
#[derive(Debug, Clone, Default)]
pub struct PictureHashStore {
    path: PathBuf,
    entries: std::collections::HashMap<String, PictureHashEntry>,
}

impl PictureHashStore {
    /// Loads the store from `path`, starting empty if the file doesn't exist.
    pub fn load(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    /// Records a successful snapshot write for `serial` at `timestamp`.
    pub fn record_success(&mut self, serial: &str, timestamp: u64) -> std::io::Result<()> {
        let entry = self.entries.entry(serial.to_string()).or_default();
        entry.datetime = timestamp;
        entry.snapshot_datetime = timestamp;
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let _guard = config_write_lock().lock();
        let body = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &body)
    }

    /// Returns the entry for `serial`, if any.
    pub fn get(&self, serial: &str) -> Option<&PictureHashEntry> {
        self.entries.get(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn path_exists(path: &Path) -> bool {
        path.exists()
    }

    #[test]
    fn merge_rejects_unknown_key() {
        let mut cfg = WhitelistedConfig::default();
        let patch = serde_json::json!({"nope": 1});
        assert!(cfg.merge(&patch).is_err());
    }

    #[test]
    fn merge_reports_only_changed_fields() {
        let mut cfg = WhitelistedConfig::default();
        let patch = serde_json::json!({"TRANSCODING_CRF": 23});
        let updated = cfg.merge(&patch).unwrap();
        assert_eq!(updated, vec!["TRANSCODING_CRF".to_string()]);
        assert_eq!(cfg.transcoding_crf, Some(23));

        // Applying the same body again changes nothing.
        let updated_again = cfg.merge(&patch).unwrap();
        assert!(updated_again.is_empty());
    }

    #[test]
    fn transcoding_vs_driver_field_classification() {
        assert!(WhitelistedConfig::is_transcoding_field("TRANSCODING_CRF"));
        assert!(!WhitelistedConfig::is_transcoding_field("username"));
        assert!(WhitelistedConfig::is_driver_field("username"));
        assert!(!WhitelistedConfig::is_driver_field("TRANSCODING_CRF"));
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.whitelisted.transcoding_crf = Some(21);
        config.save_whitelisted().unwrap();

        let mut reloaded = Config {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        reloaded.load_whitelisted().unwrap();
        assert_eq!(reloaded.whitelisted.transcoding_crf, Some(21));
        assert!(path_exists(&reloaded.config_json_path()));
    }

    #[test]
    fn picture_hash_store_records_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picture-hashes.json");
        let mut store = PictureHashStore::load(path.clone());
        store.record_success("CAM1", 1234).unwrap();
        let reloaded = PictureHashStore::load(path);
        assert_eq!(reloaded.get("CAM1").unwrap().datetime, 1234);
    }
}
