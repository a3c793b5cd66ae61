//! Snapshot writer (§4.6): produces a still image from the most recent
//! candidate keyframe fragment on session end.

use std::path::PathBuf;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ProxyError, ProxyResult};
use crate::events::{EventEmitter, SnapshotEvent};
use crate::state::PictureHashStore;
use crate::utils::now_millis;

/// Produces and persists a still image for a camera.
pub struct SnapshotWriter {
    binary: String,
    snapshots_dir: PathBuf,
    hashes: tokio::sync::Mutex<PictureHashStore>,
    emitter: std::sync::Arc<dyn EventEmitter>,
}

impl SnapshotWriter {
    pub fn new(
        binary: impl Into<String>,
        snapshots_dir: PathBuf,
        hashes_path: PathBuf,
        emitter: std::sync::Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            binary: binary.into(),
            snapshots_dir,
            hashes: tokio::sync::Mutex::new(PictureHashStore::load(hashes_path)),
            emitter,
        }
    }

    /// Writes a still image for `serial` from `keyframe_fragment`
    /// (`initSegment ⧺ fragment`, self-decoding). Logs and returns on
    /// any failure without retrying or writing the sidecar timestamp.
    pub async fn write_snapshot(&self, serial: &str, keyframe_fragment: Bytes) -> ProxyResult<()> {
        std::fs::create_dir_all(&self.snapshots_dir)
            .map_err(|e| ProxyError::Fatal(format!("cannot create snapshots dir: {e}")))?;
        let path = self.snapshots_dir.join(format!("{serial}.jpg"));

        let mut child = Command::new(&self.binary)
            .args(["-f", "mp4", "-i", "pipe:0", "-frames:v", "1", "-q:v", "2", "-y"])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProxyError::EncoderFailure(format!("snapshot spawn failed: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(&keyframe_fragment).await.is_err() {
                log::debug!("snapshot stdin write failed for {serial}");
            }
            let _ = stdin.shutdown().await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ProxyError::EncoderFailure(format!("snapshot wait failed: {e}")))?;

        if !status.success() {
            log::warn!("snapshot encoder exited non-zero for {serial}: {status}");
            return Ok(());
        }

        let timestamp = now_millis();
        let mut hashes = self.hashes.lock().await;
        if let Err(e) = hashes.record_success(serial, timestamp) {
            log::warn!("failed to persist snapshot sidecar for {serial}: {e}");
            return Ok(());
        }
        drop(hashes);

        self.emitter.emit_snapshot(SnapshotEvent::Saved {
            serial: serial.to_string(),
            timestamp,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    #[tokio::test]
    async fn snapshot_dir_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots_dir = dir.path().join("snapshots");
        let hashes_path = dir.path().join("picture-hashes.json");

        let writer = SnapshotWriter::new(
            "/bin/true",
            snapshots_dir.clone(),
            hashes_path,
            std::sync::Arc::new(NoopEventEmitter),
        );

        // `/bin/true` exits 0 immediately without reading stdin; the
        // snapshot dir should exist afterward even though no jpg lands.
        let _ = writer.write_snapshot("CAM1", Bytes::from_static(b"fragment")).await;
        assert!(snapshots_dir.exists());
    }
}
