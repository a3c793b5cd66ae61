//! External encoder supervision (§4.2).
//!
//! Launches the external media encoder binary with the argument set
//! needed to turn driver-delivered elementary streams into fragmented
//! MP4, and supervises its lifecycle: idle → starting → running →
//! draining → terminated.

mod args;
mod fifo;

pub use args::build_args;
pub use fifo::AuxPipe;

use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::driver::VideoCodec;
use crate::error::{ProxyError, ProxyResult};
use crate::ingress::FrameSink;
use crate::protocol_constants::ENCODER_DRAIN_GRACE_MS;

/// Lifecycle state of an encoder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncoderState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Terminated = 4,
}

impl EncoderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Draining,
            _ => Self::Terminated,
        }
    }

    /// The name used in `SessionEvent::EncoderStateChanged`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

/// Tunables read from configuration that affect the encoder's invocation.
#[derive(Debug, Clone)]
pub struct EncoderTunables {
    pub preset: String,
    pub crf: u8,
    pub scale: Option<String>,
    pub threads: u8,
    pub short_keyframes: bool,
    /// Output audio sample rate in Hz (`-ar`).
    pub audio_sample_rate: u32,
    /// Output audio bitrate in bits per second (`-b:a`).
    pub audio_bitrate: u32,
}

impl Default for EncoderTunables {
    fn default() -> Self {
        Self {
            preset: "veryfast".to_string(),
            crf: 23,
            scale: None,
            threads: 2,
            short_keyframes: false,
            audio_sample_rate: crate::protocol_constants::DEFAULT_AUDIO_SAMPLE_RATE,
            audio_bitrate: crate::protocol_constants::DEFAULT_AUDIO_BITRATE,
        }
    }
}

/// Supervises one external encoder process.
///
/// Owns the process handle; no external component signals the child
/// directly (§5 shared-resource policy).
pub struct EncoderSupervisor {
    state: AtomicU8,
    child: Mutex<Option<Child>>,
    binary: String,
    aux_pipe: Mutex<Option<AuxPipe>>,
}

impl EncoderSupervisor {
    pub fn new(binary: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(EncoderState::Idle as u8),
            child: Mutex::new(None),
            binary: binary.into(),
            aux_pipe: Mutex::new(None),
        })
    }

    pub fn state(&self) -> EncoderState {
        EncoderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EncoderState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Spawns the encoder with inputs matching `video_codec`, returning a
    /// reader over its combined stdout and writers for the video-in
    /// (stdin) and audio-in (auxiliary pipe) sinks. The auxiliary pipe is
    /// created and its path passed to the encoder as an input argument
    /// before the child is spawned, so the pipe exists when the encoder
    /// opens it for reading.
    pub async fn spawn(
        self: &Arc<Self>,
        video_codec: VideoCodec,
        tunables: &EncoderTunables,
    ) -> ProxyResult<(Box<dyn FrameSink>, Box<dyn FrameSink>, tokio::process::ChildStdout)> {
        self.set_state(EncoderState::Starting);

        let aux_pipe = AuxPipe::create()
            .map_err(|e| ProxyError::EncoderFailure(format!("failed to create auxiliary pipe: {e}")))?;
        let args = build_args(video_codec, tunables, aux_pipe.path());

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.set_state(EncoderState::Terminated);
                ProxyError::EncoderFailure(format!("failed to spawn encoder: {e}"))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ProxyError::EncoderFailure("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ProxyError::EncoderFailure("no stdout".into()))?;
        let stderr = child.stderr.take();

        if let Some(mut stderr) = stderr {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&buf[..n]);
                            log::debug!("[encoder] {}", text.trim_end());
                        }
                    }
                }
            });
        }

        // Opening the write end blocks until the encoder opens its read
        // end of the FIFO; the child is already spawned by this point.
        let aux_writer = aux_pipe
            .open_writer()
            .await
            .map_err(|e| ProxyError::EncoderFailure(format!("failed to open auxiliary pipe: {e}")))?;

        *self.child.lock().await = Some(child);
        *self.aux_pipe.lock().await = Some(aux_pipe);

        Ok((
            Box::new(StdinSink::new(stdin)),
            Box::new(FileSink::new(aux_writer)),
            stdout,
        ))
    }

    /// Marks the encoder running once the first output byte is observed.
    pub fn mark_running(&self) {
        self.set_state(EncoderState::Running);
    }

    /// Requests a graceful stop: closes the input sinks, waits a bounded
    /// time, then force-terminates.
    pub async fn stop(&self) {
        self.set_state(EncoderState::Draining);
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.shutdown().await;
            }
            let wait = tokio::time::timeout(Duration::from_millis(ENCODER_DRAIN_GRACE_MS), child.wait()).await;
            if wait.is_err() {
                let _ = child.start_kill();
            }
        }
        *guard = None;
        self.aux_pipe.lock().await.take();
        self.set_state(EncoderState::Terminated);
    }

    /// Called by the output pump when the encoder process exits
    /// unexpectedly from `running`.
    pub fn mark_unexpected_exit(&self) {
        self.set_state(EncoderState::Terminated);
    }
}

struct StdinSink {
    inner: Mutex<Option<tokio::process::ChildStdin>>,
    handle: tokio::runtime::Handle,
}

impl StdinSink {
    fn new(stdin: tokio::process::ChildStdin) -> Self {
        Self {
            inner: Mutex::new(Some(stdin)),
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl FrameSink for StdinSink {
    fn write(&self, bytes: &[u8]) -> bool {
        let owned = bytes.to_vec();
        let inner = self.inner.try_lock();
        let Ok(mut inner) = inner else {
            return false;
        };
        let Some(stdin) = inner.as_mut() else {
            return false;
        };
        match self.handle.block_on(stdin.write_all(&owned)) {
            Ok(()) => true,
            Err(_) => {
                *inner = None;
                false
            }
        }
    }
}

/// [`FrameSink`] over the auxiliary pipe's write end, for audio.
struct FileSink {
    inner: Mutex<Option<tokio::fs::File>>,
    handle: tokio::runtime::Handle,
}

impl FileSink {
    fn new(file: tokio::fs::File) -> Self {
        Self {
            inner: Mutex::new(Some(file)),
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl FrameSink for FileSink {
    fn write(&self, bytes: &[u8]) -> bool {
        let owned = bytes.to_vec();
        let inner = self.inner.try_lock();
        let Ok(mut inner) = inner else {
            return false;
        };
        let Some(file) = inner.as_mut() else {
            return false;
        };
        match self.handle.block_on(file.write_all(&owned)) {
            Ok(()) => true,
            Err(_) => {
                *inner = None;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            EncoderState::Idle,
            EncoderState::Starting,
            EncoderState::Running,
            EncoderState::Draining,
            EncoderState::Terminated,
        ] {
            assert_eq!(EncoderState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn state_names_match_event_vocabulary() {
        assert_eq!(EncoderState::Idle.as_str(), "idle");
        assert_eq!(EncoderState::Running.as_str(), "running");
        assert_eq!(EncoderState::Terminated.as_str(), "terminated");
    }

    #[tokio::test]
    async fn new_supervisor_starts_idle() {
        let supervisor = EncoderSupervisor::new("ffmpeg");
        assert_eq!(supervisor.state(), EncoderState::Idle);
    }
}
