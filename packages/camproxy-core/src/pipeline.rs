//! Wires the encoder supervisor, fMP4 segmenter, fan-out hub, and
//! snapshot writer into the [`PipelineActions`] the session controller
//! drives. This is the encoder output pump described in §5.2: a single
//! worker reads the encoder's output, drives the parser, and dispatches
//! to the init cache, snapshot writer, and fan-out hub.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;

use crate::encoder::{EncoderSupervisor, EncoderTunables};
use crate::error::{ProxyError, ProxyResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::fanout::FanoutHub;
use crate::fmp4::{BoxDisposition, BoxParser, Segmenter};
use crate::ingress::{FrameIngress, SwappableSink};
use crate::session::PipelineActions;
use crate::snapshot::SnapshotWriter;
use crate::state::Config;
use crate::utils::now_millis;

/// Shared mutable pipeline state read by `/health` and the snapshot path.
pub struct PipelineShared {
    pub latest_keyframe_fragment: RwLock<Option<Bytes>>,
}

impl Default for PipelineShared {
    fn default() -> Self {
        Self {
            latest_keyframe_fragment: RwLock::new(None),
        }
    }
}

/// Concrete [`PipelineActions`] tying together the encoder, segmenter,
/// fan-out hub, and snapshot writer for one camera at a time.
pub struct Pipeline {
    encoder: Arc<EncoderSupervisor>,
    hub: Arc<FanoutHub>,
    ingress: Arc<FrameIngress>,
    video_swap: Arc<SwappableSink>,
    audio_swap: Arc<SwappableSink>,
    snapshot: Arc<SnapshotWriter>,
    emitter: Arc<dyn EventEmitter>,
    config: Arc<parking_lot::RwLock<Config>>,
    shared: Arc<PipelineShared>,
    on_exit: Box<dyn Fn(bool) + Send + Sync>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder: Arc<EncoderSupervisor>,
        hub: Arc<FanoutHub>,
        ingress: Arc<FrameIngress>,
        video_swap: Arc<SwappableSink>,
        audio_swap: Arc<SwappableSink>,
        snapshot: Arc<SnapshotWriter>,
        emitter: Arc<dyn EventEmitter>,
        config: Arc<parking_lot::RwLock<Config>>,
        shared: Arc<PipelineShared>,
        on_exit: impl Fn(bool) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            encoder,
            hub,
            ingress,
            video_swap,
            audio_swap,
            snapshot,
            emitter,
            config,
            shared,
            on_exit: Box::new(on_exit),
        })
    }

    async fn spawn_and_pump(self: &Arc<Self>, serial: &str) -> ProxyResult<()> {
        let video_meta = self
            .ingress
            .video_meta()
            .ok_or_else(|| ProxyError::EncoderFailure("no video metadata recorded".into()))?;

        let tunables = {
            let config = self.config.read();
            EncoderTunables {
                preset: config
                    .whitelisted
                    .transcoding_preset
                    .clone()
                    .unwrap_or_else(|| "veryfast".to_string()),
                crf: config.whitelisted.transcoding_crf.unwrap_or(23),
                scale: config.whitelisted.video_scale.clone(),
                threads: config.whitelisted.ffmpeg_threads.unwrap_or(2),
                short_keyframes: config.whitelisted.ffmpeg_short_keyframes.unwrap_or(false),
                audio_sample_rate: config.audio_sample_rate,
                audio_bitrate: config.audio_bitrate,
            }
        };

        let (video_sink, audio_sink, stdout) = self.encoder.spawn(video_meta.codec, &tunables).await?;
        self.video_swap.attach(video_sink);
        self.audio_swap.attach(audio_sink);
        self.hub.reset();

        let pipeline = self.clone();
        let serial = serial.to_string();
        tokio::spawn(async move {
            pipeline.pump_output(stdout, &serial).await;
        });

        Ok(())
    }

    async fn pump_output(self: Arc<Self>, mut stdout: ChildStdout, serial: &str) {
        let mut parser = BoxParser::new();
        let mut segmenter = Segmenter::new();
        let mut buf = [0u8; 65536];
        let mut marked_running = false;

        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if !marked_running {
                self.encoder.mark_running();
                self.hub.mark_transcoding(true);
                self.hub.mark_output_available(true);
                marked_running = true;
                self.emitter.emit_session(SessionEvent::EncoderStateChanged {
                    serial: serial.to_string(),
                    state: "running".to_string(),
                    timestamp: now_millis(),
                });
            }

            parser.push(&buf[..n]);
            let boxes = match parser.drain_boxes() {
                Ok(boxes) => boxes,
                Err(ProxyError::Fatal(msg)) => {
                    log::error!("fatal parse error for {serial}: {msg}");
                    break;
                }
                Err(_) => break,
            };

            for parsed in &boxes {
                let classified = segmenter.classify(parsed);
                match classified.disposition {
                    BoxDisposition::InitPending => {}
                    BoxDisposition::InitComplete => {
                        if let Some(segment) = segmenter.init_segment() {
                            self.hub.notify_init_segment(segment);
                        }
                    }
                    BoxDisposition::Media => {
                        self.hub.deliver(classified.bytes);
                    }
                }
                if let Some(fragment) = classified.keyframe_fragment {
                    if let Some(init) = segmenter.init_segment() {
                        let mut combined = Vec::with_capacity(init.len() + fragment.len());
                        combined.extend_from_slice(&init);
                        combined.extend_from_slice(&fragment);
                        *self.shared.latest_keyframe_fragment.write() = Some(Bytes::from(combined));
                    }
                }
            }
        }

        self.on_session_ended(serial).await;
    }

    async fn on_session_ended(&self, serial: &str) {
        self.video_swap.detach();
        self.audio_swap.detach();
        self.encoder.mark_unexpected_exit();
        self.hub.mark_transcoding(false);
        self.emitter.emit_session(SessionEvent::EncoderStateChanged {
            serial: serial.to_string(),
            state: "terminated".to_string(),
            timestamp: now_millis(),
        });

        let fragment = self.shared.latest_keyframe_fragment.read().clone();
        if let Some(fragment) = fragment {
            if let Err(e) = self.snapshot.write_snapshot(serial, fragment).await {
                log::warn!("snapshot write failed for {serial}: {e}");
            }
        }

        (self.on_exit)(true);
    }
}

#[async_trait::async_trait]
impl PipelineActions for Pipeline {
    async fn start_for(self: Arc<Self>, serial: &str) -> ProxyResult<()> {
        self.spawn_and_pump(serial).await
    }

    async fn stop_current(self: Arc<Self>) {
        self.video_swap.detach();
        self.audio_swap.detach();
        self.encoder.stop().await;
        self.hub.reset();
        self.ingress.clear_meta();
    }

    async fn restart_current(self: Arc<Self>, serial: &str) -> ProxyResult<()> {
        self.video_swap.detach();
        self.audio_swap.detach();
        self.encoder.stop().await;
        self.ingress.clear_meta();
        self.spawn_and_pump(serial).await
    }
}
