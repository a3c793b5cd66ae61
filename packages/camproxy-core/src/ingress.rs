//! Frame ingress: routes driver-delivered frames to the encoder's sinks.
//!
//! Implements §4.1: video bytes go to the encoder's primary input, audio
//! bytes to its auxiliary input, and resolution changes are observed but
//! never acted on directly — the session controller decides what to do
//! about them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{AudioMeta, VideoMeta};

/// A byte sink a frame can be written to.
///
/// The encoder supervisor implements this for its stdin (video) and its
/// FIFO-backed auxiliary input (audio).
pub trait FrameSink: Send + Sync {
    /// Writes `bytes` to the sink. Returns `false` on a write-after-close
    /// or any other I/O error; ingress never propagates such failures to
    /// the driver.
    fn write(&self, bytes: &[u8]) -> bool;
}

/// Observes video metadata and resolution changes as ingress sees them.
///
/// The session controller implements this to learn about resolution
/// changes (§4.5 `onResolutionChange`) without frame ingress itself
/// deciding to restart anything.
pub trait ResolutionObserver: Send + Sync {
    /// Called when video metadata is first recorded, or changes.
    fn on_video_meta(&self, meta: VideoMeta, changed: bool);
    /// Called when no encoder session is running and one should start.
    fn ensure_encoder_started(&self);
}

/// A [`FrameSink`] whose target can be swapped out at runtime.
///
/// `FrameIngress` is constructed once at startup, before any encoder
/// session exists; the encoder's stdin/FIFO sinks only exist once a
/// session is running. This indirection lets the pipeline attach and
/// detach the live sink around each encoder session without requiring
/// ingress itself to know about sessions.
pub struct SwappableSink {
    inner: Mutex<Option<Box<dyn FrameSink>>>,
}

impl SwappableSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(None) })
    }

    /// Attaches `sink` as the current write target.
    pub fn attach(&self, sink: Box<dyn FrameSink>) {
        *self.inner.lock() = Some(sink);
    }

    /// Detaches the current sink; subsequent writes are dropped.
    pub fn detach(&self) {
        *self.inner.lock() = None;
    }
}

impl FrameSink for Arc<SwappableSink> {
    fn write(&self, bytes: &[u8]) -> bool {
        match self.inner.lock().as_deref() {
            Some(sink) => sink.write(bytes),
            None => false,
        }
    }
}

struct IngressState {
    video_meta: Option<VideoMeta>,
    audio_meta: Option<AudioMeta>,
}

/// Routes frames from the driver into the encoder's sinks.
pub struct FrameIngress {
    state: Mutex<IngressState>,
    video_sink: Box<dyn FrameSink>,
    audio_sink: Box<dyn FrameSink>,
    observer: Box<dyn ResolutionObserver>,
}

impl FrameIngress {
    pub fn new(
        video_sink: Box<dyn FrameSink>,
        audio_sink: Box<dyn FrameSink>,
        observer: Box<dyn ResolutionObserver>,
    ) -> Self {
        Self {
            state: Mutex::new(IngressState {
                video_meta: None,
                audio_meta: None,
            }),
            video_sink,
            audio_sink,
            observer,
        }
    }

    /// Handles a video frame delivery.
    pub fn on_video_frame(&self, bytes: &[u8], meta: VideoMeta) {
        let (changed, is_first) = {
            let mut state = self.state.lock();
            match &state.video_meta {
                None => {
                    state.video_meta = Some(meta.clone());
                    (false, true)
                }
                Some(existing) if existing.width != meta.width || existing.height != meta.height => {
                    log::warn!(
                        "video resolution changed: {}x{} -> {}x{}",
                        existing.width,
                        existing.height,
                        meta.width,
                        meta.height
                    );
                    state.video_meta = Some(meta.clone());
                    (true, false)
                }
                Some(_) => (false, false),
            }
        };

        if is_first {
            log::info!("video metadata recorded: {}x{} {:?}", meta.width, meta.height, meta.codec);
        }
        self.observer.on_video_meta(meta, changed);
        self.observer.ensure_encoder_started();

        if !self.video_sink.write(bytes) {
            log::debug!("dropped video frame: sink closed");
        }
    }

    /// Handles an audio frame delivery. Audio never gates encoder startup.
    pub fn on_audio_frame(&self, bytes: &[u8], meta: AudioMeta) {
        self.state.lock().audio_meta = Some(meta);
        if !self.audio_sink.write(bytes) {
            log::debug!("dropped audio frame: sink closed");
        }
    }

    /// Returns the currently recorded video metadata, if any.
    pub fn video_meta(&self) -> Option<VideoMeta> {
        self.state.lock().video_meta.clone()
    }

    /// Returns the currently recorded audio metadata, if any.
    pub fn audio_meta(&self) -> Option<AudioMeta> {
        self.state.lock().audio_meta.clone()
    }

    /// Clears recorded metadata, called when the session controller tears
    /// down the encoder for a resolution change.
    pub fn clear_meta(&self) {
        let mut state = self.state.lock();
        state.video_meta = None;
        state.audio_meta = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::VideoCodec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingSink {
        writes: Mutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }
        }
    }

    impl FrameSink for RecordingSink {
        fn write(&self, bytes: &[u8]) -> bool {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            self.writes.lock().push(bytes.to_vec());
            true
        }
    }

    struct CountingObserver {
        meta_calls: AtomicUsize,
        ensure_calls: AtomicUsize,
        last_changed: AtomicBool,
    }

    impl CountingObserver {
        fn new() -> Self {
            Self {
                meta_calls: AtomicUsize::new(0),
                ensure_calls: AtomicUsize::new(0),
                last_changed: AtomicBool::new(false),
            }
        }
    }

    impl ResolutionObserver for CountingObserver {
        fn on_video_meta(&self, _meta: VideoMeta, changed: bool) {
            self.meta_calls.fetch_add(1, Ordering::SeqCst);
            self.last_changed.store(changed, Ordering::SeqCst);
        }

        fn ensure_encoder_started(&self) {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn video_meta(w: u32, h: u32) -> VideoMeta {
        VideoMeta {
            width: w,
            height: h,
            codec: VideoCodec::H264,
        }
    }

    #[test]
    fn first_video_frame_records_metadata_without_change_flag() {
        let video = Arc::new(RecordingSink::new());
        let audio = Arc::new(RecordingSink::new());
        let observer = Arc::new(CountingObserver::new());
        let ingress = FrameIngress::new(
            Box::new(ArcSink(video.clone())),
            Box::new(ArcSink(audio)),
            Box::new(ArcObserver(observer.clone())),
        );

        ingress.on_video_frame(b"frame1", video_meta(1920, 1080));

        assert_eq!(ingress.video_meta(), Some(video_meta(1920, 1080)));
        assert!(!observer.last_changed.load(Ordering::SeqCst));
        assert_eq!(observer.ensure_calls.load(Ordering::SeqCst), 1);
        assert_eq!(video.writes.lock().len(), 1);
    }

    #[test]
    fn resolution_change_is_observed_not_acted_on_directly() {
        let video = Arc::new(RecordingSink::new());
        let audio = Arc::new(RecordingSink::new());
        let observer = Arc::new(CountingObserver::new());
        let ingress = FrameIngress::new(
            Box::new(ArcSink(video)),
            Box::new(ArcSink(audio)),
            Box::new(ArcObserver(observer.clone())),
        );

        ingress.on_video_frame(b"frame1", video_meta(1920, 1080));
        ingress.on_video_frame(b"frame2", video_meta(1280, 720));

        assert_eq!(ingress.video_meta(), Some(video_meta(1280, 720)));
        assert!(observer.last_changed.load(Ordering::SeqCst));
    }

    #[test]
    fn write_after_close_is_dropped_silently() {
        let video = Arc::new(RecordingSink::new());
        video.closed.store(true, Ordering::SeqCst);
        let audio = Arc::new(RecordingSink::new());
        let observer = Arc::new(CountingObserver::new());
        let ingress = FrameIngress::new(
            Box::new(ArcSink(video.clone())),
            Box::new(ArcSink(audio)),
            Box::new(ArcObserver(observer)),
        );

        ingress.on_video_frame(b"frame1", video_meta(640, 480));
        assert!(video.writes.lock().is_empty());
    }

    struct ArcSink(Arc<RecordingSink>);
    impl FrameSink for ArcSink {
        fn write(&self, bytes: &[u8]) -> bool {
            self.0.write(bytes)
        }
    }

    struct ArcObserver(Arc<CountingObserver>);
    impl ResolutionObserver for ArcObserver {
        fn on_video_meta(&self, meta: VideoMeta, changed: bool) {
            self.0.on_video_meta(meta, changed)
        }
        fn ensure_encoder_started(&self) {
            self.0.ensure_encoder_started()
        }
    }
}
