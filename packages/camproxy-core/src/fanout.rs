//! Fan-out hub: single-producer, many-consumer delivery of the live
//! fMP4 stream with per-subscriber init gating (§4.4).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{ProxyError, ProxyResult};
use crate::protocol_constants::SUBSCRIBER_INIT_TIMEOUT_SECS;

/// A sink a subscriber's bytes are written to — typically the body
/// writer half of a chunked HTTP response.
pub trait SubscriberSink: Send + Sync {
    /// Writes a box to the subscriber. Returns `false` on any error.
    fn write(&self, bytes: &Bytes) -> bool;
}

struct Subscriber {
    sink: Arc<dyn SubscriberSink>,
    active: AtomicBool,
    init_received: AtomicBool,
}

/// Delivers the live fMP4 stream to all attached subscribers.
pub struct FanoutHub {
    subscribers: DashMap<u64, Arc<Subscriber>>,
    next_id: AtomicU64,
    is_transcoding: AtomicBool,
    output_available: AtomicBool,
    init_segment: parking_lot::RwLock<Option<Bytes>>,
    init_ready: Arc<Notify>,
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            is_transcoding: AtomicBool::new(false),
            output_available: AtomicBool::new(false),
            init_segment: parking_lot::RwLock::new(None),
            init_ready: Arc::new(Notify::new()),
        }
    }

    /// Marks the hub as actively transcoding, with output available to
    /// attach listeners to (called once the encoder's first output
    /// bytes are seen).
    pub fn mark_transcoding(&self, transcoding: bool) {
        self.is_transcoding.store(transcoding, Ordering::SeqCst);
    }

    pub fn mark_output_available(&self, available: bool) {
        self.output_available.store(available, Ordering::SeqCst);
    }

    pub fn is_transcoding(&self) -> bool {
        self.is_transcoding.load(Ordering::SeqCst)
    }

    /// Whether the init segment (`ftyp+moov`) has been cached for the
    /// current session, independently of any keyframe fragment.
    pub fn has_init_segment(&self) -> bool {
        self.init_segment.read().is_some()
    }

    /// Caches the init segment and notifies any subscriber waiting on it.
    /// Called once per session, when the parser completes init capture.
    pub fn notify_init_segment(&self, segment: Bytes) {
        *self.init_segment.write() = Some(segment);
        self.init_ready.notify_waiters();
    }

    /// Clears cached init state, called on session teardown.
    pub fn reset(&self) {
        *self.init_segment.write() = None;
        self.mark_transcoding(false);
        self.mark_output_available(false);
    }

    /// Registers a subscriber and drives it through the join protocol:
    /// polls for `isTranscoding ∧ outputAvailable`, writes the cached
    /// init segment if present, or waits for the one-shot notification.
    /// Times out after 10s with `ProxyError::InitTimeout`.
    pub async fn join(&self, sink: Arc<dyn SubscriberSink>) -> ProxyResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Arc::new(Subscriber {
            sink: sink.clone(),
            active: AtomicBool::new(true),
            init_received: AtomicBool::new(false),
        });
        self.subscribers.insert(id, subscriber.clone());

        let wait = async {
            loop {
                if self.is_transcoding() && self.output_available.load(Ordering::SeqCst) {
                    if let Some(segment) = self.init_segment.read().clone() {
                        sink.write(&segment);
                        subscriber.init_received.store(true, Ordering::SeqCst);
                        return;
                    }
                    self.init_ready.notified().await;
                    if let Some(segment) = self.init_segment.read().clone() {
                        sink.write(&segment);
                        subscriber.init_received.store(true, Ordering::SeqCst);
                    }
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        match tokio::time::timeout(Duration::from_secs(SUBSCRIBER_INIT_TIMEOUT_SECS), wait).await {
            Ok(()) => Ok(id),
            Err(_) => {
                self.detach(id);
                Err(ProxyError::InitTimeout)
            }
        }
    }

    /// Delivers `bytes` to every active, init-received subscriber.
    pub fn deliver(&self, bytes: Bytes) {
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.active.load(Ordering::SeqCst) || !subscriber.init_received.load(Ordering::SeqCst) {
                continue;
            }
            if !subscriber.sink.write(&bytes) {
                subscriber.active.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Removes a subscriber from the hub's set.
    pub fn detach(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::sync::Mutex;

    struct RecordingSink {
        received: Mutex<Vec<Bytes>>,
        closed: StdAtomicBool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                closed: StdAtomicBool::new(false),
            })
        }
    }

    impl SubscriberSink for RecordingSink {
        fn write(&self, bytes: &Bytes) -> bool {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            self.received.lock().unwrap().push(bytes.clone());
            true
        }
    }

    #[tokio::test]
    async fn join_writes_cached_init_segment_immediately() {
        let hub = FanoutHub::new();
        hub.notify_init_segment(Bytes::from_static(b"ftypmoov"));
        hub.mark_transcoding(true);
        hub.mark_output_available(true);

        let sink = RecordingSink::new();
        hub.join(sink.clone()).await.unwrap();

        assert_eq!(sink.received.lock().unwrap().as_slice(), [Bytes::from_static(b"ftypmoov")]);
    }

    #[tokio::test]
    async fn join_waits_for_init_ready_notification() {
        let hub = Arc::new(FanoutHub::new());
        hub.mark_transcoding(true);
        hub.mark_output_available(true);

        let hub2 = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            hub2.notify_init_segment(Bytes::from_static(b"late-init"));
        });

        let sink = RecordingSink::new();
        hub.join(sink.clone()).await.unwrap();
        assert_eq!(sink.received.lock().unwrap().as_slice(), [Bytes::from_static(b"late-init")]);
    }

    #[tokio::test]
    async fn deliver_skips_subscribers_before_init_received() {
        let hub = FanoutHub::new();
        let sink = RecordingSink::new();
        let id = hub.subscribers.len() as u64;
        hub.subscribers.insert(
            id,
            Arc::new(Subscriber {
                sink: sink.clone(),
                active: AtomicBool::new(true),
                init_received: AtomicBool::new(false),
            }),
        );

        hub.deliver(Bytes::from_static(b"moof"));
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deliver_marks_subscriber_inactive_on_write_error() {
        let hub = FanoutHub::new();
        let sink = RecordingSink::new();
        sink.closed.store(true, Ordering::SeqCst);
        hub.subscribers.insert(
            0,
            Arc::new(Subscriber {
                sink: sink.clone(),
                active: AtomicBool::new(true),
                init_received: AtomicBool::new(true),
            }),
        );

        hub.deliver(Bytes::from_static(b"moof"));
        let sub = hub.subscribers.get(&0).unwrap();
        assert!(!sub.active.load(Ordering::SeqCst));
    }
}
