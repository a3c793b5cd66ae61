//! Session controller: lifecycle of the single active camera (§4.5).
//!
//! Serializes `join`/`leave`/resolution-change/encoder-exit and the
//! drain/release timers into a single order; no two of them interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::driver::DriverClient;
use crate::error::ProxyResult;
use crate::events::{EventEmitter, SessionEvent};
use crate::fanout::FanoutHub;
use crate::protocol_constants::{DRAIN_TIMER_SECS, RELEASE_TIMER_SECS};
use crate::runtime::{TaskSpawner, TaskSpawnerExt};
use crate::utils::now_millis;

/// Result of a `join` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted,
    Conflict { current_device: String },
}

struct SessionInner {
    current_device: Option<String>,
    subscriber_count: usize,
    drain_cancel: Option<oneshot::Sender<()>>,
    release_cancel: Option<oneshot::Sender<()>>,
}

/// Hooks the controller calls to actually start/stop the pipeline for a
/// device. Kept separate from the encoder supervisor and driver client
/// traits so the controller can be tested without real I/O.
#[async_trait::async_trait]
pub trait PipelineActions: Send + Sync {
    async fn start_for(self: Arc<Self>, serial: &str) -> ProxyResult<()>;
    async fn stop_current(self: Arc<Self>);
    async fn restart_current(self: Arc<Self>, serial: &str) -> ProxyResult<()>;
}

/// Serializes mutual exclusion and lifecycle transitions for the single
/// active camera.
pub struct SessionController {
    inner: Mutex<SessionInner>,
    hub: Arc<FanoutHub>,
    driver: Arc<dyn DriverClient>,
    actions: Arc<dyn PipelineActions>,
    emitter: Arc<dyn EventEmitter>,
    spawner: Arc<dyn TaskSpawner>,
}

impl SessionController {
    pub fn new(
        hub: Arc<FanoutHub>,
        driver: Arc<dyn DriverClient>,
        actions: Arc<dyn PipelineActions>,
        emitter: Arc<dyn EventEmitter>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SessionInner {
                current_device: None,
                subscriber_count: 0,
                drain_cancel: None,
                release_cancel: None,
            }),
            hub,
            driver,
            actions,
            emitter,
            spawner,
        })
    }

    /// Current device owning the pipeline, if any.
    pub async fn current_device(&self) -> Option<String> {
        self.inner.lock().await.current_device.clone()
    }

    /// Joins `serial`. Cancels any pending drain/release timer.
    pub async fn join(self: &Arc<Self>, serial: &str) -> ProxyResult<JoinOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(cancel) = inner.drain_cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(cancel) = inner.release_cancel.take() {
            let _ = cancel.send(());
        }

        match &inner.current_device {
            None => {
                inner.current_device = Some(serial.to_string());
                inner.subscriber_count = 1;
                drop(inner);
                self.driver.start_livestream(serial).await?;
                self.actions.clone().start_for(serial).await?;
                self.emit_device_changed(Some(serial.to_string()));
                Ok(JoinOutcome::Accepted)
            }
            Some(current) if current == serial => {
                inner.subscriber_count += 1;
                Ok(JoinOutcome::Accepted)
            }
            Some(current) => Ok(JoinOutcome::Conflict {
                current_device: current.clone(),
            }),
        }
    }

    /// Deregisters one subscriber. Schedules the drain timer if the
    /// subscriber set becomes empty.
    pub async fn leave(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.subscriber_count > 0 {
            inner.subscriber_count -= 1;
        }

        if inner.subscriber_count == 0 && inner.current_device.is_some() {
            let (tx, rx) = oneshot::channel();
            inner.drain_cancel = Some(tx);
            let controller = self.clone();
            self.spawner.spawn_labeled("drain_timer", async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(DRAIN_TIMER_SECS)) => {
                        controller.on_drain_fire().await;
                    }
                    _ = rx => {}
                }
            });
        }
    }

    async fn on_drain_fire(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.subscriber_count != 0 {
            return;
        }
        inner.drain_cancel = None;
        let serial = inner.current_device.clone();
        let (tx, rx) = oneshot::channel();
        inner.release_cancel = Some(tx);
        drop(inner);

        if let Some(serial) = &serial {
            self.actions.clone().stop_current().await;
            let _ = self.driver.stop_livestream(serial).await;
        }

        let controller = self.clone();
        self.spawner.spawn_labeled("release_timer", async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(RELEASE_TIMER_SECS)) => {
                    controller.on_release_fire().await;
                }
                _ = rx => {}
            }
        });
    }

    async fn on_release_fire(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.subscriber_count != 0 {
            return;
        }
        inner.release_cancel = None;
        inner.current_device = None;
        drop(inner);
        self.hub.reset();
        self.emit_device_changed(None);
    }

    /// Reacts to an observed resolution change: tears down and restarts
    /// the encoder, clearing metadata, if subscribers exist.
    pub async fn on_resolution_change(self: &Arc<Self>) {
        let inner = self.inner.lock().await;
        if inner.subscriber_count == 0 {
            return;
        }
        let serial = inner.current_device.clone();
        drop(inner);
        if let Some(serial) = serial {
            if let Err(e) = self.actions.clone().restart_current(&serial).await {
                log::warn!("resolution-change restart failed for {serial}: {e}");
            }
        }
    }

    /// Reacts to the encoder supervisor reporting an exit. If
    /// subscribers exist, best-effort restart (same as resolution
    /// change); otherwise transitions to idle.
    pub async fn on_encoder_exit(self: &Arc<Self>, _unexpected: bool) {
        let inner = self.inner.lock().await;
        let has_subscribers = inner.subscriber_count > 0;
        let serial = inner.current_device.clone();
        drop(inner);

        if has_subscribers {
            if let Some(serial) = serial {
                if let Err(e) = self.actions.clone().restart_current(&serial).await {
                    log::warn!("encoder-exit restart failed for {serial}: {e}");
                }
            }
        } else {
            self.actions.clone().stop_current().await;
        }
    }

    fn emit_device_changed(&self, current_device: Option<String>) {
        self.emitter.emit_session(SessionEvent::DeviceChanged {
            current_device,
            timestamp: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_double::RecordingDriverClient;
    use crate::events::NoopEventEmitter;
    use crate::runtime::TokioSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingActions {
        starts: AtomicUsize,
        stops: AtomicUsize,
        restarts: AtomicUsize,
    }

    impl RecordingActions {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                restarts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl PipelineActions for RecordingActions {
        async fn start_for(self: Arc<Self>, _serial: &str) -> ProxyResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_current(self: Arc<Self>) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn restart_current(self: Arc<Self>, _serial: &str) -> ProxyResult<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn build_controller() -> (Arc<SessionController>, Arc<RecordingActions>) {
        let hub = Arc::new(FanoutHub::new());
        let driver = Arc::new(RecordingDriverClient::default());
        let actions = RecordingActions::new();
        let emitter = Arc::new(NoopEventEmitter);
        let spawner = Arc::new(TokioSpawner::current());
        (
            SessionController::new(hub, driver, actions.clone(), emitter, spawner),
            actions,
        )
    }

    #[tokio::test]
    async fn first_join_sets_current_device_and_starts_pipeline() {
        let (controller, actions) = build_controller();
        let outcome = controller.join("CAM1").await.unwrap();
        assert_eq!(outcome, JoinOutcome::Accepted);
        assert_eq!(controller.current_device().await, Some("CAM1".to_string()));
        assert_eq!(actions.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_join_same_device_is_accepted_without_restart() {
        let (controller, actions) = build_controller();
        controller.join("CAM1").await.unwrap();
        let outcome = controller.join("CAM1").await.unwrap();
        assert_eq!(outcome, JoinOutcome::Accepted);
        assert_eq!(actions.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_different_device_is_conflict() {
        let (controller, _actions) = build_controller();
        controller.join("CAM1").await.unwrap();
        let outcome = controller.join("CAM2").await.unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Conflict {
                current_device: "CAM1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn leave_schedules_drain_then_release_then_clears_device() {
        let hub = Arc::new(FanoutHub::new());
        let driver = Arc::new(RecordingDriverClient::default());
        let actions = RecordingActions::new();
        let emitter = Arc::new(NoopEventEmitter);
        let spawner = Arc::new(TokioSpawner::current());
        let controller = SessionController::new(hub, driver, actions.clone(), emitter, spawner);

        controller.join("CAM1").await.unwrap();
        controller.leave().await;

        // Force the timers directly rather than sleeping multiple seconds in a test.
        controller.on_drain_fire().await;
        controller.on_release_fire().await;

        assert_eq!(controller.current_device().await, None);
        assert_eq!(actions.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_change_restarts_only_when_subscribers_present() {
        let (controller, actions) = build_controller();
        controller.on_resolution_change().await;
        assert_eq!(actions.restarts.load(Ordering::SeqCst), 0);

        controller.join("CAM1").await.unwrap();
        controller.on_resolution_change().await;
        assert_eq!(actions.restarts.load(Ordering::SeqCst), 1);
    }
}
