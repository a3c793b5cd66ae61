//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use crate::api::{AppState, CommandRegistry, WsConnectionManager};
use crate::context::NetworkContext;
use crate::driver::{DriverClient, VideoMeta};
use crate::encoder::EncoderSupervisor;
use crate::error::ProxyError;
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::fanout::FanoutHub;
use crate::ingress::{FrameIngress, ResolutionObserver, SwappableSink};
use crate::pipeline::{Pipeline, PipelineShared};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::TokioSpawner;
use crate::session::{PipelineActions, SessionController};
use crate::snapshot::SnapshotWriter;
use crate::state::Config;

/// Late-bound handle to the session controller.
///
/// [`FrameIngress`] and [`Pipeline`] are constructed before
/// [`SessionController`] exists (the controller needs a fully-built
/// [`PipelineActions`] to start with), but both need to call back into
/// it once it does. A shared, weak-backed cell breaks the cycle without
/// an `unsafe` workaround: the link is bound once, right after the
/// controller is built.
#[derive(Default)]
struct SessionLink {
    session: OnceLock<Weak<SessionController>>,
}

impl SessionLink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bind(&self, session: &Arc<SessionController>) {
        let _ = self.session.set(Arc::downgrade(session));
    }

    fn get(&self) -> Option<Arc<SessionController>> {
        self.session.get().and_then(Weak::upgrade)
    }
}

/// Adapts driver-observed resolution changes into session controller
/// calls, and uses the encoder's own idle/terminated state as the signal
/// to ask the session controller to (re)start the pipeline.
///
/// `ensure_encoder_started` is called by ingress on every video frame, so
/// it must check the encoder's current state before acting — otherwise a
/// healthy, running encoder would be restarted on every single frame.
struct SessionResolutionObserver {
    link: Arc<SessionLink>,
    encoder: Arc<EncoderSupervisor>,
}

impl ResolutionObserver for SessionResolutionObserver {
    fn on_video_meta(&self, _meta: VideoMeta, changed: bool) {
        if !changed {
            return;
        }
        if let Some(session) = self.link.get() {
            tokio::spawn(async move { session.on_resolution_change().await });
        }
    }

    fn ensure_encoder_started(&self) {
        use crate::encoder::EncoderState;
        if !matches!(self.encoder.state(), EncoderState::Idle | EncoderState::Terminated) {
            return;
        }
        if let Some(session) = self.link.get() {
            tokio::spawn(async move { session.on_encoder_exit(false).await });
        }
    }
}

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed to build the final [`AppState`].
pub struct BootstrappedServices {
    pub session: Arc<SessionController>,
    pub hub: Arc<FanoutHub>,
    pub driver: Arc<dyn DriverClient>,
    pub encoder: Arc<EncoderSupervisor>,
    pub ingress: Arc<FrameIngress>,
    pub pipeline_shared: Arc<PipelineShared>,
    pub snapshot: Arc<SnapshotWriter>,
    pub config: Arc<RwLock<Config>>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub network: NetworkContext,
    pub ws_manager: Arc<WsConnectionManager>,
}

impl BootstrappedServices {
    /// Builds the [`AppState`] the HTTP/WebSocket layer runs against,
    /// registering the minimum command set from §4.7.
    pub fn into_app_state(self) -> AppState {
        let commands = register_commands(&self);
        AppState {
            session: self.session,
            hub: self.hub,
            driver: self.driver,
            encoder: self.encoder,
            ingress: self.ingress,
            pipeline_shared: self.pipeline_shared,
            snapshot: self.snapshot,
            config: self.config,
            event_bridge: self.event_bridge,
            network: self.network,
            ws_manager: self.ws_manager,
            commands,
        }
    }

    /// Drains subscribers, stops the encoder, and disconnects the driver,
    /// in that order, for graceful shutdown on SIGINT/SIGTERM.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        let closed = self.ws_manager.close_all();
        log::info!("[Bootstrap] Closed {closed} WebSocket connection(s)");
        self.hub.reset();
        self.encoder.stop().await;
        let _ = self.driver.disconnect().await;
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Registers the minimum required command set (§4.7) against the
/// bootstrapped driver client.
fn register_commands(services: &BootstrappedServices) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    let driver = services.driver.clone();
    registry.register("start_listening", move |_payload| {
        let driver = driver.clone();
        async move {
            Ok(serde_json::json!({
                "client": { "version": env!("CARGO_PKG_VERSION") },
                "stations": driver.stations(),
                "devices": driver.devices(),
            }))
        }
    });

    let driver = services.driver.clone();
    registry.register("station.get_properties", move |payload| {
        let driver = driver.clone();
        async move {
            let entity = entity_field(&payload)?;
            driver.get_properties(&entity).await
        }
    });

    let driver = services.driver.clone();
    registry.register("device.get_properties", move |payload| {
        let driver = driver.clone();
        async move {
            let entity = entity_field(&payload)?;
            driver.get_properties(&entity).await
        }
    });

    let driver = services.driver.clone();
    registry.register("device.get_commands", move |payload| {
        let driver = driver.clone();
        async move {
            let entity = entity_field(&payload)?;
            let commands = driver.get_commands(&entity).await?;
            Ok(serde_json::json!(commands))
        }
    });

    registry.register("station.download_image", move |_payload| async move {
        Ok(serde_json::json!({ "async": true }))
    });

    registry.register("station.database_query_latest_info", move |_payload| async move {
        Ok(serde_json::json!({ "async": true }))
    });

    let driver = services.driver.clone();
    registry.register("device.preset_position", move |payload| {
        let driver = driver.clone();
        async move {
            let entity = entity_field(&payload)?;
            let preset = string_field(&payload, "preset")?;
            driver.preset_position(&entity, &preset).await?;
            Ok(serde_json::json!({}))
        }
    });

    let driver = services.driver.clone();
    registry.register("device.pan_and_tilt", move |payload| {
        let driver = driver.clone();
        async move {
            let entity = entity_field(&payload)?;
            let direction = string_field(&payload, "direction")?;
            driver.pan_and_tilt(&entity, &direction).await?;
            Ok(serde_json::json!({}))
        }
    });

    registry
}

fn entity_field(payload: &serde_json::Value) -> Result<String, ProxyError> {
    string_field(payload, "entity")
}

fn string_field(payload: &serde_json::Value, field: &str) -> Result<String, ProxyError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::Validation(format!("missing \"{field}\" field")))
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters:
///
/// 1. Shared infrastructure (event bridge, network context, WS manager).
/// 2. Fan-out hub and the pipeline's swappable sinks.
/// 3. Frame ingress, observing resolution changes through a late-bound
///    link to the session controller built in step 5.
/// 4. Encoder supervisor and snapshot writer.
/// 5. The `Pipeline` (the concrete `PipelineActions`), then the session
///    controller, binding the late link between them.
pub fn bootstrap_services(config: Config, driver: Arc<dyn DriverClient>) -> BootstrappedServices {
    let spawner = Arc::new(TokioSpawner::current());
    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));

    let network = NetworkContext::explicit(config.bind_port, config.advertise_host.clone());
    let ws_manager = Arc::new(WsConnectionManager::new());
    let hub = Arc::new(FanoutHub::new());
    let shared = Arc::new(PipelineShared::default());
    let config = Arc::new(RwLock::new(config));

    let video_swap = SwappableSink::new();
    let audio_swap = SwappableSink::new();

    let encoder_binary = config.read().encoder_binary.clone();
    let encoder = EncoderSupervisor::new(encoder_binary);

    let session_link = SessionLink::new();
    let observer: Box<dyn ResolutionObserver> = Box::new(SessionResolutionObserver {
        link: session_link.clone(),
        encoder: encoder.clone(),
    });
    let ingress = Arc::new(FrameIngress::new(
        Box::new(video_swap.clone()),
        Box::new(audio_swap.clone()),
        observer,
    ));

    let snapshot_binary = config.read().snapshot_binary.clone();
    let snapshots_dir = config.read().data_dir.join("snapshots");
    let hashes_path = config.read().picture_hashes_path();
    let snapshot = Arc::new(SnapshotWriter::new(
        snapshot_binary,
        snapshots_dir,
        hashes_path,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let on_exit = {
        let link = session_link.clone();
        move |unexpected: bool| {
            if let Some(session) = link.get() {
                tokio::spawn(async move { session.on_encoder_exit(unexpected).await });
            }
        }
    };

    let pipeline = Pipeline::new(
        encoder.clone(),
        hub.clone(),
        ingress.clone(),
        video_swap,
        audio_swap,
        snapshot.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.clone(),
        shared.clone(),
        on_exit,
    );

    let session = SessionController::new(
        hub.clone(),
        driver.clone(),
        pipeline as Arc<dyn PipelineActions>,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner,
    );
    session_link.bind(&session);

    BootstrappedServices {
        session,
        hub,
        driver,
        encoder,
        ingress,
        pipeline_shared: shared,
        snapshot,
        config,
        event_bridge,
        network,
        ws_manager,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NullDriverClient;

    fn test_config() -> Config {
        // No file I/O happens during bootstrap itself, so a path that is
        // never actually created is fine here.
        Config {
            data_dir: std::env::temp_dir().join("camproxy-bootstrap-test"),
            bind_port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_wires_services_with_current_device_unset() {
        let services = bootstrap_services(test_config(), Arc::new(NullDriverClient));
        assert_eq!(services.session.current_device().await, None);
        assert_eq!(services.hub.subscriber_count(), 0);
        assert!(!services.driver.is_connected());
    }

    #[tokio::test]
    async fn command_registry_includes_minimum_required_set() {
        let services = bootstrap_services(test_config(), Arc::new(NullDriverClient));
        let registry = register_commands(&services);
        assert!(!registry.is_empty());
    }
}
