//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the session
//! controller, fan-out hub, and driver. It provides the router
//! construction and server startup functionality.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::context::NetworkContext;
use crate::driver::DriverClient;
use crate::encoder::EncoderSupervisor;
use crate::events::BroadcastEventBridge;
use crate::fanout::FanoutHub;
use crate::ingress::FrameIngress;
use crate::pipeline::PipelineShared;
use crate::session::SessionController;
use crate::snapshot::SnapshotWriter;
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws::CommandRegistry;
pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to the session controller, fan-out
/// hub, driver, and supporting services; all business logic lives in
/// those collaborators.
#[derive(Clone)]
pub struct AppState {
    /// Owns `currentDevice` and serializes join/leave/restart transitions.
    pub session: Arc<SessionController>,
    /// Delivers the live fMP4 stream to HTTP subscribers.
    pub hub: Arc<FanoutHub>,
    /// Cloud driver client (external collaborator).
    pub driver: Arc<dyn DriverClient>,
    /// External encoder process supervisor.
    pub encoder: Arc<EncoderSupervisor>,
    /// Routes driver-delivered frames into the encoder's sinks.
    pub ingress: Arc<FrameIngress>,
    /// Mutable state shared between the pipeline and `/health`.
    pub pipeline_shared: Arc<PipelineShared>,
    /// Writes and persists still-image snapshots.
    pub snapshot: Arc<SnapshotWriter>,
    /// Application configuration, including the durable whitelisted subset.
    pub config: Arc<RwLock<Config>>,
    /// Event bridge for broadcasting events to WebSocket peers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Network configuration (bind port, advertised host).
    pub network: NetworkContext,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Registered JSON WebSocket command handlers.
    pub commands: CommandRegistry,
}

/// Starts the HTTP server on the configured bind port.
///
/// Unlike the desktop build this library was adapted from, the camera
/// proxy is a fixed headless deployment: it binds the configured port
/// directly rather than probing a discovery range.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let bind_port = state.config.read().bind_port;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], bind_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    state.network.set_port(bind_port);
    log::info!("Server listening on http://0.0.0.0:{}", bind_port);

    let app = http::create_router(state);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
