//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for the driver, session and snapshot domains
//!
//! The actual transport implementation (WebSocket) is handled separately in
//! the `api` module using [`BroadcastEventBridge`].

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;
use serde_json::Value;

/// Events broadcast to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events sourced from the cloud driver (property changes, connectivity).
    Driver(DriverEvent),
    /// Events about the session controller / pipeline lifecycle.
    Session(SessionEvent),
    /// Events about snapshot generation.
    Snapshot(SnapshotEvent),
}

/// Driver-sourced events.
///
/// The driver's property surface is broad (dozens of distinct property-change
/// names), so rather than one variant per property name, every named change
/// is carried by a single tagged `PropertyChanged` variant with a free-form
/// JSON payload. Connectivity changes get their own variants since the
/// session controller reacts to them directly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriverEvent {
    /// A named property of a station or device changed.
    PropertyChanged {
        /// Station or device serial the property belongs to.
        entity: String,
        /// Property name as reported by the driver.
        name: String,
        /// Opaque property payload, forwarded verbatim.
        payload: Value,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The driver connection was established.
    Connected {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The driver connection was lost or rejected a command.
    Disconnected {
        /// Human-readable reason.
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Session controller / pipeline lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// `currentDevice` changed (camera acquired or released).
    DeviceChanged {
        /// The new `currentDevice`, or `None` if released.
        #[serde(rename = "currentDevice")]
        current_device: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The encoder session's state machine transitioned.
    EncoderStateChanged {
        /// Camera serial the encoder session belongs to.
        serial: String,
        /// New state, one of idle/starting/running/draining/terminated.
        state: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Snapshot writer events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SnapshotEvent {
    /// A still image was successfully written for `serial`.
    Saved {
        /// The camera serial the snapshot belongs to.
        serial: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl From<DriverEvent> for BroadcastEvent {
    fn from(event: DriverEvent) -> Self {
        BroadcastEvent::Driver(event)
    }
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<SnapshotEvent> for BroadcastEvent {
    fn from(event: SnapshotEvent) -> Self {
        BroadcastEvent::Snapshot(event)
    }
}
