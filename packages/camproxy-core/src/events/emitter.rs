//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{DriverEvent, SessionEvent, SnapshotEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to WebSocket clients.
pub trait EventEmitter: Send + Sync {
    /// Emits a driver-sourced event (property change, connectivity).
    fn emit_driver(&self, event: DriverEvent);

    /// Emits a session controller / pipeline lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a snapshot writer event.
    fn emit_snapshot(&self, event: SnapshotEvent);
}

/// No-op emitter for testing or embedded use.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_driver(&self, _event: DriverEvent) {}
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_snapshot(&self, _event: SnapshotEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_driver(&self, event: DriverEvent) {
        log::debug!("driver_event: {:?}", event);
    }

    fn emit_session(&self, event: SessionEvent) {
        log::debug!("session_event: {:?}", event);
    }

    fn emit_snapshot(&self, event: SnapshotEvent) {
        log::debug!("snapshot_event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        driver_count: AtomicUsize,
        session_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                driver_count: AtomicUsize::new(0),
                session_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_driver(&self, _event: DriverEvent) {
            self.driver_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_session(&self, _event: SessionEvent) {
            self.session_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_snapshot(&self, _event: SnapshotEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_driver(DriverEvent::Connected { timestamp: 0 });
        emitter.emit_driver(DriverEvent::Disconnected {
            reason: "closed".into(),
            timestamp: 0,
        });
        emitter.emit_session(SessionEvent::DeviceChanged {
            current_device: Some("CAM1".into()),
            timestamp: 0,
        });

        assert_eq!(emitter.driver_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.session_count.load(Ordering::SeqCst), 1);
    }
}
