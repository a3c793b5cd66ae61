//! Abstraction over the cloud driver: the external collaborator that
//! authenticates an account and delivers decoded frames and property
//! events for one camera at a time.
//!
//! The driver itself is out of core scope; this module only defines the
//! boundary the session controller and frame ingress talk across, so the
//! rest of the pipeline can be built and tested against a double.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProxyResult;

/// Codec of an elementary video stream as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// The encoder-facing format string for this codec.
    pub fn as_ffmpeg_format(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "hevc",
        }
    }
}

/// Metadata accompanying a video frame delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodec,
}

/// Metadata accompanying an audio frame delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMeta {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded property-change notification pushed by the driver.
#[derive(Debug, Clone)]
pub struct PropertyEvent {
    /// Station or device serial the property belongs to.
    pub entity: String,
    /// Property name, forwarded verbatim from the driver.
    pub name: String,
    /// Opaque property payload.
    pub payload: Value,
}

/// Callbacks the driver invokes as frames and events arrive.
///
/// Kept as a trait (rather than a channel) so tests can assert on
/// call order without needing an async runtime.
pub trait DriverSink: Send + Sync {
    /// Called for each decoded video frame for `serial`.
    fn on_video_frame(&self, serial: &str, bytes: &[u8], meta: VideoMeta);
    /// Called for each decoded audio frame for `serial`.
    fn on_audio_frame(&self, serial: &str, bytes: &[u8], meta: AudioMeta);
    /// Called for each property-change notification.
    fn on_property_event(&self, event: PropertyEvent);
    /// Called when the driver connection is lost or rejects a command.
    fn on_disconnected(&self, reason: String);
}

/// The operations the session controller and HTTP surface need from the
/// cloud driver.
///
/// Modeled as an `async_trait` so the concrete implementation (an SDK
/// wrapping the vendor's cloud API) can perform network I/O, while core
/// logic is exercised in tests against an in-memory double.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// Authenticates and establishes the driver connection.
    async fn connect(&self, username: &str, password: &str, country: &str, language: &str) -> ProxyResult<()>;

    /// Tears down the driver connection.
    async fn disconnect(&self) -> ProxyResult<()>;

    /// Requests the driver start delivering frames for `serial`.
    async fn start_livestream(&self, serial: &str) -> ProxyResult<()>;

    /// Requests the driver stop delivering frames for `serial`.
    async fn stop_livestream(&self, serial: &str) -> ProxyResult<()>;

    /// Returns the property bag for a station or device.
    async fn get_properties(&self, entity: &str) -> ProxyResult<Value>;

    /// Returns the command identifiers `entity` supports.
    async fn get_commands(&self, entity: &str) -> ProxyResult<Vec<String>>;

    /// Moves a device to a named preset position. Device-specific mapping
    /// is opaque to the core; the call is passed through verbatim.
    async fn preset_position(&self, entity: &str, preset: &str) -> ProxyResult<()>;

    /// Issues a pan/tilt command. Device-specific mapping is opaque to
    /// the core; the call is passed through verbatim.
    async fn pan_and_tilt(&self, entity: &str, direction: &str) -> ProxyResult<()>;

    /// Known station serials, once connected.
    fn stations(&self) -> Vec<String>;

    /// Known device serials, once connected.
    fn devices(&self) -> Vec<String>;

    /// Whether the driver connection is currently established.
    fn is_connected(&self) -> bool;
}

/// A [`DriverClient`] that never connects.
///
/// The vendor driver library is an external collaborator out of core
/// scope (spec §1); this placeholder lets the server start and serve
/// `/health` before a real driver implementation is wired into
/// [`crate::bootstrap::bootstrap_services`]. Every lifecycle call
/// succeeds as a no-op; `is_connected` always reports `false`.
pub struct NullDriverClient;

#[async_trait]
impl DriverClient for NullDriverClient {
    async fn connect(&self, _username: &str, _password: &str, _country: &str, _language: &str) -> ProxyResult<()> {
        Err(crate::error::ProxyError::DriverFailure(
            "no driver implementation configured".into(),
        ))
    }

    async fn disconnect(&self) -> ProxyResult<()> {
        Ok(())
    }

    async fn start_livestream(&self, _serial: &str) -> ProxyResult<()> {
        Err(crate::error::ProxyError::DriverFailure(
            "no driver implementation configured".into(),
        ))
    }

    async fn stop_livestream(&self, _serial: &str) -> ProxyResult<()> {
        Ok(())
    }

    async fn get_properties(&self, _entity: &str) -> ProxyResult<Value> {
        Ok(serde_json::json!({}))
    }

    async fn get_commands(&self, _entity: &str) -> ProxyResult<Vec<String>> {
        Ok(vec![])
    }

    async fn preset_position(&self, _entity: &str, _preset: &str) -> ProxyResult<()> {
        Ok(())
    }

    async fn pan_and_tilt(&self, _entity: &str, _direction: &str) -> ProxyResult<()> {
        Ok(())
    }

    fn stations(&self) -> Vec<String> {
        vec![]
    }

    fn devices(&self) -> Vec<String> {
        vec![]
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory [`DriverClient`] double recording the calls made to it.
    #[derive(Default)]
    pub struct RecordingDriverClient {
        connected: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DriverClient for RecordingDriverClient {
        async fn connect(&self, _username: &str, _password: &str, _country: &str, _language: &str) -> ProxyResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            self.calls.lock().push("connect".into());
            Ok(())
        }

        async fn disconnect(&self) -> ProxyResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            self.calls.lock().push("disconnect".into());
            Ok(())
        }

        async fn start_livestream(&self, serial: &str) -> ProxyResult<()> {
            self.calls.lock().push(format!("start_livestream:{serial}"));
            Ok(())
        }

        async fn stop_livestream(&self, serial: &str) -> ProxyResult<()> {
            self.calls.lock().push(format!("stop_livestream:{serial}"));
            Ok(())
        }

        async fn get_properties(&self, _entity: &str) -> ProxyResult<Value> {
            Ok(serde_json::json!({}))
        }

        async fn get_commands(&self, _entity: &str) -> ProxyResult<Vec<String>> {
            Ok(vec![])
        }

        async fn preset_position(&self, _entity: &str, _preset: &str) -> ProxyResult<()> {
            Ok(())
        }

        async fn pan_and_tilt(&self, _entity: &str, _direction: &str) -> ProxyResult<()> {
            Ok(())
        }

        fn stations(&self) -> Vec<String> {
            vec![]
        }

        fn devices(&self) -> Vec<String> {
            vec![]
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn recording_driver_tracks_lifecycle_calls() {
        let driver = RecordingDriverClient::default();
        driver.connect("u", "p", "US", "en").await.unwrap();
        driver.start_livestream("CAM1").await.unwrap();
        driver.stop_livestream("CAM1").await.unwrap();
        driver.disconnect().await.unwrap();

        let calls = driver.calls.lock().clone();
        assert_eq!(
            calls,
            vec!["connect", "start_livestream:CAM1", "stop_livestream:CAM1", "disconnect"]
        );
        assert!(!driver.is_connected());
    }
}
