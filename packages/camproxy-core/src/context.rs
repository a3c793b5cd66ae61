//! Network configuration context for the streaming server.
//!
//! This module provides [`NetworkContext`], which bundles the bind port and
//! advertised address used to build stream/WebSocket URLs for `/health` and
//! logging. The server is a fixed headless deployment, so only explicit
//! configuration is supported (no IP auto-detection, which the teacher
//! library carried only for its desktop build target).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Network configuration shared across services.
#[derive(Clone)]
pub struct NetworkContext {
    /// Server port (0 until the listener binds and assigns one).
    port: Arc<RwLock<u16>>,
    /// Notifier signaled when the port is assigned.
    port_notify: Arc<Notify>,
    /// Address the proxy advertises in URLs.
    advertise_host: Arc<RwLock<String>>,
}

impl NetworkContext {
    /// Creates a `NetworkContext` with an explicit bind port and advertise host.
    #[must_use]
    pub fn explicit(bind_port: u16, advertise_host: impl Into<String>) -> Self {
        Self {
            port: Arc::new(RwLock::new(bind_port)),
            port_notify: Arc::new(Notify::new()),
            advertise_host: Arc::new(RwLock::new(advertise_host.into())),
        }
    }

    /// Creates a `NetworkContext` for testing against `127.0.0.1`.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(0, "127.0.0.1")
    }

    /// Returns the current port value.
    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    /// Returns the advertised host.
    #[must_use]
    pub fn get_advertise_host(&self) -> String {
        self.advertise_host.read().clone()
    }

    /// Sets the port and notifies waiters (called once the listener binds).
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
        self.port_notify.notify_waiters();
    }

    /// Returns a `UrlBuilder` for the current network configuration.
    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.get_advertise_host(), self.get_port())
    }
}

/// Builder for constructing URLs for the streaming server.
pub struct UrlBuilder {
    host: String,
    port: u16,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the base URL for the server (e.g., `http://192.168.1.100:8080`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Returns the live-stream URL for a given camera serial.
    #[must_use]
    pub fn stream_url(&self, serial: &str) -> String {
        format!("{}/{}.mp4", self.base_url(), serial)
    }

    /// Returns the WebSocket URL for the JSON command API.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!(
            "ws://{}:{}{}",
            self.host,
            self.port,
            crate::protocol_constants::WS_PATH
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_context_uses_provided_host() {
        let ctx = NetworkContext::explicit(8080, "192.168.1.100");
        assert_eq!(ctx.get_advertise_host(), "192.168.1.100");
        assert_eq!(ctx.get_port(), 8080);
    }

    #[test]
    fn url_builder_generates_correct_urls() {
        let builder = UrlBuilder::new("192.168.1.100", 8080);
        assert_eq!(builder.base_url(), "http://192.168.1.100:8080");
        assert_eq!(
            builder.stream_url("CAM1"),
            "http://192.168.1.100:8080/CAM1.mp4"
        );
        assert_eq!(builder.websocket_url(), "ws://192.168.1.100:8080/api");
    }
}
