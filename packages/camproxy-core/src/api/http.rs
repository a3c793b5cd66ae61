//! HTTP route handlers (§4.8).
//!
//! All handlers are thin: they delegate to the session controller, the
//! fan-out hub, and the whitelisted config record for their behavior.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::stream::Stream;
use serde_json::json;

use crate::api::response::{api_error, api_ok};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::ProxyError;
use crate::fanout::SubscriberSink;
use crate::protocol_constants::{SERVICE_ID, WS_PATH};
use crate::utils::validate_serial;

/// Bridges a [`SubscriberSink`] write into an unbounded channel a stream
/// can drain from, so the hub's join protocol can run without knowing
/// about Axum's body streaming types.
struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<Bytes>,
}

impl SubscriberSink for ChannelSink {
    fn write(&self, bytes: &Bytes) -> bool {
        self.tx.send(bytes.clone()).is_ok()
    }
}

/// Logs the lifetime of one subscriber's connection and releases it from
/// the session on drop, whether the peer closed cleanly or the stream
/// was simply never polled again.
struct SubscriberGuard {
    state: AppState,
    serial: String,
    subscriber_id: u64,
    frames_sent: AtomicU64,
}

impl SubscriberGuard {
    fn record_frame(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let frames = self.frames_sent.load(Ordering::Relaxed);
        log::info!(
            "[Stream] subscriber detached: serial={}, frames_sent={}",
            self.serial,
            frames
        );
        let state = self.state.clone();
        let subscriber_id = self.subscriber_id;
        tokio::spawn(async move {
            state.hub.detach(subscriber_id);
            state.session.leave().await;
        });
    }
}

/// `GET /{serial}.mp4`: joins the session, waits for init gating, and
/// streams the live fMP4 box sequence as chunked `video/mp4`.
async fn stream_video(Path(serial): Path<String>, State(state): State<AppState>) -> Response {
    if validate_serial(&serial).is_err() {
        return ProxyError::Validation("invalid camera serial".into()).into_response();
    }

    match state.session.join(&serial).await {
        Ok(crate::session::JoinOutcome::Conflict { current_device }) => {
            return ProxyError::Conflict {
                current_device,
                requested_device: serial,
            }
            .into_response();
        }
        Err(e) => return e.into_response(),
        Ok(crate::session::JoinOutcome::Accepted) => {}
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();
    let sink: Arc<dyn SubscriberSink> = Arc::new(ChannelSink { tx });

    let subscriber_id = match state.hub.join(sink).await {
        Ok(id) => id,
        Err(e) => {
            state.session.leave().await;
            return e.into_response();
        }
    };

    let guard = Arc::new(SubscriberGuard {
        state: state.clone(),
        serial: serial.clone(),
        subscriber_id,
        frames_sent: AtomicU64::new(0),
    });

    let body_stream: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>> =
        Box::pin(stream! {
            let _guard = guard;
            while let Some(chunk) = rx.recv().await {
                _guard.record_frame();
                yield Ok(chunk);
            }
        });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(Body::from_stream(body_stream))
        .expect("response with a streamed body always builds")
}

/// `GET /config`: returns the effective whitelisted configuration.
async fn get_config(State(state): State<AppState>) -> Response {
    api_ok(state.config.read().whitelisted.clone())
}

/// `POST /config`: merges a JSON patch into the whitelisted configuration,
/// persists it, and reconciles the encoder/driver against whichever
/// fields actually changed.
async fn post_config(State(state): State<AppState>, Json(patch): Json<serde_json::Value>) -> Response {
    let updated = {
        let mut config = state.config.write();
        match config.whitelisted.merge(&patch) {
            Ok(updated) => updated,
            Err(ProxyError::Validation(message)) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    json!({ "allowedFields": crate::state::WhitelistedConfig::ALLOWED_FIELDS, "message": message }),
                );
            }
            Err(e) => return e.into_response(),
        }
    };

    let saved = state.config.read().save_whitelisted().is_ok();

    let needs_transcoding_restart = updated.iter().any(|f| crate::state::WhitelistedConfig::is_transcoding_field(f));
    let needs_driver_reconnect = updated.iter().any(|f| crate::state::WhitelistedConfig::is_driver_field(f));

    if needs_transcoding_restart {
        state.session.on_resolution_change().await;
    }

    if needs_driver_reconnect {
        let creds = state.config.read().whitelisted.clone();
        if let (Some(username), Some(password), Some(country), Some(language)) =
            (creds.username, creds.password, creds.country, creds.language)
        {
            let _ = state.driver.disconnect().await;
            if let Err(e) = state.driver.connect(&username, &password, &country, &language).await {
                log::warn!("driver reconnect after config change failed: {e}");
            }
        }
    }

    api_ok(json!({
        "success": true,
        "updatedFields": updated,
        "saved": saved,
        "config": state.config.read().whitelisted.clone(),
    }))
}

/// `GET /health`: reports driver, pipeline, and fan-out status.
async fn health(State(state): State<AppState>) -> Response {
    let video_meta = state.ingress.video_meta();
    let audio_meta = state.ingress.audio_meta();
    let has_keyframe_fragment = state.pipeline_shared.latest_keyframe_fragment.read().is_some();

    api_ok(json!({
        "service": SERVICE_ID,
        "driverConnected": state.driver.is_connected(),
        "videoMeta": video_meta.map(|m| json!({ "width": m.width, "height": m.height })),
        "audioMeta": audio_meta.map(|m| json!({ "sampleRate": m.sample_rate, "channels": m.channels })),
        "subscribers": state.hub.subscriber_count(),
        "isTranscoding": state.hub.is_transcoding(),
        "currentDevice": state.session.current_device().await,
        "scale": state.config.read().whitelisted.video_scale,
        "hasInitSegment": state.hub.has_init_segment(),
        "hasKeyframeFragment": has_keyframe_fragment,
    }))
}

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).post(post_config))
        .route("/{serial}.mp4", get(stream_video))
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();
        let sink = ChannelSink { tx };
        drop(rx);
        assert!(!sink.write(&Bytes::from_static(b"x")));
    }
}
