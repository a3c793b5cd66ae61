//! Small helpers for building consistent JSON response envelopes.

use axum::response::{IntoResponse, Json, Response};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// A successful response carrying an arbitrary JSON-serializable payload.
pub fn api_ok<T: Serialize>(payload: T) -> Response {
    Json(payload).into_response()
}

/// An error response with a status code and machine-readable body.
pub fn api_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}
