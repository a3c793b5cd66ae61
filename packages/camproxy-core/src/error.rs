//! Centralized error types for the camproxy core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! The error kinds below follow the error-handling design directly: each
//! variant corresponds to one of Validation / Conflict / TransientPipe /
//! EncoderFailure / DriverFailure / Fatal, with the documented propagation
//! policy (local recovery for transient errors, session-level recovery for
//! encoder/resolution events, global shutdown only for Fatal).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the camera proxy.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// Bad serial format, unknown config keys, malformed JSON.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A second camera was requested while another is already streaming.
    #[error("Conflict: {current_device} is already streaming")]
    Conflict {
        /// The camera currently authorized to stream.
        current_device: String,
        /// The camera the caller attempted to join.
        requested_device: String,
    },

    /// Peer-closed sink, broken pipe, or similar non-fatal I/O on any actor.
    #[error("Transient pipe error: {0}")]
    TransientPipe(String),

    /// Encoder spawn failure or unexpected exit.
    #[error("Encoder failure: {0}")]
    EncoderFailure(String),

    /// Driver connection loss or command rejection.
    #[error("Driver failure: {0}")]
    DriverFailure(String),

    /// Parse invariant violation, disk write refusal, or other unrecoverable error.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// No subscriber received the init segment within the wait window.
    #[error("Timed out waiting for init segment")]
    InitTimeout,
}

impl ProxyError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict { .. } => "conflict",
            Self::TransientPipe(_) => "transient_pipe_error",
            Self::EncoderFailure(_) => "encoder_failure",
            Self::DriverFailure(_) => "driver_failure",
            Self::Fatal(_) => "fatal_error",
            Self::InitTimeout => "init_timeout",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InitTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::TransientPipe(_) | Self::DriverFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::EncoderFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for ProxyError {
    fn code(&self) -> &'static str {
        ProxyError::code(self)
    }
}

/// Convenient Result alias for application-wide operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Conflict {
            current_device,
            requested_device,
        } = &self
        {
            #[derive(Serialize)]
            struct ConflictBody {
                #[serde(rename = "currentDevice")]
                current_device: String,
                #[serde(rename = "requestedDevice")]
                requested_device: String,
            }
            return (
                status,
                Json(ConflictBody {
                    current_device: current_device.clone(),
                    requested_device: requested_device.clone(),
                }),
            )
                .into_response();
        }
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_is_bad_request() {
        let err = ProxyError::Validation("bad serial".into());
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conflict_error_is_409() {
        let err = ProxyError::Conflict {
            current_device: "CAM1".into(),
            requested_device: "CAM2".into(),
        };
        assert_eq!(err.code(), "conflict");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn init_timeout_is_503() {
        assert_eq!(ProxyError::InitTimeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn fatal_is_500() {
        let err = ProxyError::Fatal("box size < 8".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
