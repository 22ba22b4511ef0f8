//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: what HTTP handlers return. Converted into a JSON body with a
//!   stable `type` field so the UI can branch on it.
//! - **VoiceError**: the taxonomy of the realtime voice core (device access,
//!   connection lifecycle, payload decoding, playback). Session code handles
//!   these locally by tearing the session down; handlers only see them when a
//!   user action (start/stop) fails directly.
//!
//! ## Propagation:
//! - `?` on an `anyhow::Error` becomes `AppError::Internal`
//! - `?` on a `VoiceError` becomes the matching HTTP class (409 for
//!   `AlreadyActive`, 403 for permission problems, 502 for upstream faults)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP surface.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::NotFound(format!("Recipe {} not found", id)));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Request conflicts with current state (e.g. a voice session is already running)
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// A remote collaborator (image analysis, recipes, stores, speech) failed
    Upstream(String),

    /// Voice session could not be started or stopped
    Voice(VoiceError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream service error: {}", msg),
            AppError::Voice(err) => write!(f, "Voice session error: {}", err),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Recipe r-12 not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone()),
            AppError::Voice(err) => (err.status_code(), err.kind(), err.to_string()),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<VoiceError> for AppError {
    fn from(err: VoiceError) -> Self {
        AppError::Voice(err)
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Failure modes of the realtime voice core.
///
/// ## Lifecycle vs. payload errors:
/// - `PermissionDenied`, `DeviceUnavailable`, `ConnectionFailed`,
///   `ConnectionError` and `PlaybackError` end the session: the controller
///   tears everything down and flips the indicator to inactive.
/// - `DecodeError` rejects a single malformed payload; the chunk is dropped.
/// - `ParseError` comes from the recipe generator and is replaced by an
///   empty recipe list.
/// - `AlreadyActive` is returned by `start()` when the controller is not idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// Microphone (or location) access was refused
    PermissionDenied(String),
    /// An audio device context could not be created
    DeviceUnavailable(String),
    /// The remote handshake failed
    ConnectionFailed(String),
    /// The transport failed mid-session
    ConnectionError(String),
    /// A transport payload was not valid base64 / PCM16
    DecodeError(String),
    /// The output device rejected a segment (closed or faulted)
    PlaybackError(String),
    /// A structured response from a remote collaborator was malformed
    ParseError(String),
    /// `start()` was called while a session is opening, open or closing
    AlreadyActive,
}

impl VoiceError {
    /// Machine-readable error class, used in JSON bodies and status events.
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied(_) => "permission_denied",
            VoiceError::DeviceUnavailable(_) => "device_unavailable",
            VoiceError::ConnectionFailed(_) => "connection_failed",
            VoiceError::ConnectionError(_) => "connection_error",
            VoiceError::DecodeError(_) => "decode_error",
            VoiceError::PlaybackError(_) => "playback_error",
            VoiceError::ParseError(_) => "parse_error",
            VoiceError::AlreadyActive => "already_active",
        }
    }

    /// Whether this error ends the session it happened in.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied(_)
                | VoiceError::DeviceUnavailable(_)
                | VoiceError::ConnectionFailed(_)
                | VoiceError::ConnectionError(_)
                | VoiceError::PlaybackError(_)
        )
    }

    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            VoiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            VoiceError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            VoiceError::ConnectionFailed(_) | VoiceError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            VoiceError::DecodeError(_) | VoiceError::ParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VoiceError::PlaybackError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VoiceError::AlreadyActive => StatusCode::CONFLICT,
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            VoiceError::DeviceUnavailable(msg) => write!(f, "audio device unavailable: {}", msg),
            VoiceError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            VoiceError::ConnectionError(msg) => write!(f, "connection error: {}", msg),
            VoiceError::DecodeError(msg) => write!(f, "decode error: {}", msg),
            VoiceError::PlaybackError(msg) => write!(f, "playback error: {}", msg),
            VoiceError::ParseError(msg) => write!(f, "parse error: {}", msg),
            VoiceError::AlreadyActive => write!(f, "a voice session is already active"),
        }
    }
}

impl std::error::Error for VoiceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_error_kinds() {
        assert_eq!(VoiceError::AlreadyActive.kind(), "already_active");
        assert_eq!(VoiceError::DecodeError("x".into()).kind(), "decode_error");
        assert!(VoiceError::ConnectionError("reset".into()).is_session_fatal());
        assert!(!VoiceError::DecodeError("bad".into()).is_session_fatal());
        assert!(!VoiceError::AlreadyActive.is_session_fatal());
    }

    #[test]
    fn test_voice_error_http_mapping() {
        let response = AppError::from(VoiceError::AlreadyActive).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::CONFLICT);

        let response = AppError::from(VoiceError::PermissionDenied("mic".into())).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_display_messages() {
        let err = AppError::NotFound("Recipe r-1 not found".to_string());
        assert_eq!(err.to_string(), "Not found: Recipe r-1 not found");
        assert_eq!(
            VoiceError::ConnectionFailed("handshake refused".into()).to_string(),
            "connection failed: handshake refused"
        );
    }
}
