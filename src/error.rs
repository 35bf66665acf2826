//! Error types shared across the gateway.
//!
//! [`ServiceError`] describes what can go wrong when talking to the remote AI
//! service. [`ApiError`] is the response encoder: every handler returns it and
//! it renders as `{"error": "..."}` with the matching HTTP status.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error code the remote service uses for request validation failures.
pub const VALIDATION_EXCEPTION: &str = "ValidationException";

/// Error code the remote service uses for unknown resources.
pub const RESOURCE_NOT_FOUND_EXCEPTION: &str = "ResourceNotFoundException";

/// Failure of a call against the remote AI service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered with a tagged error.
    #[error("{code} - {message}")]
    Remote {
        /// Machine-readable error code, e.g. `ValidationException`.
        code: String,
        /// Human-readable message from the service.
        message: String,
    },

    /// The request never produced a usable HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a body we could not decode.
    #[error("malformed service response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An event stream frame was unreadable.
    #[error("event stream error: {0}")]
    Stream(String),

    /// A configured base URL cannot address the requested resource.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl ServiceError {
    /// Build a tagged remote error.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Remote error code, if the service tagged the failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Message carried by the failure.
    pub fn message(&self) -> String {
        match self {
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        self.code() == Some(VALIDATION_EXCEPTION)
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(RESOURCE_NOT_FOUND_EXCEPTION)
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A required setting is missing from the deployment.
    #[error("{0}")]
    Configuration(String),

    /// A remote call failed; `context` prefixes the rendered message.
    #[error("{context}: {source}")]
    Service {
        context: String,
        #[source]
        source: ServiceError,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn service(context: impl Into<String>, source: ServiceError) -> Self {
        Self::Service {
            context: context.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) | Self::Service { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
