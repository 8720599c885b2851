//! Error taxonomy and the response/error translator.
//!
//! Every failure in the request pipeline is a [`ProxyError`]. The translator
//! maps each variant to an HTTP status and a single sanitized `error`
//! message; nothing else about the failure (causes, identifiers, upstream
//! bodies) ever reaches the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_common::sanitize_message;
use serde::Serialize;
use thiserror::Error;

/// Public message for isolation violations.
pub const ISOLATION_VIOLATION_MESSAGE: &str = "Session isolation violation: tenant mismatch";

/// Request body validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    /// Body is not a JSON object
    MalformedJson,
    /// `prompt` is absent, not a string, or blank
    MissingPrompt,
    /// `sessionId` cannot be carried in a header
    InvalidSessionId,
}

impl InputError {
    /// Message shown to the caller.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedJson => "Invalid JSON",
            Self::MissingPrompt => "Missing prompt",
            Self::InvalidSessionId => "Invalid sessionId",
        }
    }
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a proxied request can fail.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Required configuration is missing or unusable; fails every request
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Operator-facing reason (never shown to callers)
        reason: String,
    },

    /// Request body failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(InputError),

    /// Authorized session differs from the requested session
    #[error("Session isolation violation")]
    IsolationViolation,

    /// Tenant-scoped credentials could not be obtained
    #[error("Credential exchange failed: {reason}")]
    CredentialExchange {
        /// Sanitized reason
        reason: String,
    },

    /// Backend answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Upstream {
        /// Status relayed to the caller
        status: StatusCode,
        /// Sanitized message
        message: String,
    },

    /// Backend could not be reached or the exchange broke down
    #[error("Transport error: {reason}")]
    Transport {
        /// Sanitized reason
        reason: String,
    },
}

impl ProxyError {
    /// Creates a Configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a CredentialExchange error with a sanitized reason.
    #[must_use]
    pub fn credential_exchange(reason: impl AsRef<str>) -> Self {
        Self::CredentialExchange {
            reason: sanitize_message(reason.as_ref()),
        }
    }

    /// Creates an Upstream error.
    ///
    /// Statuses outside 4xx/5xx are reported as 502: a redirect or an
    /// informational answer from the backend is not something to pass on.
    #[must_use]
    pub fn upstream(status: u16, message: impl AsRef<str>) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        Self::Upstream {
            status,
            message: sanitize_message(message.as_ref()),
        }
    }

    /// Creates a Transport error with a sanitized reason.
    #[must_use]
    pub fn transport(reason: impl AsRef<str>) -> Self {
        Self::Transport {
            reason: sanitize_message(reason.as_ref()),
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::IsolationViolation => StatusCode::FORBIDDEN,
            Self::Upstream { status, .. } => *status,
            Self::Configuration { .. } | Self::CredentialExchange { .. } | Self::Transport { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The single message placed in the `error` field of the response.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            // Never expose configuration details
            Self::Configuration { .. } => "Server configuration error".to_string(),
            Self::InvalidInput(input) => input.as_str().to_string(),
            Self::IsolationViolation => ISOLATION_VIOLATION_MESSAGE.to_string(),
            Self::CredentialExchange { reason } => format!("Identity isolation failed: {reason}"),
            Self::Upstream { message, .. } => message.clone(),
            Self::Transport { .. } => "Upstream request failed".to_string(),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InvalidInput(_) => "invalid_input",
            Self::IsolationViolation => "isolation_violation",
            Self::CredentialExchange { .. } => "credential_exchange",
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "transport",
        }
    }

    /// Renders the caller-facing body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.public_message(),
        }
    }
}

impl From<InputError> for ProxyError {
    fn from(err: InputError) -> Self {
        Self::InvalidInput(err)
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport("timed out")
        } else if err.is_connect() {
            Self::transport("connection failed")
        } else {
            Self::transport(err.without_url().to_string())
        }
    }
}

/// JSON error body: exactly one human-readable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Sanitized message
    pub error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error_kind = self.kind(), error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error_kind = self.kind(), error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(self.to_body())).into_response()
    }
}
