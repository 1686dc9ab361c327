//! Indexer error types with HTTP status code mapping.
//!
//! [`IndexerError`] is the central error type for the sync subsystem. The
//! status server renders it as a structured JSON error response; the
//! background services record it in the error ledger or log it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3001,
///     "message": "persistence error: connection refused",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see table on [`IndexerError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum shared by clients, persistence and sync services.
///
/// # Error Code Ranges
///
/// | Range     | Category            | HTTP Status               |
/// |-----------|---------------------|---------------------------|
/// | 1000–1999 | Configuration/input | 400 Bad Request           |
/// | 2000–2999 | Not found           | 404 Not Found             |
/// | 3000–3999 | Internal            | 500 Internal Server Error |
/// | 5000–5999 | Upstream            | 502 Bad Gateway           |
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Invalid or missing configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested entity does not exist upstream or in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(String),

    /// Upstream answered with a non-success status.
    #[error("upstream returned {status} for {url}")]
    Upstream {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Response body or stored value could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A contract log could not be turned into a liquidity event.
    #[error("invalid contract log: {0}")]
    InvalidLog(String),

    /// A value required by the current operation is absent.
    #[error("missing data: {0}")]
    MissingData(String),

    /// The realtime channel received a message it does not understand.
    #[error("realtime protocol violation: {0}")]
    Protocol(String),

    /// Realtime connection failure (handshake, transport, liveness).
    #[error("realtime connection error: {0}")]
    Connection(String),

    /// Unrecoverable condition that must stop the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl IndexerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 1001,
            Self::NotFound(_) => 2001,
            Self::Persistence(_) => 3001,
            Self::Decode(_) => 3002,
            Self::InvalidLog(_) => 3003,
            Self::MissingData(_) => 3004,
            Self::Fatal(_) => 3000,
            Self::Http(_) => 5001,
            Self::Upstream { .. } => 5002,
            Self::Protocol(_) => 5003,
            Self::Connection(_) => 5004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_)
            | Self::Decode(_)
            | Self::InvalidLog(_)
            | Self::MissingData(_)
            | Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) | Self::Upstream { .. } | Self::Protocol(_) | Self::Connection(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Returns `true` if the upstream reported the entity as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Upstream { status: 404, .. })
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Upstream {
                status: status.as_u16(),
                url: e.url().map(ToString::to_string).unwrap_or_default(),
            };
        }
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl IntoResponse for IndexerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
