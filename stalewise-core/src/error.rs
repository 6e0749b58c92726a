//! Error types for stalewise operations

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Server error code carried by validation failures.
pub const VALIDATION_FAILED_CODE: &str = "validation_failed";

/// Well-known classes of HTTP failures returned by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// 400, usually a form validation failure.
    BadRequest,
    /// 401, the session is missing or expired.
    Unauthorized,
    /// 500, the server failed in an unexpected way.
    Unexpected,
    /// Any other non-success status.
    Other,
}

/// Non-success HTTP response surfaced by a transport.
///
/// The payload is the parsed response body when the server sent JSON,
/// typically `{ "code": "...", "detail": ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    pub status: u16,
    pub payload: Option<Value>,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn with_payload(status: u16, payload: Value) -> Self {
        Self {
            status,
            payload: Some(payload),
        }
    }

    pub fn kind(&self) -> HttpErrorKind {
        match self.status {
            400 => HttpErrorKind::BadRequest,
            401 => HttpErrorKind::Unauthorized,
            500 => HttpErrorKind::Unexpected,
            _ => HttpErrorKind::Other,
        }
    }

    /// Application error code from the payload, if any.
    pub fn code(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("code"))
            .and_then(Value::as_str)
    }

    pub fn is_validation_error(&self) -> bool {
        self.kind() == HttpErrorKind::BadRequest && self.code() == Some(VALIDATION_FAILED_CODE)
    }

    /// Per-field error codes of a validation failure.
    ///
    /// Fields whose detail carries no code map to `None`.
    pub fn fields(&self) -> BTreeMap<String, Option<String>> {
        let Some(detail) = self
            .payload
            .as_ref()
            .and_then(|payload| payload.get("detail"))
            .and_then(Value::as_object)
        else {
            return BTreeMap::new();
        };

        detail
            .iter()
            .map(|(name, err)| {
                let code = err.get("code").and_then(Value::as_str).map(str::to_string);
                (name.clone(), code)
            })
            .collect()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} (HTTP {})", code, self.status),
            None => write!(f, "HTTP Error {}", self.status),
        }
    }
}

impl std::error::Error for HttpError {}

/// Failures of a fetch, shared by the direct caller and every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Failed to decode response for {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Failed to encode request body for {url}: {reason}")]
    Encode { url: String, reason: String },

    #[error("Fetch for {key} was cancelled before it settled")]
    Cancelled { key: String },
}

impl FetchError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// The HTTP status when the failure came from the server.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) => Some(err.status),
            _ => None,
        }
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Query parameter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Query parameters must serialize to a map, got {found}")]
    NotAMap { found: String },

    #[error("Failed to serialize query parameters: {reason}")]
    Serialize { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all stalewise errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StalewiseError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Params error: {0}")]
    Params(#[from] ParamsError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for stalewise operations.
pub type StalewiseResult<T> = Result<T, StalewiseError>;

/// Result of a single fetch.
pub type FetchResult<T> = Result<T, FetchError>;

// =============================================================================
// TESTS
// =============================================================================
