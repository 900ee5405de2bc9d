//! Error types for bqclient.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad input, schema mismatch, 4xx from the service)
//! - I^B materialized: Infrastructure failures (network, timeout, 5xx)
//! - K_i violated: Internal invariant violations (bugs)

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Top-level error type for bqclient.
#[derive(Debug, Error)]
pub enum BqError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED: Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("BigQuery API error: {0}")]
    Api(#[from] ApiError),

    #[error("Row insertion failed: {0}")]
    Insert(#[from] PutMultiError),

    #[error("Job {job_id} failed: {detail}")]
    JobFailed { job_id: String, detail: ErrorDetail },

    #[error("Unexpected result: {0}")]
    Unexpected(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED: Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Job {job_id} still running after {attempts} polls")]
    PollExhausted { job_id: String, attempts: u32 },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED: Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error reported by the service in a non-2xx response.
///
/// Mirrors the Google API error envelope:
/// `{"error": {"code": 409, "message": "...", "status": "ALREADY_EXISTS", "errors": [...]}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Top-level message (or the raw body when it was not JSON)
    pub message: String,
    /// Canonical status name, e.g. "ALREADY_EXISTS"
    pub reason: Option<String>,
    /// Detailed per-cause errors
    pub errors: Vec<ErrorDetail>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

impl ApiError {
    /// Build an error from a response status and body.
    ///
    /// Falls back to the raw body as the message when it is not a Google error envelope.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                status: envelope.error.code.unwrap_or(status),
                message: envelope.error.message,
                reason: envelope.error.status,
                errors: envelope.error.errors,
            },
            Err(_) => Self {
                status,
                message: body.trim().to_string(),
                reason: None,
                errors: Vec::new(),
            },
        }
    }
}

/// A single error cause, as used in API errors, job status and insert errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Short machine-readable code, e.g. "invalid", "duplicate", "notFound"
    #[serde(default)]
    pub reason: String,
    /// Where the error occurred (field name, query position), if known
    #[serde(default)]
    pub location: Option<String>,
    /// Human-readable description
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}: {}", self.reason, self.message),
            None => write!(f, "{}: {}", self.reason, self.message),
        }
    }
}

/// Failure of a single row in an `insertAll` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInsertionError {
    /// Index of the row in the slice passed to `Uploader::put`
    pub row_index: usize,
    /// Insert ID of the row, if it had one
    pub insert_id: Option<String>,
    pub errors: Vec<ErrorDetail>,
}

/// Per-row failures reported by the service for a streaming insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutMultiError(pub Vec<RowInsertionError>);

impl fmt::Display for PutMultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "0 row insertion failures"),
            [only] => write!(
                f,
                "1 row insertion failure (row {}: {})",
                only.row_index,
                only.errors
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
            rows => write!(f, "{} row insertion failures", rows.len()),
        }
    }
}

impl std::error::Error for PutMultiError {}

impl BqError {
    /// Check whether this error carries the given HTTP status code.
    pub fn has_status(&self, code: u16) -> bool {
        matches!(self, Self::Api(api) if api.status == code)
    }

    /// The resource already exists (HTTP 409).
    pub fn is_already_exists(&self) -> bool {
        self.has_status(409)
    }

    /// The resource does not exist (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        self.has_status(404)
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Api(api) => is_retryable_status(api.status),
            _ => false,
        }
    }
}

/// HTTP statuses worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for bqclient.
pub type Result<T> = std::result::Result<T, BqError>;
