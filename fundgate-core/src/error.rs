//! Structured error types for the acquisition layer.
//!
//! These never cross the pipeline boundary: `FetchPipeline::fetch` turns every
//! failure into a breaker update and, ultimately, a stale or absent result.
//! They are still displayable so the CLI can print per-source diagnostics.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by vendor (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("{vendor} returned HTTP {status}")]
    HttpStatus { vendor: String, status: u16 },

    #[error("response schema changed: {0}")]
    Schema(String),

    #[error("unusable data: {0}")]
    Validation(String),

    #[error("source not configured: {0}")]
    Configuration(String),

    #[error("not covered by this source: {0}")]
    Unsupported(String),

    #[error("cache storage error: {0}")]
    Storage(String),
}

/// How heavily a failure counts against a source's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network faults, schema drift, vendor errors: one strike each.
    Hard,
    /// The vendor answered but the answer was unusable.
    Soft,
    /// The source does not cover this request. Not held against it.
    NotApplicable,
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::RateLimited { .. } => {
                true
            }
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Validation(_) => FailureKind::Soft,
            FetchError::Unsupported(_) => FailureKind::NotApplicable,
            _ => FailureKind::Hard,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            FetchError::Network(e.to_string())
        } else if e.is_decode() {
            FetchError::Schema(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::HttpStatus {
                vendor: e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for FetchError {
    fn from(e: rusqlite::Error) -> Self {
        FetchError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Schema(e.to_string())
    }
}
