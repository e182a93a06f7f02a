// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the provenance service.
//!
//! Every error carries an [`ErrorCode`] (a machine-readable, stable string
//! tag), a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`VeritasError::new`] to
//! construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request schema / size violations.
    Validation,
    /// API key / authentication failures.
    Auth,
    /// Rate-limit and spend-cap rejections.
    Admission,
    /// Consensus engine / provider failures.
    Detection,
    /// Analysis store and audit store persistence failures.
    Storage,
    /// Webhook delivery failures (never surfaced to clients).
    Webhook,
    /// Scheduler budget/kill-switch conditions (never surfaced to clients).
    Scheduler,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Admission => "admission",
            Self::Detection => "detection",
            Self::Storage => "storage",
            Self::Webhook => "webhook",
            Self::Scheduler => "scheduler",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases. These names mirror the
/// implementer-neutral error kinds of the provenance service's design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// Input schema violation (e.g. text length out of bounds).
    ValidationFailed,
    /// File/body exceeded the configured size limit.
    InputTooLarge,

    // -- Auth --
    /// Missing or invalid API key.
    Unauthenticated,

    // -- Admission --
    /// Per-bucket fixed-window request limit exceeded.
    RateLimited,
    /// Daily spend-point budget exhausted.
    SpendCapExceeded,

    // -- Detection --
    /// Internal detector hard-faulted; the call cannot produce a verdict.
    DetectorUnavailable,
    /// One or more external providers degraded; informational only, never
    /// surfaced as a request error.
    ProviderDegraded,

    // -- Storage --
    /// Requested `analysis_id` does not exist.
    NotFound,
    /// Durable write failed.
    PersistenceFailed,

    // -- Webhook (internal to the dispatcher; never returned to clients) --
    /// Delivery failed but attempts remain; the item stays queued.
    WebhookRetryable,
    /// Delivery exhausted its attempts and was dead-lettered.
    WebhookTerminal,

    // -- Scheduler (internal; logged, not surfaced) --
    /// Monthly request cap reached and the kill-switch is armed.
    SchedulerCapped,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationFailed | Self::InputTooLarge => ErrorCategory::Validation,

            Self::Unauthenticated => ErrorCategory::Auth,

            Self::RateLimited | Self::SpendCapExceeded => ErrorCategory::Admission,

            Self::DetectorUnavailable | Self::ProviderDegraded => ErrorCategory::Detection,

            Self::NotFound | Self::PersistenceFailed => ErrorCategory::Storage,

            Self::WebhookRetryable | Self::WebhookTerminal => ErrorCategory::Webhook,

            Self::SchedulerCapped => ErrorCategory::Scheduler,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// The HTTP status code this error maps to, for errors that are ever
    /// surfaced to a client. Internal-only codes (webhook/scheduler) return
    /// `500` as a placeholder; callers must not surface them directly.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationFailed => 422,
            Self::InputTooLarge => 413,
            Self::Unauthenticated => 401,
            Self::RateLimited | Self::SpendCapExceeded => 429,
            Self::DetectorUnavailable => 503,
            Self::ProviderDegraded => 200,
            Self::NotFound => 404,
            Self::PersistenceFailed => 500,
            Self::WebhookRetryable | Self::WebhookTerminal | Self::SchedulerCapped => 500,
            Self::Internal => 500,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"RATE_LIMITED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InputTooLarge => "INPUT_TOO_LARGE",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RateLimited => "RATE_LIMITED",
            Self::SpendCapExceeded => "SPEND_CAP_EXCEEDED",
            Self::DetectorUnavailable => "DETECTOR_UNAVAILABLE",
            Self::ProviderDegraded => "PROVIDER_DEGRADED",
            Self::NotFound => "NOT_FOUND",
            Self::PersistenceFailed => "PERSISTENCE_FAILED",
            Self::WebhookRetryable => "WEBHOOK_RETRYABLE",
            Self::WebhookTerminal => "WEBHOOK_TERMINAL",
            Self::SchedulerCapped => "SCHEDULER_CAPPED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VeritasError
// ---------------------------------------------------------------------------

/// Unified service error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use veritas_error::{VeritasError, ErrorCode};
///
/// let err = VeritasError::new(ErrorCode::RateLimited, "bucket exhausted")
///     .with_context("bucket", "text")
///     .with_context("retry_after_secs", 12);
/// ```
pub struct VeritasError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl VeritasError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl fmt::Debug for VeritasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("VeritasError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for VeritasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for VeritasError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`VeritasError`] (without the opaque source).
///
/// This is the shape embedded in the service's `{error, detail, status_code,
/// request_id, path}` HTTP error envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VeritasErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&VeritasError> for VeritasErrorDto {
    fn from(err: &VeritasError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<VeritasErrorDto> for VeritasError {
    fn from(dto: VeritasErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
