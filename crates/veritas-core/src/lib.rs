// SPDX-License-Identifier: MIT OR Apache-2.0
//! veritas-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the provenance service.
//!
//! Every other crate in this workspace depends on this one for its record
//! types: [`AnalysisRecord`], [`AuditEvent`], [`ConsensusVote`],
//! [`ScheduledJob`], [`SchedulerUsage`], [`WebhookItem`], and
//! [`DeadLetterEntry`]. None of these types embed I/O — persistence lives in
//! `veritas-store`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Current contract version embedded in analysis records and audit events.
pub const CONTRACT_VERSION: &str = "veritas/v1";

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize text content before hashing: trim surrounding whitespace and
/// collapse line endings to `\n`. This keeps `content_hash` stable across
/// trivial whitespace/CRLF differences in otherwise-identical submissions.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// Compute the `content_hash` for a text submission: SHA-256 of the
/// normalized text, lowercase hex.
#[must_use]
pub fn hash_text(text: &str) -> String {
    sha256_hex(normalize_text(text).as_bytes())
}

/// Compute the `content_hash` for binary media (image/audio/video): SHA-256
/// of the raw bytes as received.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

// ---------------------------------------------------------------------------
// ContentType / Source
// ---------------------------------------------------------------------------

/// The modality of submitted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text.
    Text,
    /// A still image.
    Image,
    /// An audio clip.
    Audio,
    /// A video clip.
    Video,
}

impl ContentType {
    /// Stable lowercase string representation, matching the `serde` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a detection request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// The public HTTP API.
    Api,
    /// The browser extension.
    Extension,
    /// A scheduled intelligence-collection job.
    Scheduled,
    /// A batch submission.
    Batch,
}

impl AnalysisSource {
    /// Stable lowercase string representation, matching the `serde` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Extension => "extension",
            Self::Scheduled => "scheduled",
            Self::Batch => "batch",
        }
    }
}

impl std::fmt::Display for AnalysisSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConsensusVote
// ---------------------------------------------------------------------------

/// Whether a provider probe succeeded, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// The probe returned a usable probability.
    Ok,
    /// The probe could not complete (timeout, transport error, disabled).
    Unavailable,
    /// The provider does not support this modality.
    Unsupported,
    /// The probe returned an explicit error.
    Error,
}

/// One provider's opinion on a single artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsensusVote {
    /// Provider name (`"internal"`, `"copyleaks"`, ...).
    pub provider: String,
    /// Probability in `[0, 1]`, absent when the provider did not produce one.
    pub probability: Option<f64>,
    /// Non-negative weight used in the weighted mean.
    pub weight: f64,
    /// Terminal status of the probe.
    pub status: ProviderStatus,
    /// Human-readable explanation (timeout detail, error message, etc.).
    pub rationale: String,
}

/// The aggregated outcome of a consensus call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsensusSummary {
    /// Final calibrated probability in `[0, 1]`.
    pub final_probability: f64,
    /// Decision threshold used for this modality.
    pub threshold: f64,
    /// `final_probability >= threshold`.
    pub is_ai_generated: bool,
    /// Weighted standard deviation of `ok` provider probabilities.
    pub disagreement: f64,
    /// Every provider probed, including failed ones.
    pub providers: Vec<ConsensusVote>,
}

// ---------------------------------------------------------------------------
// AnalysisRecord
// ---------------------------------------------------------------------------

/// One completed detection decision, persisted for audit and analytics.
///
/// # Invariants
/// - `analysis_id` is unique.
/// - `0.0 <= confidence <= 1.0`.
/// - `is_ai_generated == (confidence >= threshold_used)`.
/// - `content_hash` is immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisRecord {
    /// Server-assigned unique handle.
    pub analysis_id: Uuid,
    /// Modality of the analyzed content.
    pub content_type: ContentType,
    /// SHA-256 of the normalized input.
    pub content_hash: String,
    /// Final verdict.
    pub is_ai_generated: bool,
    /// Final calibrated probability in `[0, 1]`.
    pub confidence: f64,
    /// Dominant model family the content is attributed to, if known.
    pub model_prediction: Option<String>,
    /// Per-signal breakdown and consensus votes (opaque at this layer).
    pub result_payload: serde_json::Value,
    /// Where the request originated.
    pub source: AnalysisSource,
    /// Source URL, for scheduled/collected content.
    pub source_url: Option<String>,
    /// Original filename, for uploaded media.
    pub filename: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Returns `true` if `is_ai_generated` is consistent with `confidence`
    /// and the threshold that produced it.
    #[must_use]
    pub fn is_consistent(&self, threshold_used: f64) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && self.is_ai_generated == (self.confidence >= threshold_used)
    }
}

/// Builder for constructing [`AnalysisRecord`]s ergonomically.
///
/// # Examples
///
/// ```
/// use veritas_core::{AnalysisRecordBuilder, ContentType, AnalysisSource};
///
/// let record = AnalysisRecordBuilder::new(ContentType::Text, "deadbeef")
///     .source(AnalysisSource::Api)
///     .confidence(0.83, 0.5)
///     .build();
///
/// assert!(record.is_ai_generated);
/// assert_eq!(record.content_hash, "deadbeef");
/// ```
#[derive(Debug)]
pub struct AnalysisRecordBuilder {
    content_type: ContentType,
    content_hash: String,
    is_ai_generated: bool,
    confidence: f64,
    model_prediction: Option<String>,
    result_payload: serde_json::Value,
    source: AnalysisSource,
    source_url: Option<String>,
    filename: Option<String>,
}

impl AnalysisRecordBuilder {
    /// Create a new builder for the given modality and content hash.
    #[must_use]
    pub fn new(content_type: ContentType, content_hash: impl Into<String>) -> Self {
        Self {
            content_type,
            content_hash: content_hash.into(),
            is_ai_generated: false,
            confidence: 0.0,
            model_prediction: None,
            result_payload: serde_json::json!({}),
            source: AnalysisSource::Api,
            source_url: None,
            filename: None,
        }
    }

    /// Set the final confidence and derive `is_ai_generated` from `threshold`.
    #[must_use]
    pub fn confidence(mut self, confidence: f64, threshold: f64) -> Self {
        self.confidence = confidence;
        self.is_ai_generated = confidence >= threshold;
        self
    }

    /// Set the dominant model prediction.
    #[must_use]
    pub fn model_prediction(mut self, model: impl Into<String>) -> Self {
        self.model_prediction = Some(model.into());
        self
    }

    /// Set the opaque result payload (signals + consensus votes).
    #[must_use]
    pub fn result_payload(mut self, payload: serde_json::Value) -> Self {
        self.result_payload = payload;
        self
    }

    /// Set the originating source.
    #[must_use]
    pub fn source(mut self, source: AnalysisSource) -> Self {
        self.source = source;
        self
    }

    /// Set the source URL.
    #[must_use]
    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Set the original filename.
    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Consume the builder and produce an [`AnalysisRecord`].
    #[must_use]
    pub fn build(self) -> AnalysisRecord {
        AnalysisRecord {
            analysis_id: Uuid::new_v4(),
            content_type: self.content_type,
            content_hash: self.content_hash,
            is_ai_generated: self.is_ai_generated,
            confidence: self.confidence,
            model_prediction: self.model_prediction,
            result_payload: self.result_payload,
            source: self.source,
            source_url: self.source_url,
            filename: self.filename,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// Severity of an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine, informational.
    Info,
    /// Worth a human's attention but not actionable on its own.
    Warning,
    /// A failure occurred.
    Error,
}

/// An append-only record of a notable action taken by any component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Dotted event kind, e.g. `"detection.completed"`, `"scheduler.run"`.
    pub event_type: String,
    /// Severity of the event.
    pub severity: Severity,
    /// Identifier of the actor that triggered this event, if known.
    pub actor_id: Option<String>,
    /// Correlation identifier for the originating request, if any.
    pub request_id: Option<String>,
    /// Arbitrary structured payload.
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Construct a new event with the current timestamp and a fresh ID.
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            severity,
            actor_id: None,
            request_id: None,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    /// Attach an actor identifier.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attach a request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Scheduler records
// ---------------------------------------------------------------------------

/// A recurring intelligence-collection task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScheduledJob {
    /// Target identifier (e.g. a social account handle).
    pub handle: String,
    /// How often the job is dispatched.
    pub interval_seconds: u64,
    /// How many days of history to collect per run.
    pub window_days: u32,
    /// Maximum number of posts to collect per run.
    pub max_posts: u32,
    /// Optional search query scoping the collection.
    pub query: Option<String>,
}

impl ScheduledJob {
    /// Estimate the number of external requests one run of this job will
    /// consume, per `window_days x max_posts / page_cap` (rounded up).
    #[must_use]
    pub fn requests_estimate(&self, page_cap: u32) -> u64 {
        let page_cap = page_cap.max(1) as u64;
        let posts_total = self.window_days as u64 * self.max_posts as u64;
        posts_total.div_ceil(page_cap)
    }
}

/// Persistent month-scoped usage counter for the scheduler's monthly cap.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchedulerUsage {
    /// `YYYY-MM` key for the month this counter tracks.
    pub month_key: String,
    /// Monotonically increasing count of external requests this month.
    pub requests_used: u64,
    /// Whether the kill-switch is armed (blocks further work once capped).
    pub kill_switch_armed: bool,
}

impl SchedulerUsage {
    /// Construct a fresh usage record for `month_key` with the kill-switch
    /// armed and no usage.
    #[must_use]
    pub fn new(month_key: impl Into<String>) -> Self {
        Self {
            month_key: month_key.into(),
            requests_used: 0,
            kill_switch_armed: true,
        }
    }

    /// Reset usage for a new month, re-arming the kill-switch.
    pub fn roll_over(&mut self, new_month_key: impl Into<String>) {
        self.month_key = new_month_key.into();
        self.requests_used = 0;
        self.kill_switch_armed = true;
    }

    /// Returns `true` if starting a run costing `estimate` more requests
    /// would exceed `monthly_cap`.
    #[must_use]
    pub fn would_exceed(&self, estimate: u64, monthly_cap: u64) -> bool {
        self.requests_used + estimate > monthly_cap
    }

    /// Returns `true` if the kill-switch should halt all work right now.
    #[must_use]
    pub fn is_capped(&self, monthly_cap: u64) -> bool {
        self.kill_switch_armed && self.requests_used >= monthly_cap
    }
}

// ---------------------------------------------------------------------------
// Webhook records
// ---------------------------------------------------------------------------

/// A durable retry record for at-least-once webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebhookItem {
    /// Monotonically increasing delivery sequence number (idempotency key).
    pub sequence: u64,
    /// Destination URL.
    pub url: String,
    /// Serialized JSON payload to deliver.
    pub payload_bytes: Vec<u8>,
    /// Number of delivery attempts made so far.
    pub attempts: u32,
    /// Earliest time the next attempt may occur.
    pub next_attempt_at: DateTime<Utc>,
    /// When the first failure was observed, if any.
    pub first_failed_at: Option<DateTime<Utc>>,
    /// The most recent delivery error, if any.
    pub last_error: Option<String>,
}

/// An append-only record of a delivery that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeadLetterEntry {
    /// Destination URL that could not be delivered to.
    pub url: String,
    /// SHA-256 hex digest of the payload, for correlation without storing
    /// the raw bytes twice.
    pub payload_digest: String,
    /// Final delivery error.
    pub final_error: String,
    /// Total attempts made before giving up.
    pub total_attempts: u32,
    /// When the first attempt was made.
    pub first_attempted_at: DateTime<Utc>,
    /// When the item was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_text_trims_and_normalizes_line_endings() {
        let a = hash_text("hello world");
        let b = hash_text("  hello world  ");
        let c = hash_text("hello world but different");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_bytes_is_deterministic() {
        let data = b"some media bytes";
        assert_eq!(hash_bytes(data), hash_bytes(data));
        assert_eq!(hash_bytes(data).len(), 64);
    }

    #[test]
    fn analysis_record_builder_derives_verdict() {
        let record = AnalysisRecordBuilder::new(ContentType::Text, "deadbeef")
            .source(AnalysisSource::Api)
            .confidence(0.83, 0.5)
            .build();
        assert!(record.is_ai_generated);
        assert!(record.is_consistent(0.5));
    }

    #[test]
    fn analysis_record_builder_below_threshold() {
        let record = AnalysisRecordBuilder::new(ContentType::Image, "cafebabe")
            .confidence(0.2, 0.5)
            .build();
        assert!(!record.is_ai_generated);
        assert!(record.is_consistent(0.5));
    }

    #[test]
    fn scheduler_usage_roll_over_resets_and_rearms() {
        let mut usage = SchedulerUsage::new("2026-06");
        usage.requests_used = 40;
        usage.kill_switch_armed = false;
        usage.roll_over("2026-07");
        assert_eq!(usage.month_key, "2026-07");
        assert_eq!(usage.requests_used, 0);
        assert!(usage.kill_switch_armed);
    }

    #[test]
    fn scheduler_usage_would_exceed() {
        let mut usage = SchedulerUsage::new("2026-07");
        usage.requests_used = 40;
        assert!(usage.would_exceed(20, 50));
        assert!(!usage.would_exceed(10, 50));
    }

    #[test]
    fn scheduled_job_requests_estimate_rounds_up() {
        let job = ScheduledJob {
            handle: "acct".into(),
            interval_seconds: 3600,
            window_days: 7,
            max_posts: 100,
            query: None,
        };
        // 700 posts / page_cap 30 -> 24 pages (ceil).
        assert_eq!(job.requests_estimate(30), 24);
    }

    #[test]
    fn content_type_display_matches_serde_tag() {
        assert_eq!(ContentType::Text.to_string(), "text");
        assert_eq!(ContentType::Video.to_string(), "video");
    }

    #[test]
    fn audit_event_builder_chains() {
        let event = AuditEvent::new("detection.completed", Severity::Info)
            .with_actor("client-1")
            .with_request_id("req-1")
            .with_payload(serde_json::json!({"analysis_id": "x"}));
        assert_eq!(event.event_type, "detection.completed");
        assert_eq!(event.actor_id.as_deref(), Some("client-1"));
        assert_eq!(event.request_id.as_deref(), Some("req-1"));
    }
}
