// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types for the provenance service's HTTP API: request bodies,
//! response shapes, and the `{error, detail, status_code, request_id, path}`
//! error envelope every 4xx/5xx response carries.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use veritas_core::{ConsensusSummary, ConsensusVote};
use veritas_error::VeritasError;

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// An HTTP-facing error, built from a [`VeritasError`] plus the request
/// context (`request_id`, `path`) that only the handler layer knows about.
#[derive(Debug)]
pub struct ApiError {
    inner: VeritasError,
    request_id: String,
    path: String,
}

impl ApiError {
    /// Attach request context to a [`VeritasError`], producing a response
    /// body shaped like the service's error envelope.
    pub fn new(inner: VeritasError, request_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
            path: path.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self
            .inner
            .context
            .get("retry_after_seconds")
            .and_then(|v| v.as_u64());

        let body = Json(json!({
            "error": self.inner.code.as_str(),
            "detail": self.inner.message,
            "status_code": status.as_u16(),
            "request_id": self.request_id,
            "path": self.path,
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Body of `POST /detect/text`.
#[derive(Debug, Deserialize)]
pub struct TextDetectRequest {
    /// Submitted text, `50 <= len <= 50000` characters.
    pub text: String,
}

/// One vote in a `DetectionResponse.consensus.providers[]` list.
#[derive(Debug, Serialize)]
pub struct ProviderVoteDto {
    /// Provider name.
    pub provider: String,
    /// Probability in `[0, 1]`, absent when the provider produced none.
    pub probability: Option<f64>,
    /// Weight contributed to the weighted mean.
    pub weight: f64,
    /// Terminal probe status, lowercase (`"ok"`, `"unavailable"`, ...).
    pub status: &'static str,
    /// Human-readable rationale.
    pub rationale: String,
}

impl From<&ConsensusVote> for ProviderVoteDto {
    fn from(vote: &ConsensusVote) -> Self {
        Self {
            provider: vote.provider.clone(),
            probability: vote.probability,
            weight: vote.weight,
            status: match vote.status {
                veritas_core::ProviderStatus::Ok => "ok",
                veritas_core::ProviderStatus::Unavailable => "unavailable",
                veritas_core::ProviderStatus::Unsupported => "unsupported",
                veritas_core::ProviderStatus::Error => "error",
            },
            rationale: vote.rationale.clone(),
        }
    }
}

/// `DetectionResponse.consensus`.
#[derive(Debug, Serialize)]
pub struct ConsensusDto {
    /// Final calibrated probability in `[0, 1]`.
    pub final_probability: f64,
    /// Decision threshold applied for this modality.
    pub threshold: f64,
    /// `final_probability >= threshold`.
    pub is_ai_generated: bool,
    /// Weighted standard deviation of `ok` provider probabilities.
    pub disagreement: f64,
    /// Every provider probed, including failed ones.
    pub providers: Vec<ProviderVoteDto>,
}

impl From<&ConsensusSummary> for ConsensusDto {
    fn from(summary: &ConsensusSummary) -> Self {
        Self {
            final_probability: summary.final_probability,
            threshold: summary.threshold,
            is_ai_generated: summary.is_ai_generated,
            disagreement: summary.disagreement,
            providers: summary.providers.iter().map(ProviderVoteDto::from).collect(),
        }
    }
}

/// Response for every `/detect/*` endpoint.
#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    /// Server-assigned analysis handle.
    pub analysis_id: Uuid,
    /// Final verdict.
    pub is_ai_generated: bool,
    /// Final calibrated probability in `[0, 1]`.
    pub confidence: f64,
    /// Dominant model family attributed, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_prediction: Option<String>,
    /// Modality-specific signal breakdown (opaque at this layer).
    pub analysis: serde_json::Value,
    /// Human-readable explanation of the verdict.
    pub explanation: String,
    /// Wall-clock time spent producing this response, in milliseconds.
    pub processing_time_ms: u64,
    /// Consensus breakdown, present whenever the consensus engine ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusDto>,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One item in a `POST /batch/text` request.
#[derive(Debug, Deserialize)]
pub struct BatchTextItem {
    /// Caller-supplied identifier, echoed back in the response.
    pub item_id: String,
    /// Submitted text for this item.
    pub text: String,
}

/// Body of `POST /batch/text`.
#[derive(Debug, Deserialize)]
pub struct BatchTextRequest {
    /// Items to analyze, at most [`crate::validation::MAX_BATCH_ITEMS`].
    pub items: Vec<BatchTextItem>,
    /// Whether to stop processing remaining items after the first failure.
    #[serde(default)]
    pub stop_on_error: bool,
}

/// Outcome of one item within a `BatchResponse`.
#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    /// The item's caller-supplied identifier.
    pub item_id: String,
    /// `true` if this item was analyzed successfully.
    pub ok: bool,
    /// The detection result, present when `ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DetectionResponse>,
    /// The failure detail, present when not `ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `POST /batch/text`.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// Per-item outcomes, in submission order (a prefix, if `stop_on_error`
    /// halted processing early).
    pub items: Vec<BatchItemResult>,
    /// Number of items successfully analyzed.
    pub succeeded: usize,
    /// Number of items that failed.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// History / Dashboard
// ---------------------------------------------------------------------------

/// Query parameters for `GET /analyze/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum rows to return.
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    /// Rows to skip before `limit` is applied.
    #[serde(default)]
    pub offset: u32,
    /// Restrict to one content modality.
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_history_limit() -> u32 {
    50
}

/// One row in a `HistoryResponse`.
#[derive(Debug, Serialize)]
pub struct HistoryItem {
    /// The analysis handle.
    pub analysis_id: Uuid,
    /// Modality of the analyzed content.
    pub content_type: &'static str,
    /// Final verdict.
    pub is_ai_generated: bool,
    /// Final calibrated probability in `[0, 1]`.
    pub confidence: f64,
    /// Dominant model prediction, if known.
    pub model_prediction: Option<String>,
    /// Where the request originated.
    pub source: &'static str,
    /// Creation timestamp, RFC 3339.
    pub created_at: String,
}

impl From<&veritas_core::AnalysisRecord> for HistoryItem {
    fn from(r: &veritas_core::AnalysisRecord) -> Self {
        Self {
            analysis_id: r.analysis_id,
            content_type: r.content_type.as_str(),
            is_ai_generated: r.is_ai_generated,
            confidence: r.confidence,
            model_prediction: r.model_prediction.clone(),
            source: r.source.as_str(),
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

/// Response for `GET /analyze/history`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// The page of matching records.
    pub items: Vec<HistoryItem>,
    /// Total matching records, independent of `limit`/`offset`.
    pub total: u64,
    /// Echoed paging parameters.
    pub limit: u32,
    /// Echoed paging parameters.
    pub offset: u32,
}

/// Query parameters for `GET /analyze/dashboard`.
#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    /// Window size in days, `1..=90`.
    #[serde(default = "default_dashboard_days")]
    pub days: u32,
}

fn default_dashboard_days() -> u32 {
    7
}

/// Response for `GET /analyze/dashboard`.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    /// Aggregated analytics over the requested window.
    pub summary: veritas_store::DashboardSummary,
}

// ---------------------------------------------------------------------------
// Intel estimate
// ---------------------------------------------------------------------------

/// Body of `POST /intel/x/collect/estimate`.
#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    /// How many days of history the hypothetical job would collect.
    pub window_days: u32,
    /// Maximum posts the hypothetical job would collect.
    pub max_posts: u32,
    /// Maximum posts fetched from one page, overriding the configured
    /// default when present.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

/// Response for `POST /intel/x/collect/estimate`.
#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    /// Estimated external requests one run of this job would consume.
    pub requests_estimate: u64,
    /// Whether this estimate would fit within the remaining monthly budget
    /// if the job were registered right now.
    pub fits_monthly_budget: bool,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Response for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: &'static str,
    /// Present only when `?deep=true` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<HealthChecks>,
}

/// Deep health-check detail.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// `"ok"` or an error detail string.
    pub db: String,
    /// `"ok"` — rate-limit/spend state is always in-process in this build.
    pub cache: String,
}
