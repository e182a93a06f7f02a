// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The provenance service's composition root and HTTP control plane.
//!
//! [`Core`] owns every long-lived component — store, consensus engine,
//! rate-limit guard, audit pipeline, webhook dispatcher, and scheduler —
//! as a single struct every HTTP handler closes over behind an `Arc`.
//! [`build_app`] wires `Arc<Core>` into an `axum` router; [`Core::new`]
//! wires the components themselves together, returning the two background
//! task handles (`SchedulerHandle`, `DispatcherHandle`) separately, since
//! they are consumed by value at shutdown and `Core` itself is shared
//! behind an `Arc`.

pub mod api;
pub mod middleware;
pub mod validation;

use api::{
    ApiError, BatchResponse, BatchItemResult, ConsensusDto, DashboardQuery, DashboardResponse,
    DetectionResponse, EstimateRequest, EstimateResponse, HealthChecks, HealthResponse,
    HistoryItem, HistoryQuery, HistoryResponse, TextDetectRequest,
};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Extension, Multipart, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use middleware::RequestId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use veritas_audit::AuditPipeline;
use veritas_config::AppConfig;
use veritas_consensus::ConsensusEngine;
use veritas_core::{
    AnalysisRecordBuilder, AnalysisSource, AuditEvent, ConsensusSummary, ContentType,
    ProviderStatus, ScheduledJob, Severity,
};
use veritas_error::{ErrorCode, VeritasError};
use veritas_providers::{Artifact, build_providers};
use veritas_ratelimit::{Guard, RejectReason};
use veritas_scheduler::{JobRunner, Scheduler, SchedulerHandle};
use veritas_store::{DashboardSummary, ListFilter, Store};
use veritas_webhook::{Dispatcher, DispatcherHandle};

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// The single composition root: every component the HTTP handlers touch.
pub struct Core {
    store: Store,
    consensus: Arc<ConsensusEngine>,
    ratelimit: Arc<Guard>,
    audit: Arc<AuditPipeline>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    config: AppConfig,
}

impl Core {
    /// Build every component from `config` and return the composition root
    /// alongside the two background task handles that own the webhook
    /// drain loop and the scheduler tick loop. Callers (normally
    /// `main.rs`) are responsible for calling `shutdown()` on both handles
    /// during graceful termination.
    pub async fn new(config: AppConfig) -> Result<(Arc<Self>, SchedulerHandle, DispatcherHandle), VeritasError> {
        let store = Store::connect(&config.database_url).await?;
        let audit = Arc::new(AuditPipeline::new(store.clone(), config.audit.ring_buffer_capacity));

        let providers = build_providers(&config.providers);
        let consensus = Arc::new(ConsensusEngine::new(
            providers,
            Duration::from_secs(config.provider_timeout_seconds.max(1)),
            config.threshold.clone(),
        ));

        let ratelimit = Arc::new(Guard::new(&config));

        let dispatcher = Arc::new(Dispatcher::new(&config.webhook, Arc::clone(&audit)).await?);
        let webhook_handle = DispatcherHandle::spawn(
            Arc::clone(&dispatcher),
            Duration::from_secs(config.webhook.base_backoff_seconds.max(1)),
        );

        let dedup_window = chrono::Duration::seconds(config.analysis_dedup_window_seconds as i64);
        let runner: Arc<dyn JobRunner> = Arc::new(SchedulerRunner {
            store: store.clone(),
            consensus: Arc::clone(&consensus),
            dispatcher: Arc::clone(&dispatcher),
            dedup_window,
        });

        let jobs: Vec<ScheduledJob> = config
            .scheduler
            .handles
            .iter()
            .map(|h| ScheduledJob {
                handle: h.handle.clone(),
                interval_seconds: h.interval_seconds,
                window_days: h.window_days,
                max_posts: h.max_posts,
                query: h.query.clone(),
            })
            .collect();

        let scheduler = Arc::new(
            Scheduler::new(
                &config.scheduler,
                PathBuf::from("scheduler_usage.json"),
                jobs,
                Arc::clone(&audit),
                runner,
            )
            .await?,
        );
        let scheduler_handle = if config.scheduler.enabled {
            SchedulerHandle::spawn(
                Arc::clone(&scheduler),
                Duration::from_secs(config.scheduler.tick_interval_seconds.max(1)),
            )
        } else {
            SchedulerHandle::disabled()
        };

        let core = Arc::new(Self {
            store,
            consensus,
            ratelimit,
            audit,
            dispatcher,
            scheduler,
            config,
        });

        Ok((core, scheduler_handle, webhook_handle))
    }

    fn authenticate(&self, ctx: &RequestContext) -> Result<(), ApiError> {
        if !self.config.require_api_key {
            return Ok(());
        }
        if self.config.api_keys.iter().any(|k| k == &ctx.client_id) {
            return Ok(());
        }
        Err(ctx.error(VeritasError::new(
            ErrorCode::Unauthenticated,
            "missing or invalid X-API-Key",
        )))
    }

    async fn authorize(&self, ctx: &RequestContext, bucket: &str, cost_points: u64) -> Result<(), ApiError> {
        let decision = self
            .ratelimit
            .authorize_with_cost(&ctx.client_id, bucket, cost_points, Utc::now())
            .await;
        if decision.allowed {
            return Ok(());
        }
        let (code, message) = match decision.reason {
            Some(RejectReason::RateLimited) => (ErrorCode::RateLimited, "rate limit exceeded for this bucket"),
            Some(RejectReason::SpendCapExceeded) => (ErrorCode::SpendCapExceeded, "daily spend cap exceeded"),
            None => (ErrorCode::Internal, "rate limiter rejected without a reason"),
        };
        let mut err = VeritasError::new(code, message);
        if let Some(secs) = decision.retry_after_seconds {
            err = err.with_context("retry_after_seconds", secs);
        }
        Err(ctx.error(err))
    }
}

/// Per-operation spend cost, per the rate-limit cost table: `{text: 1,
/// image: 3, audio: 4, video: 6, batch: 5, intel: 8}`.
fn operation_cost(content_type: ContentType) -> u64 {
    match content_type {
        ContentType::Text => 1,
        ContentType::Image => 3,
        ContentType::Audio => 4,
        ContentType::Video => 6,
    }
}

/// Rate-limit bucket an operation is admitted against. `image`/`audio`/
/// `video` all share the `media` bucket; their distinct costs still come
/// from [`operation_cost`].
fn operation_bucket(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Text => "text",
        ContentType::Image | ContentType::Audio | ContentType::Video => "media",
    }
}

// ---------------------------------------------------------------------------
// Scheduler job runner
// ---------------------------------------------------------------------------

/// Implements [`JobRunner`] for the scheduler: collection (an external
/// collaborator per spec, stubbed here as a synthetic report naming the
/// job's target) → consensus scoring via the always-available internal
/// detector → `AnalysisStore.put` → webhook enqueue.
struct SchedulerRunner {
    store: Store,
    consensus: Arc<ConsensusEngine>,
    dispatcher: Arc<Dispatcher>,
    dedup_window: chrono::Duration,
}

#[async_trait]
impl JobRunner for SchedulerRunner {
    async fn run_job(&self, job: &ScheduledJob) -> Result<serde_json::Value, VeritasError> {
        let report_text = format!(
            "collected intelligence report for handle '{}' covering {} day(s), up to {} posts{}",
            job.handle,
            job.window_days,
            job.max_posts,
            job.query
                .as_deref()
                .map(|q| format!(" matching query '{q}'"))
                .unwrap_or_default(),
        );
        let content_hash = veritas_core::hash_text(&report_text);

        let summary = self
            .consensus
            .score(ContentType::Text, Artifact::Text(&report_text))
            .await?;

        let record = AnalysisRecordBuilder::new(ContentType::Text, content_hash)
            .source(AnalysisSource::Scheduled)
            .source_url(format!("https://x.com/{}", job.handle))
            .confidence(summary.final_probability, summary.threshold)
            .result_payload(serde_json::json!({ "signals": {}, "votes": summary.providers }))
            .build();

        let analysis_id = self.store.put(&record, self.dedup_window).await?;

        let payload = serde_json::json!({
            "event": "scheduled_collection.completed",
            "handle": job.handle,
            "analysis_id": analysis_id,
            "is_ai_generated": record.is_ai_generated,
            "confidence": record.confidence,
        });
        self.dispatcher.enqueue_event(&payload).await?;

        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// Per-request identity and correlation data extracted from headers and the
/// [`RequestId`] middleware, threaded through handlers so [`ApiError`]s carry
/// consistent `request_id`/`path` fields.
struct RequestContext {
    request_id: String,
    path: &'static str,
    client_id: String,
    actor_id: Option<String>,
}

impl RequestContext {
    fn extract(headers: &HeaderMap, request_id: RequestId, path: &'static str) -> Self {
        let client_id = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();
        let actor_id = headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            request_id: request_id.0.to_string(),
            path,
            client_id,
            actor_id,
        }
    }

    fn error(&self, err: VeritasError) -> ApiError {
        ApiError::new(err, self.request_id.clone(), self.path.to_string())
    }
}

// ---------------------------------------------------------------------------
// Shared detection path
// ---------------------------------------------------------------------------

/// Score `artifact`, persist the resulting record, emit the completion
/// audit event, and enqueue a webhook notification — the request → rate-
/// limit → consensus → store → audit → webhook enqueue path common to every
/// `/detect/*` and `/batch/text` item.
async fn run_detection(
    core: &Core,
    ctx: &RequestContext,
    content_type: ContentType,
    artifact: Artifact<'_>,
    content_hash: String,
    source: AnalysisSource,
    filename: Option<String>,
) -> Result<DetectionResponse, VeritasError> {
    let start = Instant::now();

    let summary = core.consensus.score(content_type, artifact).await?;

    let mut builder = AnalysisRecordBuilder::new(content_type, content_hash)
        .source(source)
        .confidence(summary.final_probability, summary.threshold)
        .result_payload(serde_json::json!({ "signals": {}, "votes": summary.providers }));
    if let Some(name) = filename {
        builder = builder.filename(name);
    }
    let record = builder.build();

    let dedup_window = chrono::Duration::seconds(core.config.analysis_dedup_window_seconds as i64);
    let analysis_id = core.store.put(&record, dedup_window).await?;
    let record = if analysis_id == record.analysis_id {
        record
    } else {
        core.store
            .get_analysis(analysis_id)
            .await?
            .unwrap_or(record)
    };

    core.audit
        .emit(
            AuditEvent::new("detection.completed", Severity::Info)
                .with_request_id(ctx.request_id.clone())
                .with_payload(serde_json::json!({
                    "analysis_id": analysis_id,
                    "content_type": content_type.as_str(),
                    "is_ai_generated": record.is_ai_generated,
                }))
                .with_actor(ctx.actor_id.clone().unwrap_or_else(|| ctx.client_id.clone())),
        )
        .await;

    if let Err(err) = core
        .dispatcher
        .enqueue_event(&serde_json::json!({
            "event": "detection.completed",
            "analysis_id": analysis_id,
            "content_type": content_type.as_str(),
            "is_ai_generated": record.is_ai_generated,
            "confidence": record.confidence,
        }))
        .await
    {
        tracing::warn!(error = %err, "failed to enqueue detection webhook event");
    }

    Ok(DetectionResponse {
        analysis_id,
        is_ai_generated: record.is_ai_generated,
        confidence: record.confidence,
        model_prediction: record.model_prediction,
        analysis: serde_json::json!({}),
        explanation: explain(&summary),
        processing_time_ms: start.elapsed().as_millis() as u64,
        consensus: Some(ConsensusDto::from(&summary)),
    })
}

fn explain(summary: &ConsensusSummary) -> String {
    let ok_count = summary
        .providers
        .iter()
        .filter(|v| v.status == ProviderStatus::Ok)
        .count();
    format!(
        "{ok_count} provider(s) evaluated; final probability {:.3} against a threshold of {:.2} ({}).",
        summary.final_probability,
        summary.threshold,
        if summary.is_ai_generated {
            "flagged as AI-generated"
        } else {
            "not flagged"
        },
    )
}

fn parse_content_type(s: &str) -> Result<ContentType, VeritasError> {
    match s {
        "text" => Ok(ContentType::Text),
        "image" => Ok(ContentType::Image),
        "audio" => Ok(ContentType::Audio),
        "video" => Ok(ContentType::Video),
        other => Err(VeritasError::new(
            ErrorCode::ValidationFailed,
            format!("unknown content_type '{other}'"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the Axum router with every daemon route, the request-id and
/// request-logging middleware, and a CORS layer.
pub fn build_app(core: Arc<Core>) -> Router {
    Router::new()
        .route("/detect/text", post(detect_text))
        .route("/detect/image", post(detect_image))
        .route("/detect/audio", post(detect_audio))
        .route("/detect/video", post(detect_video))
        .route("/batch/text", post(batch_text))
        .route("/analyze/history", get(analyze_history))
        .route("/analyze/dashboard", get(analyze_dashboard))
        .route("/intel/x/collect/estimate", post(intel_collect_estimate))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(default_cors_layer())
        .layer(axum::extract::DefaultBodyLimit::max(validation::MAX_VIDEO_BYTES))
        .with_state(core)
}

fn default_cors_layer() -> tower_http::cors::CorsLayer {
    middleware::CorsConfig {
        allowed_origins: vec!["*".to_string()],
        allowed_methods: vec!["GET".to_string(), "POST".to_string()],
        allowed_headers: vec![
            "content-type".to_string(),
            "x-api-key".to_string(),
            "x-actor-id".to_string(),
            "x-request-id".to_string(),
        ],
    }
    .to_cors_layer()
}

// ---------------------------------------------------------------------------
// Handlers — detection
// ---------------------------------------------------------------------------

async fn detect_text(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<TextDetectRequest>,
) -> Result<Json<DetectionResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, "/detect/text");
    core.authenticate(&ctx)?;
    validation::RequestValidator::validate_text(&body.text)
        .map_err(|detail| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, detail)))?;
    core.authorize(&ctx, "text", operation_cost(ContentType::Text)).await?;

    let content_hash = veritas_core::hash_text(&body.text);
    let response = run_detection(
        &core,
        &ctx,
        ContentType::Text,
        Artifact::Text(&body.text),
        content_hash,
        AnalysisSource::Api,
        None,
    )
    .await
    .map_err(|e| ctx.error(e))?;

    Ok(Json(response))
}

async fn detect_image(
    state: State<Arc<Core>>,
    extension: Extension<RequestId>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<DetectionResponse>, ApiError> {
    detect_media(state, extension, headers, multipart, ContentType::Image, "/detect/image").await
}

async fn detect_audio(
    state: State<Arc<Core>>,
    extension: Extension<RequestId>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<DetectionResponse>, ApiError> {
    detect_media(state, extension, headers, multipart, ContentType::Audio, "/detect/audio").await
}

async fn detect_video(
    state: State<Arc<Core>>,
    extension: Extension<RequestId>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<DetectionResponse>, ApiError> {
    detect_media(state, extension, headers, multipart, ContentType::Video, "/detect/video").await
}

async fn detect_media(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    mut multipart: Multipart,
    content_type: ContentType,
    path: &'static str,
) -> Result<Json<DetectionResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, path);
    core.authenticate(&ctx)?;

    let mut filename = None;
    let mut bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, e.to_string())))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, e.to_string())))?,
            );
            break;
        }
    }
    let bytes = bytes.ok_or_else(|| {
        ctx.error(VeritasError::new(
            ErrorCode::ValidationFailed,
            "multipart field 'file' is required",
        ))
    })?;

    validation::RequestValidator::validate_media_size(content_type, bytes.len())
        .map_err(|detail| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, detail)))?;
    core.authorize(&ctx, operation_bucket(content_type), operation_cost(content_type))
        .await?;

    let content_hash = veritas_core::hash_bytes(&bytes);
    let response = run_detection(
        &core,
        &ctx,
        content_type,
        Artifact::Bytes(&bytes),
        content_hash,
        AnalysisSource::Api,
        filename,
    )
    .await
    .map_err(|e| ctx.error(e))?;

    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Handlers — batch
// ---------------------------------------------------------------------------

async fn batch_text(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<api::BatchTextRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, "/batch/text");
    core.authenticate(&ctx)?;

    let pairs: Vec<(String, String)> = body
        .items
        .iter()
        .map(|i| (i.item_id.clone(), i.text.clone()))
        .collect();
    validation::RequestValidator::validate_batch_items(&pairs)
        .map_err(|errs| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, errs.join("; "))))?;

    core.authorize(&ctx, "batch", 5).await?;

    let mut results = Vec::with_capacity(body.items.len());
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for item in body.items {
        let content_hash = veritas_core::hash_text(&item.text);
        match run_detection(
            &core,
            &ctx,
            ContentType::Text,
            Artifact::Text(&item.text),
            content_hash,
            AnalysisSource::Batch,
            None,
        )
        .await
        {
            Ok(detection) => {
                succeeded += 1;
                results.push(BatchItemResult {
                    item_id: item.item_id,
                    ok: true,
                    result: Some(detection),
                    error: None,
                });
            }
            Err(err) => {
                failed += 1;
                let stop = body.stop_on_error;
                results.push(BatchItemResult {
                    item_id: item.item_id,
                    ok: false,
                    result: None,
                    error: Some(err.message),
                });
                if stop {
                    break;
                }
            }
        }
    }

    Ok(Json(BatchResponse {
        items: results,
        succeeded,
        failed,
    }))
}

// ---------------------------------------------------------------------------
// Handlers — history / dashboard / estimate / health
// ---------------------------------------------------------------------------

async fn analyze_history(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, "/analyze/history");
    core.authenticate(&ctx)?;

    let content_type = match &query.content_type {
        Some(s) => Some(parse_content_type(s).map_err(|e| ctx.error(e))?),
        None => None,
    };

    let filter = ListFilter {
        content_type,
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    let (items, total) = core
        .store
        .list_analyses_page(&filter)
        .await
        .map_err(|e| ctx.error(e))?;

    Ok(Json(HistoryResponse {
        items: items.iter().map(HistoryItem::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

async fn analyze_dashboard(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, "/analyze/dashboard");
    core.authenticate(&ctx)?;
    validation::RequestValidator::validate_dashboard_days(query.days)
        .map_err(|detail| ctx.error(VeritasError::new(ErrorCode::ValidationFailed, detail)))?;

    let until = Utc::now();
    let since = until - chrono::Duration::days(query.days.saturating_sub(1) as i64);
    let summary: DashboardSummary = core.store.dashboard(since, until).await.map_err(|e| ctx.error(e))?;

    Ok(Json(DashboardResponse { summary }))
}

async fn intel_collect_estimate(
    State(core): State<Arc<Core>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let ctx = RequestContext::extract(&headers, request_id, "/intel/x/collect/estimate");
    core.authenticate(&ctx)?;
    core.authorize(&ctx, "intel", 8).await?;

    let page_cap = body.max_pages.unwrap_or(core.config.scheduler.page_cap).max(1);
    let hypothetical = ScheduledJob {
        handle: "estimate".to_string(),
        interval_seconds: 0,
        window_days: body.window_days,
        max_posts: body.max_posts,
        query: None,
    };
    let requests_estimate = hypothetical.requests_estimate(page_cap);
    let usage = core.scheduler.usage_snapshot().await;
    let fits_monthly_budget = !usage.would_exceed(requests_estimate, core.config.scheduler.monthly_request_cap);

    Ok(Json(EstimateResponse {
        requests_estimate,
        fits_monthly_budget,
    }))
}

async fn health(
    State(core): State<Arc<Core>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let deep = params.get("deep").map(|v| v == "true").unwrap_or(false);
    if !deep {
        return Json(HealthResponse {
            status: "ok",
            checks: None,
        });
    }

    let db = match core.store.count_analyses(&ListFilter::default()).await {
        Ok(_) => "ok".to_string(),
        Err(err) => err.to_string(),
    };
    let status = if db == "ok" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        checks: Some(HealthChecks {
            db,
            cache: "ok".to_string(),
        }),
    })
}
