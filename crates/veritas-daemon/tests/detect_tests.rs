// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod common;

use axum::http::StatusCode;
use common::{long_text, request_json, request_json_with_key, router, test_app, test_app_with};
use serde_json::json;

#[tokio::test]
async fn detect_text_returns_a_verdict_with_consensus_breakdown() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(
        app,
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(200) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["analysis_id"].is_string());
    assert!(json["confidence"].as_f64().is_some());
    assert!(json["consensus"]["providers"].as_array().is_some_and(|p| !p.is_empty()));
}

#[tokio::test]
async fn detect_text_rejects_text_below_the_minimum_length() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(app, "POST", "/detect/text", Some(json!({ "text": "too short" }))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn detect_text_rejects_text_above_the_maximum_length() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, _json) = request_json(
        app,
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(50_001) })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn missing_api_key_is_rejected_when_required() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app_with(tmp.path(), |c| {
        c.require_api_key = true;
        c.api_keys = vec!["super-secret".to_string()];
    })
    .await;
    let app = router(core);

    let (status, json) = request_json(app, "POST", "/detect/text", Some(json!({ "text": long_text(200) }))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn correct_api_key_is_admitted_when_required() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app_with(tmp.path(), |c| {
        c.require_api_key = true;
        c.api_keys = vec!["super-secret".to_string()];
    })
    .await;
    let app = router(core);

    let (status, _json) = request_json_with_key(
        app,
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(200) })),
        Some("super-secret"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn repeated_requests_past_the_bucket_limit_are_rate_limited() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app_with(tmp.path(), |c| {
        c.rate_limit.insert(
            "text".to_string(),
            veritas_config::RateLimitConfig { window_seconds: 60, max_requests: 1, cost_points: 1 },
        );
    })
    .await;
    let app = router(core);

    let (first_status, _) = request_json(
        app.clone(),
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(200) })),
    )
    .await;
    assert_eq!(first_status, StatusCode::OK);

    let (second_status, json) = request_json(
        app,
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(200) })),
    )
    .await;
    assert_eq!(second_status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"], "RATE_LIMITED");
}

#[tokio::test]
async fn duplicate_text_within_the_dedup_window_returns_the_same_analysis_id() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);
    let text = long_text(250);

    let (_, first) = request_json(
        app.clone(),
        "POST",
        "/detect/text",
        Some(json!({ "text": text.clone() })),
    )
    .await;
    let (_, second) = request_json(app, "POST", "/detect/text", Some(json!({ "text": text }))).await;

    assert_eq!(first["analysis_id"], second["analysis_id"]);
}

#[tokio::test]
async fn batch_text_reports_per_item_outcomes() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(
        app,
        "POST",
        "/batch/text",
        Some(json!({
            "items": [
                { "item_id": "a", "text": long_text(200) },
                { "item_id": "b", "text": "too short" },
            ],
            "stop_on_error": false,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["failed"], 0);
}

#[tokio::test]
async fn analyze_history_and_dashboard_reflect_recorded_detections() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (_, _) = request_json(
        app.clone(),
        "POST",
        "/detect/text",
        Some(json!({ "text": long_text(300) })),
    )
    .await;

    let (history_status, history) = request_json(app.clone(), "GET", "/analyze/history", None).await;
    assert_eq!(history_status, StatusCode::OK);
    assert_eq!(history["total"], 1);
    assert_eq!(history["items"].as_array().unwrap().len(), 1);

    let (dashboard_status, dashboard) = request_json(app, "GET", "/analyze/dashboard?days=7", None).await;
    assert_eq!(dashboard_status, StatusCode::OK);
    assert_eq!(dashboard["summary"]["total_analyses"], 1);
}

#[tokio::test]
async fn dashboard_rejects_an_out_of_range_window() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, _) = request_json(app, "GET", "/analyze/dashboard?days=0", None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn intel_estimate_reports_a_projected_request_count() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(
        app,
        "POST",
        "/intel/x/collect/estimate",
        Some(json!({ "window_days": 7, "max_posts": 500 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["requests_estimate"].as_u64().unwrap() > 0);
    assert_eq!(json["fits_monthly_budget"], true);
}

#[tokio::test]
async fn detect_image_accepts_a_multipart_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let boundary = "veritas-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"frame.png\"\r\n");
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4, 5]);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/detect/image")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    let status = response.status();
    let bytes = http_body_util::BodyExt::collect(response.into_body()).await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(json["analysis_id"].is_string());
}

#[tokio::test]
async fn detect_image_rejects_an_upload_over_the_size_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let boundary = "veritas-test-boundary";
    let oversized = vec![0u8; veritas_daemon::validation::MAX_IMAGE_BYTES + 1];
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"big.png\"\r\n");
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(&oversized);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/detect/image")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
