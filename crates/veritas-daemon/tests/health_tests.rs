// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod common;

use axum::http::StatusCode;
use common::{request_json, router, test_app};

#[tokio::test]
async fn shallow_health_reports_ok_without_checks() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json.get("checks").is_none());
}

#[tokio::test]
async fn deep_health_reports_db_and_cache_checks() {
    let tmp = tempfile::tempdir().unwrap();
    let core = test_app(tmp.path()).await;
    let app = router(core);

    let (status, json) = request_json(app, "GET", "/health?deep=true", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["db"], "ok");
    assert_eq!(json["checks"]["cache"], "ok");
}
