// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for the daemon's HTTP integration tests: an in-memory
//! store, a tempdir for the webhook queue/dead-letter files, and every
//! background loop disabled so a test never races a tick or a drain cycle.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use veritas_config::AppConfig;
use veritas_daemon::{Core, build_app};

fn base_config(tmp: &std::path::Path) -> AppConfig {
    let mut config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    config.webhook.queue_file_path = tmp.join("webhook_queue.json").display().to_string();
    config.webhook.dead_letter_file_path = tmp.join("webhook_dead_letter.json").display().to_string();
    config.scheduler.enabled = false;
    config
}

pub async fn test_app(tmp: &std::path::Path) -> Arc<Core> {
    test_app_with(tmp, |_| {}).await
}

pub async fn test_app_with(tmp: &std::path::Path, configure: impl FnOnce(&mut AppConfig)) -> Arc<Core> {
    let mut config = base_config(tmp);
    configure(&mut config);

    let (core, scheduler_handle, webhook_handle) = Core::new(config)
        .await
        .expect("core initializes against an in-memory store");
    scheduler_handle.shutdown();
    webhook_handle.shutdown();
    core
}

pub async fn request_json(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    request_json_with_key(app, method, uri, body, None).await
}

pub async fn request_json_with_key(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    api_key: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = builder.header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    let request = match body {
        Some(value) => builder.body(Body::from(serde_json::to_vec(&value).unwrap())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is valid JSON")
    };
    (status, json)
}

pub fn router(core: Arc<Core>) -> Router {
    build_app(core)
}

pub fn long_text(len: usize) -> String {
    "The quick brown fox jumps over the lazy dog. ".repeat(len / 46 + 1)[..len].to_string()
}
